//! Query and result-set data model.

use serde_json::{Map, Value};

/// A statement plus its named parameters.
///
/// Queries are immutable once submitted to an engine. Parameters are
/// referenced from the statement text as `:name` and carried as JSON
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: String,
    params: Map<String, Value>,
}

impl Query {
    /// Creates a query with no parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Map::new(),
        }
    }

    /// Adds a named parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Returns the statement text.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Returns all named parameters.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Looks up a single parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

/// An ordered set of result rows.
///
/// Each row is normally a JSON object mapping field names to values. Row
/// order is the order the engine produced them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Value>,
}

impl ResultSet {
    /// Creates a result set from rows.
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }

    /// Returns the rows as a slice.
    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    /// Consumes the result set, returning its rows.
    pub fn into_rows(self) -> Vec<Value> {
        self.rows
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.rows.iter()
    }
}

impl From<Vec<Value>> for ResultSet {
    fn from(rows: Vec<Value>) -> Self {
        Self::new(rows)
    }
}

impl IntoIterator for ResultSet {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
