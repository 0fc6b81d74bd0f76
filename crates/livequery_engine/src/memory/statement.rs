//! Statement parsing and predicate evaluation for the in-memory engine.
//!
//! The dialect covers exactly what live-query consumers issue:
//!
//! ```text
//! SELECT * FROM <collection> [WHERE <cond>] [ORDER BY <field>]
//! INSERT INTO <collection> [INITIAL] DOCUMENTS (:<param>)
//! UPDATE <collection> SET <field> = :<param> [WHERE <cond>]
//!
//! <cond> ::= <term> [AND <term>]...
//! <term> ::= <field> = :<param> | NOT <field>
//! ```
//!
//! Keywords are case-insensitive; collection and field names are not.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
}

/// `SELECT * FROM <collection> [WHERE ...] [ORDER BY <field>]`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectStatement {
    pub(crate) collection: String,
    pub(crate) filter: Option<WhereClause>,
    pub(crate) order_by: Option<String>,
}

/// `INSERT INTO <collection> [INITIAL] DOCUMENTS (:<param>)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InsertStatement {
    pub(crate) collection: String,
    pub(crate) initial: bool,
    pub(crate) doc_param: String,
}

/// `UPDATE <collection> SET <field> = :<param> [WHERE ...]`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpdateStatement {
    pub(crate) collection: String,
    pub(crate) field: String,
    pub(crate) value_param: String,
    pub(crate) filter: Option<WhereClause>,
}

impl Statement {
    /// Returns the parameter names the statement references.
    pub(crate) fn required_params(&self) -> Vec<&str> {
        match self {
            Statement::Select(select) => select
                .filter
                .iter()
                .flat_map(|clause| clause.param_names())
                .collect(),
            Statement::Insert(insert) => vec![insert.doc_param.as_str()],
            Statement::Update(update) => {
                let mut params = vec![update.value_param.as_str()];
                if let Some(clause) = &update.filter {
                    params.extend(clause.param_names());
                }
                params
            }
        }
    }
}

/// An AND-joined conjunction of predicate terms.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WhereClause {
    terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    /// `<field> = :<param>`
    Eq { field: String, param: String },
    /// `NOT <field>`; matches when the field is absent, null, or `false`.
    IsFalse { field: String },
}

impl WhereClause {
    /// Evaluates the clause against one document.
    pub(crate) fn matches(&self, doc: &Value, params: &Map<String, Value>) -> EngineResult<bool> {
        for term in &self.terms {
            match term {
                Term::Eq { field, param } => {
                    let expected = params
                        .get(param)
                        .ok_or_else(|| EngineError::missing_parameter(param.clone()))?;
                    if doc.get(field) != Some(expected) {
                        return Ok(false);
                    }
                }
                Term::IsFalse { field } => match doc.get(field) {
                    None | Some(Value::Null) | Some(Value::Bool(false)) => {}
                    Some(_) => return Ok(false),
                },
            }
        }
        Ok(true)
    }

    fn param_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.terms.iter().filter_map(|term| match term {
            Term::Eq { param, .. } => Some(param.as_str()),
            Term::IsFalse { .. } => None,
        })
    }
}

/// Total order over JSON values for `ORDER BY`.
///
/// Values of the same kind compare naturally; mixed kinds compare by kind
/// (null < bool < number < string < array < object). Arrays and objects
/// have no intra-kind order and sort stably.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Parses a statement.
pub(crate) fn parse(statement: &str) -> EngineResult<Statement> {
    let tokens = tokenize(statement)?;
    let mut parser = Parser {
        statement,
        tokens,
        pos: 0,
    };
    let parsed = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Param(String),
    Star,
    Eq,
    LParen,
    RParen,
}

fn tokenize(statement: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ':' => {
                chars.next();
                let name = take_word(&mut chars);
                if name.is_empty() {
                    return Err(EngineError::malformed(
                        statement,
                        "expected parameter name after `:`",
                    ));
                }
                tokens.push(Token::Param(name));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                tokens.push(Token::Ident(take_word(&mut chars)));
            }
            other => {
                return Err(EngineError::malformed(
                    statement,
                    format!("unexpected character `{other}`"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

struct Parser<'a> {
    statement: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn parse_statement(&mut self) -> EngineResult<Statement> {
        let keyword = self.ident("a statement keyword")?;
        if keyword.eq_ignore_ascii_case("SELECT") {
            self.parse_select()
        } else if keyword.eq_ignore_ascii_case("INSERT") {
            self.parse_insert()
        } else if keyword.eq_ignore_ascii_case("UPDATE") {
            self.parse_update()
        } else {
            Err(self.err(format!("unsupported statement `{keyword}`")))
        }
    }

    fn parse_select(&mut self) -> EngineResult<Statement> {
        self.expect_token(&Token::Star, "`*`")?;
        self.expect_keyword("FROM")?;
        let collection = self.ident("a collection name")?;

        let filter = if self.peek_keyword("WHERE") {
            self.pos += 1;
            Some(self.parse_where()?)
        } else {
            None
        };

        let order_by = if self.peek_keyword("ORDER") {
            self.pos += 1;
            self.expect_keyword("BY")?;
            Some(self.ident("an ordering field")?)
        } else {
            None
        };

        Ok(Statement::Select(SelectStatement {
            collection,
            filter,
            order_by,
        }))
    }

    fn parse_insert(&mut self) -> EngineResult<Statement> {
        self.expect_keyword("INTO")?;
        let collection = self.ident("a collection name")?;

        let initial = if self.peek_keyword("INITIAL") {
            self.pos += 1;
            true
        } else {
            false
        };

        self.expect_keyword("DOCUMENTS")?;
        self.expect_token(&Token::LParen, "`(`")?;
        let doc_param = self.param("a document parameter")?;
        self.expect_token(&Token::RParen, "`)`")?;

        Ok(Statement::Insert(InsertStatement {
            collection,
            initial,
            doc_param,
        }))
    }

    fn parse_update(&mut self) -> EngineResult<Statement> {
        let collection = self.ident("a collection name")?;
        self.expect_keyword("SET")?;
        let field = self.ident("a field name")?;
        self.expect_token(&Token::Eq, "`=`")?;
        let value_param = self.param("a value parameter")?;

        let filter = if self.peek_keyword("WHERE") {
            self.pos += 1;
            Some(self.parse_where()?)
        } else {
            None
        };

        Ok(Statement::Update(UpdateStatement {
            collection,
            field,
            value_param,
            filter,
        }))
    }

    fn parse_where(&mut self) -> EngineResult<WhereClause> {
        let mut terms = vec![self.parse_term()?];
        while self.peek_keyword("AND") {
            self.pos += 1;
            terms.push(self.parse_term()?);
        }
        Ok(WhereClause { terms })
    }

    fn parse_term(&mut self) -> EngineResult<Term> {
        if self.peek_keyword("NOT") {
            self.pos += 1;
            let field = self.ident("a field name after `NOT`")?;
            return Ok(Term::IsFalse { field });
        }

        let field = self.ident("a field name")?;
        self.expect_token(&Token::Eq, "`=`")?;
        let param = self.param("a comparison parameter")?;
        Ok(Term::Eq { field, param })
    }

    fn ident(&mut self, what: &str) -> EngineResult<String> {
        match self.tokens.get(self.pos) {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.err(format!("expected {what}"))),
        }
    }

    fn param(&mut self, what: &str) -> EngineResult<String> {
        match self.tokens.get(self.pos) {
            Some(Token::Param(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.err(format!("expected {what}"))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(
            self.tokens.get(self.pos),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn expect_keyword(&mut self, keyword: &str) -> EngineResult<()> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected `{keyword}`")))
        }
    }

    fn expect_token(&mut self, token: &Token, what: &str) -> EngineResult<()> {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn expect_end(&mut self) -> EngineResult<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.err("trailing tokens after statement"))
        }
    }

    fn err(&self, message: impl Into<String>) -> EngineError {
        EngineError::malformed(self.statement, message)
    }
}
