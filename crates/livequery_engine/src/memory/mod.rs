//! In-memory store engine.
//!
//! [`MemoryEngine`] implements [`StoreEngine`] entirely in process: a
//! per-collection document store keyed by `_id`, live observers
//! re-evaluated after every committed mutation, and a sync toggle. It
//! exists so the observation bridge and the sync control loop can be
//! exercised end to end without a real replication engine.
//!
//! Observer callbacks run on a single background dispatch thread, never
//! on the mutating caller's thread. No store lock is held while a
//! callback runs, so callbacks may call back into the engine.

mod dispatch;
mod statement;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::query::{Query, ResultSet};
use crate::store::{
    ObserverCallback, ObserverToken, StoreEngine, SubscriptionToken,
};

use dispatch::{DispatchEvent, Dispatcher};
use statement::{InsertStatement, SelectStatement, Statement, UpdateStatement};

const ID_FIELD: &str = "_id";

struct ObserverEntry {
    select: SelectStatement,
    params: Map<String, Value>,
    callback: ObserverCallback,
}

struct Inner {
    config: EngineConfig,
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    observers: RwLock<HashMap<ObserverToken, ObserverEntry>>,
    subscriptions: RwLock<HashMap<SubscriptionToken, Query>>,
    sync_active: AtomicBool,
    sync_fault: Mutex<Option<String>>,
    closed: AtomicBool,
    events: mpsc::Sender<DispatchEvent>,
}

impl Inner {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::EngineClosed)
        } else {
            Ok(())
        }
    }

    fn check_collection(&self, name: &str) -> EngineResult<()> {
        if self.config.strict_queries && !self.collections.read().contains_key(name) {
            return Err(EngineError::UnknownCollection(name.to_string()));
        }
        Ok(())
    }

    fn check_params(&self, statement: &Statement, query: &Query) -> EngineResult<()> {
        for name in statement.required_params() {
            if query.param(name).is_none() {
                return Err(EngineError::missing_parameter(name));
            }
        }
        Ok(())
    }

    fn select_rows(
        &self,
        select: &SelectStatement,
        params: &Map<String, Value>,
    ) -> EngineResult<Vec<Value>> {
        let mut rows = Vec::new();
        {
            let collections = self.collections.read();
            if let Some(docs) = collections.get(&select.collection) {
                for doc in docs.values() {
                    let keep = match &select.filter {
                        Some(clause) => clause.matches(doc, params)?,
                        None => true,
                    };
                    if keep {
                        rows.push(doc.clone());
                    }
                }
            }
        }

        if let Some(field) = &select.order_by {
            rows.sort_by(|a, b| match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => statement::compare_values(x, y),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        Ok(rows)
    }
}

/// An in-process [`StoreEngine`] for tests and demos.
///
/// Documents live in per-collection maps keyed by their `_id` field.
/// The supported statement dialect is described in the crate docs.
pub struct MemoryEngine {
    inner: Arc<Inner>,
    _dispatcher: Dispatcher,
}

impl MemoryEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let (events, queue) = mpsc::channel();
        let inner = Arc::new(Inner {
            config,
            collections: RwLock::new(BTreeMap::new()),
            observers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            sync_active: AtomicBool::new(false),
            sync_fault: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
        });
        let dispatcher = Dispatcher::spawn(Arc::clone(&inner), queue);
        Self {
            inner,
            _dispatcher: dispatcher,
        }
    }

    /// Blocks until every delivery queued so far has been dispatched.
    pub fn settle(&self) {
        let (ack, done) = mpsc::channel();
        if self.inner.events.send(DispatchEvent::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Closes the engine.
    ///
    /// Every observer receives a terminal rescind and the registries are
    /// dropped. Subsequent statements and registrations fail with
    /// [`EngineError::EngineClosed`]; releasing an already-dropped
    /// registration is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing memory engine");

        let rescinded: Vec<ObserverCallback> = {
            let mut observers = self.inner.observers.write();
            observers.drain().map(|(_, entry)| entry.callback).collect()
        };
        self.inner.subscriptions.write().clear();

        for callback in rescinded {
            let _ = self.inner.events.send(DispatchEvent::Rescind {
                callback,
                reason: "engine closed".to_string(),
            });
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Makes `start_sync`/`stop_sync` fail with the given message until
    /// [`clear_sync_fault`](Self::clear_sync_fault) is called.
    pub fn inject_sync_fault(&self, message: impl Into<String>) {
        *self.inner.sync_fault.lock() = Some(message.into());
    }

    /// Clears a scripted sync fault.
    pub fn clear_sync_fault(&self) {
        *self.inner.sync_fault.lock() = None;
    }

    /// Returns the number of live observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    fn execute_insert(&self, insert: &InsertStatement, query: &Query) -> EngineResult<ResultSet> {
        let value = query
            .param(&insert.doc_param)
            .cloned()
            .ok_or_else(|| EngineError::missing_parameter(insert.doc_param.clone()))?;

        let mut doc = match value {
            Value::Object(map) => map,
            _ => {
                return Err(EngineError::InvalidDocument(
                    "inserted documents must be objects".into(),
                ))
            }
        };

        let id = match doc.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(EngineError::InvalidDocument("`_id` must be a string".into()));
            }
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        let stored = Value::Object(doc);
        {
            let mut collections = self.inner.collections.write();
            let docs = collections.entry(insert.collection.clone()).or_default();
            if docs.contains_key(&id) {
                if insert.initial {
                    // First-run seeding: an existing document wins untouched.
                    return Ok(ResultSet::default());
                }
                return Err(EngineError::duplicate(insert.collection.clone(), id));
            }
            docs.insert(id.clone(), stored.clone());
        }

        trace!(collection = %insert.collection, %id, "inserted document");
        let _ = self
            .inner
            .events
            .send(DispatchEvent::CollectionChanged(insert.collection.clone()));
        Ok(ResultSet::new(vec![stored]))
    }

    fn execute_update(&self, update: &UpdateStatement, query: &Query) -> EngineResult<ResultSet> {
        self.inner.check_collection(&update.collection)?;
        let value = query
            .param(&update.value_param)
            .cloned()
            .ok_or_else(|| EngineError::missing_parameter(update.value_param.clone()))?;

        let mut touched = Vec::new();
        {
            let mut collections = self.inner.collections.write();
            if let Some(docs) = collections.get_mut(&update.collection) {
                for doc in docs.values_mut() {
                    let matched = match &update.filter {
                        Some(clause) => clause.matches(doc, query.params())?,
                        None => true,
                    };
                    if !matched {
                        continue;
                    }
                    if let Value::Object(fields) = doc {
                        fields.insert(update.field.clone(), value.clone());
                        touched.push(doc.clone());
                    }
                }
            }
        }

        if !touched.is_empty() {
            trace!(
                collection = %update.collection,
                rows = touched.len(),
                "updated documents"
            );
            let _ = self
                .inner
                .events
                .send(DispatchEvent::CollectionChanged(update.collection.clone()));
        }
        Ok(ResultSet::new(touched))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreEngine for MemoryEngine {
    fn register_subscription(&self, query: &Query) -> EngineResult<SubscriptionToken> {
        self.inner.ensure_open()?;
        let statement = statement::parse(query.statement())?;
        self.inner.check_params(&statement, query)?;
        let select = match statement {
            Statement::Select(select) => select,
            _ => {
                return Err(EngineError::malformed(
                    query.statement(),
                    "subscriptions must be SELECT statements",
                ))
            }
        };
        self.inner.check_collection(&select.collection)?;

        let token = SubscriptionToken::new();
        self.inner.subscriptions.write().insert(token, query.clone());
        trace!(%token, query = query.statement(), "registered subscription");
        Ok(token)
    }

    fn register_observer(
        &self,
        query: &Query,
        callback: ObserverCallback,
    ) -> EngineResult<ObserverToken> {
        self.inner.ensure_open()?;
        let statement = statement::parse(query.statement())?;
        self.inner.check_params(&statement, query)?;
        let select = match statement {
            Statement::Select(select) => select,
            _ => {
                return Err(EngineError::malformed(
                    query.statement(),
                    "observers must be SELECT statements",
                ))
            }
        };
        self.inner.check_collection(&select.collection)?;

        let token = ObserverToken::new();
        self.inner.observers.write().insert(
            token,
            ObserverEntry {
                select,
                params: query.params().clone(),
                callback,
            },
        );
        let _ = self.inner.events.send(DispatchEvent::ObserverAdded(token));
        trace!(%token, query = query.statement(), "registered observer");
        Ok(token)
    }

    fn unregister_subscription(&self, token: SubscriptionToken) -> EngineResult<()> {
        // Releasing after close is benign; the registry is already gone.
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.inner.subscriptions.write().remove(&token) {
            Some(_) => {
                trace!(%token, "unregistered subscription");
                Ok(())
            }
            None => Err(EngineError::UnknownSubscription(token)),
        }
    }

    fn unregister_observer(&self, token: ObserverToken) -> EngineResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.inner.observers.write().remove(&token) {
            Some(_) => {
                trace!(%token, "unregistered observer");
                Ok(())
            }
            None => Err(EngineError::UnknownObserver(token)),
        }
    }

    fn execute(&self, query: &Query) -> EngineResult<ResultSet> {
        self.inner.ensure_open()?;
        let statement = statement::parse(query.statement())?;
        self.inner.check_params(&statement, query)?;

        match statement {
            Statement::Select(select) => {
                self.inner.check_collection(&select.collection)?;
                let rows = self.inner.select_rows(&select, query.params())?;
                Ok(ResultSet::new(rows))
            }
            Statement::Insert(insert) => self.execute_insert(&insert, query),
            Statement::Update(update) => self.execute_update(&update, query),
        }
    }

    fn start_sync(&self) -> EngineResult<()> {
        self.inner.ensure_open()?;
        if let Some(message) = self.inner.sync_fault.lock().clone() {
            return Err(EngineError::SyncUnavailable(message));
        }
        if !self.inner.sync_active.swap(true, Ordering::SeqCst) {
            debug!("sync started");
        }
        Ok(())
    }

    fn stop_sync(&self) -> EngineResult<()> {
        self.inner.ensure_open()?;
        if let Some(message) = self.inner.sync_fault.lock().clone() {
            return Err(EngineError::SyncUnavailable(message));
        }
        if self.inner.sync_active.swap(false, Ordering::SeqCst) {
            debug!("sync stopped");
        }
        Ok(())
    }

    fn is_sync_active(&self) -> bool {
        self.inner.sync_active.load(Ordering::SeqCst)
    }
}
