//! The observation bridge.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use livequery_engine::{Query, StoreEngine};

use crate::error::BridgeResult;
use crate::handle::QueryObserverHandle;
use crate::stream::{forwarder_parts, SnapshotStream};

/// Configuration for an [`ObservationBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Capacity of the per-stream decode-diagnostics channel.
    ///
    /// Failures beyond this backlog are dropped rather than blocking the
    /// engine's dispatch thread.
    pub diagnostics_capacity: usize,
}

impl BridgeConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            diagnostics_capacity: 16,
        }
    }

    /// Sets the decode-diagnostics channel capacity.
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity.max(1);
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts an engine's push-style observer callbacks into cancellable
/// latest-value [`SnapshotStream`]s.
///
/// Each call to [`subscribe`](Self::subscribe) opens an independent
/// engine registration; two subscribers of the same logical query do not
/// share a handle and see no relative ordering guarantees between their
/// streams. The bridge itself is cheap to clone and holds no per-stream
/// state; each stream owns its registrations and releases them on close
/// or drop.
pub struct ObservationBridge<E: StoreEngine> {
    engine: Arc<E>,
    config: BridgeConfig,
}

impl<E: StoreEngine> ObservationBridge<E> {
    /// Creates a bridge over an engine with the default configuration.
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_config(engine, BridgeConfig::default())
    }

    /// Creates a bridge with an explicit configuration.
    pub fn with_config(engine: Arc<E>, config: BridgeConfig) -> Self {
        Self { engine, config }
    }

    /// The engine this bridge observes.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Opens a stream whose subscription and observer use the same query.
    ///
    /// Rows are decoded into `T` via serde; rows that fail to decode are
    /// skipped and reported on the stream's diagnostics channel.
    /// Registration failures are returned here, before any delivery.
    pub fn subscribe<T>(&self, query: &Query) -> BridgeResult<SnapshotStream<T, E>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.subscribe_scoped(query, query)
    }

    /// Opens a stream with a broader subscription than its observer.
    ///
    /// `subscribe_query` declares what the engine keeps replicating;
    /// `observe_query` is the (typically narrower, filtered or ordered)
    /// query whose results are delivered locally. The original quickstart
    /// pattern: subscribe to the whole collection, observe the
    /// non-deleted rows in a stable order.
    pub fn subscribe_scoped<T>(
        &self,
        subscribe_query: &Query,
        observe_query: &Query,
    ) -> BridgeResult<SnapshotStream<T, E>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let parts = forwarder_parts::<T>(self.config.diagnostics_capacity);
        let handle = QueryObserverHandle::open(
            Arc::clone(&self.engine),
            subscribe_query,
            observe_query,
            parts.callback.clone(),
        )?;
        debug!(
            subscription = %handle.subscription_token(),
            observer = %handle.observer_token(),
            query = observe_query.statement(),
            "opened snapshot stream"
        );
        Ok(SnapshotStream::new(handle, parts))
    }
}

impl<E: StoreEngine> Clone for ObservationBridge<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use livequery_engine::{EngineError, MemoryEngine};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn subscribe_opens_an_independent_handle_per_call() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = ObservationBridge::new(Arc::clone(&engine));
        let query = Query::new("SELECT * FROM tasks");

        let first = bridge.subscribe::<Value>(&query).unwrap();
        let second = bridge.subscribe::<Value>(&query).unwrap();

        assert_ne!(first.observer_token(), second.observer_token());
        assert_eq!(engine.subscription_count(), 2);
        assert_eq!(engine.observer_count(), 2);

        drop(first);
        assert_eq!(engine.observer_count(), 1);
        drop(second);
        assert_eq!(engine.observer_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_scoped_observes_the_narrower_query() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = ObservationBridge::new(Arc::clone(&engine));

        let mut stream = bridge
            .subscribe_scoped::<Value>(
                &Query::new("SELECT * FROM tasks"),
                &Query::new("SELECT * FROM tasks WHERE NOT deleted ORDER BY _id"),
            )
            .unwrap();
        timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();

        for (id, deleted) in [("a", false), ("b", true)] {
            engine
                .execute(
                    &Query::new("INSERT INTO tasks DOCUMENTS (:task)")
                        .with_param("task", json!({"_id": id, "deleted": deleted})),
                )
                .unwrap();
        }
        engine.settle();

        let snapshot = timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0]["_id"], json!("a"));
    }

    #[test]
    fn registration_failure_is_returned_directly() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = ObservationBridge::new(Arc::clone(&engine));

        let result = bridge.subscribe::<Value>(&Query::new("DELETE FROM tasks"));
        assert!(matches!(
            result,
            Err(BridgeError::Registration(EngineError::MalformedStatement { .. }))
        ));
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.observer_count(), 0);
    }

    #[test]
    fn config_builder() {
        let config = BridgeConfig::new().with_diagnostics_capacity(4);
        assert_eq!(config.diagnostics_capacity, 4);
        // Zero would make try_send always fail; clamped up.
        assert_eq!(BridgeConfig::new().with_diagnostics_capacity(0).diagnostics_capacity, 1);
    }
}
