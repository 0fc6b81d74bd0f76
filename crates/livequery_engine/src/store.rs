//! The store-engine capability seam.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::query::{Query, ResultSet};

/// Token identifying a registered sync subscription.
///
/// A subscription tells the engine which documents to keep replicating;
/// it produces no deliveries of its own.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionToken({})", self.0)
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying a registered observer.
///
/// An observer delivers a fresh result snapshot to its callback whenever
/// the observed query's results may have changed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(Uuid);

impl ObserverToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverToken({})", self.0)
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One delivery pushed to an observer callback.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// The current result rows for the observed query.
    Snapshot(ResultSet),
    /// The engine withdrew the registration; no further events follow.
    Rescinded {
        /// Why the registration ended.
        reason: String,
    },
}

/// Callback invoked by the engine for each observer delivery.
///
/// The engine calls this on one of its own internal threads. Callbacks
/// must not block; they may call back into the engine.
pub type ObserverCallback = Arc<dyn Fn(ObserverEvent) + Send + Sync>;

/// The narrow engine surface this subsystem is allowed to touch.
///
/// Everything the observation bridge and the sync control loop need from
/// the underlying store/sync engine goes through this trait. Production
/// wires in the real engine; tests and demos use [`MemoryEngine`].
///
/// [`MemoryEngine`]: crate::MemoryEngine
pub trait StoreEngine: Send + Sync {
    /// Registers a sync subscription describing documents to replicate.
    fn register_subscription(&self, query: &Query) -> EngineResult<SubscriptionToken>;

    /// Registers an observer; `callback` receives the current snapshot
    /// immediately and again after every relevant change.
    fn register_observer(
        &self,
        query: &Query,
        callback: ObserverCallback,
    ) -> EngineResult<ObserverToken>;

    /// Releases a subscription.
    fn unregister_subscription(&self, token: SubscriptionToken) -> EngineResult<()>;

    /// Releases an observer. No deliveries occur after this returns.
    fn unregister_observer(&self, token: ObserverToken) -> EngineResult<()>;

    /// Executes a statement and returns its rows.
    fn execute(&self, query: &Query) -> EngineResult<ResultSet>;

    /// Starts sync replication.
    fn start_sync(&self) -> EngineResult<()>;

    /// Stops sync replication.
    fn stop_sync(&self) -> EngineResult<()>;

    /// Returns true if sync replication is currently active.
    fn is_sync_active(&self) -> bool;
}
