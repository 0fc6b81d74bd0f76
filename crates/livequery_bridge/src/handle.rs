//! Paired subscription/observer registration handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use livequery_engine::{
    EngineError, ObserverCallback, ObserverToken, Query, StoreEngine, SubscriptionToken,
};

use crate::error::DisposalError;

/// Owns one sync subscription and one observer, registered as a pair.
///
/// The two registrations live and die together: [`open`](Self::open)
/// registers both and rolls the subscription back if the observer fails;
/// [`close`](Self::close) releases both. Close runs at most once no matter
/// how many times it is invoked or from how many threads.
pub struct QueryObserverHandle<E: StoreEngine> {
    engine: Arc<E>,
    subscription: SubscriptionToken,
    observer: ObserverToken,
    closed: AtomicBool,
}

impl<E: StoreEngine> QueryObserverHandle<E> {
    /// Registers the subscription, then the observer.
    ///
    /// The subscription may use a broader query than the observer: the
    /// subscription describes what the engine keeps replicating, the
    /// observer what it delivers locally. If the observer registration
    /// fails, the already-registered subscription is released best-effort
    /// before the error is returned.
    pub fn open(
        engine: Arc<E>,
        subscribe_query: &Query,
        observe_query: &Query,
        callback: ObserverCallback,
    ) -> Result<Self, EngineError> {
        let subscription = engine.register_subscription(subscribe_query)?;
        let observer = match engine.register_observer(observe_query, callback) {
            Ok(observer) => observer,
            Err(error) => {
                if let Err(cleanup) = engine.unregister_subscription(subscription) {
                    warn!(%subscription, %cleanup, "failed to roll back subscription");
                }
                return Err(error);
            }
        };

        trace!(%subscription, %observer, "opened observation handle");
        Ok(Self {
            engine,
            subscription,
            observer,
            closed: AtomicBool::new(false),
        })
    }

    /// Releases the observer, then the subscription.
    ///
    /// Both releases are attempted even if the first fails; failures are
    /// combined into one [`DisposalError`]. Second and later calls are
    /// no-ops returning `Ok` without touching the engine.
    pub fn close(&self) -> Result<(), DisposalError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let observer_err = self.engine.unregister_observer(self.observer).err();
        let subscription_err = self.engine.unregister_subscription(self.subscription).err();
        trace!(
            subscription = %self.subscription,
            observer = %self.observer,
            "closed observation handle"
        );

        match DisposalError::from_parts(observer_err, subscription_err) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Returns true once [`close`](Self::close) has started running.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The subscription token this handle owns.
    pub fn subscription_token(&self) -> SubscriptionToken {
        self.subscription
    }

    /// The observer token this handle owns.
    pub fn observer_token(&self) -> ObserverToken {
        self.observer
    }
}

impl<E: StoreEngine> Drop for QueryObserverHandle<E> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(%error, "failed to release observation handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livequery_engine::{MemoryEngine, ObserverEvent};

    fn noop_callback() -> ObserverCallback {
        Arc::new(|_event: ObserverEvent| {})
    }

    #[test]
    fn open_registers_both_and_close_releases_both() {
        let engine = Arc::new(MemoryEngine::new());
        let handle = QueryObserverHandle::open(
            Arc::clone(&engine),
            &Query::new("SELECT * FROM tasks"),
            &Query::new("SELECT * FROM tasks WHERE NOT deleted ORDER BY _id"),
            noop_callback(),
        )
        .unwrap();

        assert_eq!(engine.subscription_count(), 1);
        assert_eq!(engine.observer_count(), 1);
        assert!(!handle.is_closed());

        handle.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.observer_count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let handle = QueryObserverHandle::open(
            Arc::clone(&engine),
            &Query::new("SELECT * FROM tasks"),
            &Query::new("SELECT * FROM tasks"),
            noop_callback(),
        )
        .unwrap();

        handle.close().unwrap();
        // A second close must not attempt another release; the tokens are
        // already gone and re-releasing them would error.
        handle.close().unwrap();
        handle.close().unwrap();
    }

    #[test]
    fn failed_observer_registration_rolls_back_subscription() {
        let engine = Arc::new(MemoryEngine::new());
        let result = QueryObserverHandle::open(
            Arc::clone(&engine),
            &Query::new("SELECT * FROM tasks"),
            &Query::new("SELECT * FROM tasks WHERE _id = :id"),
            noop_callback(),
        );

        assert!(matches!(result, Err(EngineError::MissingParameter(_))));
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.observer_count(), 0);
    }

    #[test]
    fn drop_closes_the_handle() {
        let engine = Arc::new(MemoryEngine::new());
        {
            let _handle = QueryObserverHandle::open(
                Arc::clone(&engine),
                &Query::new("SELECT * FROM tasks"),
                &Query::new("SELECT * FROM tasks"),
                noop_callback(),
            )
            .unwrap();
            assert_eq!(engine.observer_count(), 1);
        }
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.observer_count(), 0);
    }
}
