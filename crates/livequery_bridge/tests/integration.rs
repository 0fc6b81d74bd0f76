//! Integration tests for the observation bridge.
//!
//! A scripted engine double captures the registered callback so tests can
//! drive deliveries by hand, including deliveries racing disposal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use livequery_bridge::{ObservationBridge, Snapshot};
use livequery_engine::{
    EngineError, EngineResult, MemoryEngine, ObserverCallback, ObserverEvent, ObserverToken,
    Query, ResultSet, StoreEngine, SubscriptionToken,
};

/// A `StoreEngine` that records registrations and lets tests invoke the
/// observer callback directly.
#[derive(Default)]
struct ScriptedEngine {
    callback: Mutex<Option<ObserverCallback>>,
    observer_releases: AtomicUsize,
    subscription_releases: AtomicUsize,
    fail_observer_release: bool,
}

impl ScriptedEngine {
    fn failing_observer_release() -> Self {
        Self {
            fail_observer_release: true,
            ..Self::default()
        }
    }

    fn deliver(&self, rows: Vec<Value>) {
        let callback = self
            .callback
            .lock()
            .unwrap()
            .clone()
            .expect("no observer registered");
        callback(ObserverEvent::Snapshot(ResultSet::new(rows)));
    }
}

impl StoreEngine for ScriptedEngine {
    fn register_subscription(&self, _query: &Query) -> EngineResult<SubscriptionToken> {
        Ok(SubscriptionToken::new())
    }

    fn register_observer(
        &self,
        _query: &Query,
        callback: ObserverCallback,
    ) -> EngineResult<ObserverToken> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(ObserverToken::new())
    }

    fn unregister_subscription(&self, _token: SubscriptionToken) -> EngineResult<()> {
        self.subscription_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unregister_observer(&self, _token: ObserverToken) -> EngineResult<()> {
        self.observer_releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_observer_release {
            Err(EngineError::EngineClosed)
        } else {
            Ok(())
        }
    }

    fn execute(&self, _query: &Query) -> EngineResult<ResultSet> {
        Ok(ResultSet::default())
    }

    fn start_sync(&self) -> EngineResult<()> {
        Ok(())
    }

    fn stop_sync(&self) -> EngineResult<()> {
        Ok(())
    }

    fn is_sync_active(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn delivery_racing_disposal_is_never_visible() {
    let engine = Arc::new(ScriptedEngine::default());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let mut stream = bridge.subscribe::<Value>(&Query::new("SELECT * FROM docs")).unwrap();

    engine.deliver(vec![json!({"n": 1})]);
    assert!(stream.next().await.is_some());

    stream.close().unwrap();

    // The engine's dispatch thread may still be mid-flight with a
    // delivery when close returns; it must vanish without a trace.
    engine.deliver(vec![json!({"n": 2})]);

    assert!(stream.latest().is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn close_releases_each_token_exactly_once() {
    let engine = Arc::new(ScriptedEngine::default());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let mut stream = bridge.subscribe::<Value>(&Query::new("SELECT * FROM docs")).unwrap();

    stream.close().unwrap();
    stream.close().unwrap();
    drop(stream);

    assert_eq!(engine.observer_releases.load(Ordering::SeqCst), 1);
    assert_eq!(engine.subscription_releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_observer_release_still_releases_the_subscription() {
    let engine = Arc::new(ScriptedEngine::failing_observer_release());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let mut stream = bridge.subscribe::<Value>(&Query::new("SELECT * FROM docs")).unwrap();

    let error = stream.close().unwrap_err();
    assert!(error.observer_error().is_some());
    assert!(error.subscription_error().is_none());
    assert_eq!(engine.subscription_releases.load(Ordering::SeqCst), 1);

    // The failure was already reported; drop must not retry or re-raise.
    drop(stream);
    assert_eq!(engine.observer_releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn undrained_deliveries_conflate_to_the_newest() {
    let engine = Arc::new(ScriptedEngine::default());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let mut stream = bridge.subscribe::<Value>(&Query::new("SELECT * FROM docs")).unwrap();

    for n in 1..=3 {
        engine.deliver(vec![json!({"n": n})]);
    }

    let snapshot: Snapshot<Value> = stream.next().await.unwrap();
    assert_eq!(snapshot.sequence, 3);
    assert_eq!(snapshot.items, vec![json!({"n": 3})]);

    // S1 and S2 are gone; nothing further is pending.
    assert!(timeout(Duration::from_millis(50), stream.next()).await.is_err());
}

#[derive(Debug, Clone, Deserialize)]
struct Titled {
    title: String,
}

#[tokio::test]
async fn one_bad_row_does_not_sink_the_snapshot() {
    let engine = Arc::new(MemoryEngine::new());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let mut stream = bridge
        .subscribe::<Titled>(&Query::new("SELECT * FROM docs ORDER BY _id"))
        .unwrap();
    timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();

    for doc in [
        json!({"_id": "a", "title": "first"}),
        json!({"_id": "b", "title": 42}),
        json!({"_id": "c", "title": "third"}),
    ] {
        engine
            .execute(&Query::new("INSERT INTO docs DOCUMENTS (:doc)").with_param("doc", doc))
            .unwrap();
    }
    engine.settle();

    let snapshot = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    let titles: Vec<&str> = snapshot.items.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["first", "third"]);

    let mut diagnostics = stream.take_diagnostics().unwrap();
    let failure = diagnostics.try_recv().unwrap();
    assert_eq!(failure.row_index, 1);
}
