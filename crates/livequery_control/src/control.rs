//! The sync control loop.
//!
//! Control state lives inside the store it controls: one flag document
//! governs whether the engine replicates, and any process with write
//! access to the store can flip it for every observer. The loop never
//! applies a toggle directly; it writes the flag and reacts only when
//! its own observer sees the write come back through the store, so
//! engine state is always a function of the persisted value.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use livequery_bridge::{ObservationBridge, Snapshot};
use livequery_engine::StoreEngine;

use crate::error::{ControlError, ControlResult, SyncAction};
use crate::flag::{self, SyncFlag, FLAG_COLLECTION, FLAG_DOCUMENT_ID};

/// Configuration for a [`SyncControlLoop`].
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Collection holding the flag document.
    pub collection: String,
    /// Id of the singleton flag document.
    pub document_id: String,
}

impl ControlConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            collection: FLAG_COLLECTION.to_string(),
            document_id: FLAG_DOCUMENT_ID.to_string(),
        }
    }

    /// Sets the flag collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the flag document id.
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = id.into();
        self
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters the loop maintains while observing.
#[derive(Debug, Clone, Default)]
pub struct ControlStats {
    /// Flag snapshots observed.
    pub snapshots_observed: u64,
    /// Engine start/stop transitions applied successfully.
    pub transitions_applied: u64,
    /// Engine start/stop transitions that failed.
    pub apply_failures: u64,
    /// Message of the most recent apply failure.
    pub last_apply_error: Option<String>,
}

/// One processed observation, published for waiters.
#[derive(Debug, Clone)]
struct Observation {
    value: bool,
    apply_failure: Option<(SyncAction, String)>,
}

/// Observes the persisted sync flag and converges the engine to it.
///
/// Start-up seeds the flag document (default disabled) if absent, then a
/// worker task drives a flag observation: each snapshot is decoded (no
/// rows reads as disabled), the engine is started or stopped to match,
/// and the value is republished on a replay-latest channel. Storage is
/// authoritative for the channel; a failed apply leaves the engine
/// temporarily diverged and is retried on the next snapshot.
pub struct SyncControlLoop<E: StoreEngine> {
    engine: Arc<E>,
    config: ControlConfig,
    state_rx: watch::Receiver<bool>,
    observations_rx: watch::Receiver<Option<Observation>>,
    stats: Arc<RwLock<ControlStats>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl<E: StoreEngine + 'static> SyncControlLoop<E> {
    /// Seeds the flag document, subscribes its observation, and spawns
    /// the worker.
    ///
    /// Must be called from within a tokio runtime. Registration failures
    /// are returned here; the loop never retries its own registration.
    pub fn start(engine: Arc<E>, config: ControlConfig) -> ControlResult<Self> {
        seed(engine.as_ref(), &config)?;

        let bridge = ObservationBridge::new(Arc::clone(&engine));
        let mut stream = bridge.subscribe::<SyncFlag>(&flag::select_query(
            &config.collection,
            &config.document_id,
        ))?;

        let (state_tx, state_rx) = watch::channel(false);
        let (observations_tx, observations_rx) = watch::channel(None);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(RwLock::new(ControlStats::default()));

        let worker_engine = Arc::clone(&engine);
        let worker_stats = Arc::clone(&stats);
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = stream.next() => match next {
                        Some(snapshot) => observe(
                            worker_engine.as_ref(),
                            &worker_stats,
                            &state_tx,
                            &observations_tx,
                            snapshot,
                        ),
                        None => {
                            debug!("flag stream ended, control loop stopping");
                            break;
                        }
                    },
                }
            }
            if let Err(disposal) = stream.close() {
                warn!(%disposal, "failed to release flag stream");
            }
        });

        Ok(Self {
            engine,
            config,
            state_rx,
            observations_rx,
            stats,
            shutdown_tx,
            worker: Some(worker),
        })
    }

    /// Replay-latest channel of the observed flag value.
    ///
    /// Starts at `false` until the first snapshot arrives; late
    /// subscribers immediately see the current value.
    pub fn state(&self) -> watch::Receiver<bool> {
        self.state_rx.clone()
    }

    /// The last observed flag value.
    pub fn current(&self) -> bool {
        *self.state_rx.borrow()
    }

    /// Writes the negation of the last observed value to the store.
    ///
    /// Returns the written value immediately; the engine changes only
    /// when the loop observes the write come back. Only write failures
    /// are reported here — apply failures surface through
    /// [`toggle_and_wait`](Self::toggle_and_wait) and
    /// [`stats`](Self::stats).
    pub fn toggle(&self) -> ControlResult<bool> {
        let next = !self.current();
        self.engine.execute(&flag::update_query(
            &self.config.collection,
            &self.config.document_id,
            next,
        ))?;
        debug!(enabled = next, "wrote sync flag");
        Ok(next)
    }

    /// Toggles and waits for the loop to observe the written value.
    ///
    /// Waits on the loop's own observation channel, not by polling the
    /// store. Returns the observed value, or the apply failure of that
    /// transition if starting/stopping the engine failed.
    pub async fn toggle_and_wait(&self) -> ControlResult<bool> {
        let mut observations = self.observations_rx.clone();
        // Only observations after the write count.
        let _ = observations.borrow_and_update();

        let written = self.toggle()?;
        loop {
            observations
                .changed()
                .await
                .map_err(|_| ControlError::Closed)?;
            let observation = observations.borrow_and_update().clone();
            let Some(observation) = observation else {
                continue;
            };
            if observation.value != written {
                continue;
            }
            return match observation.apply_failure {
                None => Ok(written),
                Some((action, message)) => Err(ControlError::Apply { action, message }),
            };
        }
    }

    /// A snapshot of the loop's counters.
    pub fn stats(&self) -> ControlStats {
        self.stats.read().clone()
    }

    /// The engine this loop governs.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Stops the worker and releases the flag observation.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl<E: StoreEngine> Drop for SyncControlLoop<E> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Ensures the flag document exists, defaulting to disabled.
///
/// Check-then-insert is deliberately non-transactional; a concurrent
/// first start may insert between the read and the write. The store's id
/// uniqueness turns that race into a duplicate rejection, which reads as
/// "another seeder won".
fn seed<E: StoreEngine>(engine: &E, config: &ControlConfig) -> ControlResult<()> {
    let existing = engine.execute(&flag::select_query(&config.collection, &config.document_id))?;
    if !existing.is_empty() {
        return Ok(());
    }

    match engine.execute(&flag::insert_default_query(
        &config.collection,
        &config.document_id,
    )) {
        Ok(_) => {
            info!(
                collection = %config.collection,
                id = %config.document_id,
                "seeded sync flag"
            );
            Ok(())
        }
        Err(error) if error.is_duplicate() => {
            debug!("sync flag already seeded by a concurrent start");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Processes one observed flag snapshot.
fn observe<E: StoreEngine>(
    engine: &E,
    stats: &RwLock<ControlStats>,
    state_tx: &watch::Sender<bool>,
    observations_tx: &watch::Sender<Option<Observation>>,
    snapshot: Snapshot<SyncFlag>,
) {
    let desired = flag::flag_value(&snapshot.items);

    let mut transitioned = false;
    let mut apply_failure = None;
    if engine.is_sync_active() != desired {
        let (action, result) = if desired {
            (SyncAction::Start, engine.start_sync())
        } else {
            (SyncAction::Stop, engine.stop_sync())
        };
        match result {
            Ok(()) => {
                info!(enabled = desired, "applied sync state");
                transitioned = true;
            }
            Err(source) => {
                error!(%action, %source, "failed to apply sync state");
                apply_failure = Some((action, source.to_string()));
            }
        }
    }

    {
        let mut stats = stats.write();
        stats.snapshots_observed += 1;
        if transitioned {
            stats.transitions_applied += 1;
        }
        if let Some((_, message)) = &apply_failure {
            stats.apply_failures += 1;
            stats.last_apply_error = Some(message.clone());
        }
    }

    // Storage is authoritative for the channel, applied or not.
    state_tx.send_replace(desired);
    observations_tx.send_replace(Some(Observation {
        value: desired,
        apply_failure,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_the_well_known_document() {
        let config = ControlConfig::default();
        assert_eq!(config.collection, "sync_state");
        assert_eq!(config.document_id, "sync_state");

        let config = ControlConfig::new()
            .with_collection("peer_sync")
            .with_document_id("flag-1");
        assert_eq!(config.collection, "peer_sync");
        assert_eq!(config.document_id, "flag-1");
    }

    #[test]
    fn stats_start_at_zero() {
        let stats = ControlStats::default();
        assert_eq!(stats.snapshots_observed, 0);
        assert_eq!(stats.transitions_applied, 0);
        assert_eq!(stats.apply_failures, 0);
        assert!(stats.last_apply_error.is_none());
    }
}
