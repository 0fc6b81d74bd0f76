//! Latest-value snapshot streams.
//!
//! A [`SnapshotStream`] adapts an engine observer callback into an async
//! pull surface. The channel between them is a single watch slot: an
//! undrained snapshot is overwritten by a newer one, so a slow consumer
//! sees the freshest state instead of a growing backlog. Consumers that
//! need every intermediate state should not observe through this type.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use livequery_engine::{ObserverCallback, ObserverEvent, ObserverToken, StoreEngine, SubscriptionToken};

use crate::error::{DecodeError, DisposalError};
use crate::handle::QueryObserverHandle;

/// One decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Strictly increasing per stream, starting at 1.
    pub sequence: u64,
    /// Decoded rows in engine order, minus rows that failed to decode.
    pub items: Vec<T>,
}

/// What the watch slot currently holds.
pub(crate) enum SlotState<T> {
    /// Nothing delivered yet.
    Empty,
    /// The latest delivery; may or may not have been consumed.
    Delivered(Snapshot<T>),
    /// The engine rescinded the registration. `last` carries the final
    /// delivery so a consumer that had not drained it yet still sees it
    /// exactly once.
    Terminated {
        last: Option<Snapshot<T>>,
        reason: String,
    },
}

pub(crate) struct ForwarderParts<T> {
    pub(crate) callback: ObserverCallback,
    pub(crate) slot: watch::Receiver<SlotState<T>>,
    pub(crate) gate: Arc<AtomicBool>,
    pub(crate) diagnostics: mpsc::Receiver<DecodeError>,
}

/// Builds the engine-facing callback and the channel endpoints a stream
/// consumes.
///
/// The gate cuts deliveries off at close: once set, the callback drops
/// events on the floor, so nothing written by a racing delivery becomes
/// visible through a stream that has already been disposed.
pub(crate) fn forwarder_parts<T>(diagnostics_capacity: usize) -> ForwarderParts<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let (slot_tx, slot_rx) = watch::channel(SlotState::Empty);
    let (diag_tx, diag_rx) = mpsc::channel(diagnostics_capacity);
    let gate = Arc::new(AtomicBool::new(false));
    let sequence = AtomicU64::new(0);

    let callback_gate = Arc::clone(&gate);
    let callback: ObserverCallback = Arc::new(move |event| {
        if callback_gate.load(Ordering::SeqCst) {
            return;
        }
        match event {
            ObserverEvent::Snapshot(rows) => {
                let sequence = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let mut items = Vec::with_capacity(rows.len());
                for (row_index, row) in rows.iter().enumerate() {
                    match serde_json::from_value::<T>(row.clone()) {
                        Ok(item) => items.push(item),
                        Err(source) => {
                            let failure = DecodeError {
                                sequence,
                                row_index,
                                source,
                            };
                            warn!(%failure, "skipping row that failed to decode");
                            match diag_tx.try_send(failure) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    trace!("diagnostics channel full, dropping decode failure");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {}
                            }
                        }
                    }
                }
                slot_tx.send_modify(|slot| *slot = SlotState::Delivered(Snapshot { sequence, items }));
            }
            ObserverEvent::Rescinded { reason } => {
                debug!(%reason, "observation rescinded by engine");
                slot_tx.send_modify(|slot| {
                    let last = match std::mem::replace(slot, SlotState::Empty) {
                        SlotState::Delivered(snapshot) => Some(snapshot),
                        SlotState::Terminated { last, .. } => last,
                        SlotState::Empty => None,
                    };
                    *slot = SlotState::Terminated { last, reason };
                });
            }
        }
    });

    ForwarderParts {
        callback,
        slot: slot_rx,
        gate,
        diagnostics: diag_rx,
    }
}

/// A cancellable, latest-value stream of decoded query snapshots.
///
/// Produced by [`ObservationBridge::subscribe`]. Dropping the stream
/// releases its engine registrations; [`close`](Self::close) does the same
/// but reports release failures.
///
/// [`ObservationBridge::subscribe`]: crate::ObservationBridge::subscribe
pub struct SnapshotStream<T, E: StoreEngine> {
    handle: QueryObserverHandle<E>,
    slot: watch::Receiver<SlotState<T>>,
    gate: Arc<AtomicBool>,
    diagnostics: Option<mpsc::Receiver<DecodeError>>,
    consumed: u64,
    finished: bool,
}

enum Step<T> {
    Yield(Snapshot<T>),
    Finish(Option<Snapshot<T>>),
    Wait,
}

impl<T, E> SnapshotStream<T, E>
where
    T: Clone,
    E: StoreEngine,
{
    pub(crate) fn new(handle: QueryObserverHandle<E>, parts: ForwarderParts<T>) -> Self {
        Self {
            handle,
            slot: parts.slot,
            gate: parts.gate,
            diagnostics: Some(parts.diagnostics),
            consumed: 0,
            finished: false,
        }
    }

    /// Waits for the next snapshot not yet seen by this stream.
    ///
    /// Intermediate snapshots overwritten before this call are gone; only
    /// the latest is returned. Returns `None` once the stream has been
    /// closed, or after the final flush when the engine rescinded the
    /// registration.
    pub async fn next(&mut self) -> Option<Snapshot<T>> {
        loop {
            if self.finished {
                return None;
            }

            let step = {
                let slot = self.slot.borrow_and_update();
                match &*slot {
                    SlotState::Empty => Step::Wait,
                    SlotState::Delivered(snapshot) if snapshot.sequence > self.consumed => {
                        Step::Yield(snapshot.clone())
                    }
                    SlotState::Delivered(_) => Step::Wait,
                    SlotState::Terminated { last, .. } => Step::Finish(last.clone()),
                }
            };

            match step {
                Step::Yield(snapshot) => {
                    self.consumed = snapshot.sequence;
                    return Some(snapshot);
                }
                Step::Finish(last) => {
                    self.finished = true;
                    match last {
                        Some(snapshot) if snapshot.sequence > self.consumed => {
                            self.consumed = snapshot.sequence;
                            return Some(snapshot);
                        }
                        _ => return None,
                    }
                }
                Step::Wait => {
                    if self.slot.changed().await.is_err() {
                        // Forwarder gone without a terminal event.
                        self.finished = true;
                        return None;
                    }
                }
            }
        }
    }

    /// Peeks at the latest snapshot without consuming it.
    ///
    /// Returns `None` before the first delivery and after the stream is
    /// closed.
    pub fn latest(&self) -> Option<Snapshot<T>> {
        if self.finished {
            return None;
        }
        match &*self.slot.borrow() {
            SlotState::Delivered(snapshot) => Some(snapshot.clone()),
            SlotState::Terminated { last, .. } => last.clone(),
            SlotState::Empty => None,
        }
    }

    /// Closes the stream and releases its engine registrations.
    ///
    /// No snapshot is observable through this stream once `close` returns.
    /// Idempotent; only the first call performs the release.
    pub fn close(&mut self) -> Result<(), DisposalError> {
        self.finished = true;
        self.gate.store(true, Ordering::SeqCst);
        self.handle.close()
    }

    /// Takes the decode-diagnostics receiver.
    ///
    /// Rows that fail to decode are skipped in snapshots and reported
    /// here. The channel is bounded; failures beyond its capacity are
    /// dropped. Returns `None` if already taken.
    pub fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<DecodeError>> {
        self.diagnostics.take()
    }

    /// The subscription token backing this stream.
    pub fn subscription_token(&self) -> SubscriptionToken {
        self.handle.subscription_token()
    }

    /// The observer token backing this stream.
    pub fn observer_token(&self) -> ObserverToken {
        self.handle.observer_token()
    }
}

impl<T, E: StoreEngine> Drop for SnapshotStream<T, E> {
    fn drop(&mut self) {
        self.gate.store(true, Ordering::SeqCst);
        if let Err(error) = self.handle.close() {
            warn!(%error, "failed to release observation handle on drop");
        }
    }
}
