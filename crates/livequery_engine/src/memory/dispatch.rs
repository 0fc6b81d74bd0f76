//! Background delivery of observer snapshots.
//!
//! A single dispatcher thread drains a FIFO queue of work items, so every
//! observer sees its deliveries in order and no callback ever runs on the
//! thread that performed the mutation. No store lock is held while a
//! callback runs; callbacks may call back into the engine.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::query::ResultSet;
use crate::store::{ObserverCallback, ObserverEvent, ObserverToken};

use super::Inner;

/// Work items for the dispatcher thread.
pub(super) enum DispatchEvent {
    /// A collection committed a mutation; re-deliver affected observers.
    CollectionChanged(String),
    /// A newly registered observer needs its initial snapshot.
    ObserverAdded(ObserverToken),
    /// Deliver a terminal rescind to a callback.
    Rescind {
        /// The callback to notify; carried directly because the registry
        /// entry is already gone by the time this is processed.
        callback: ObserverCallback,
        /// Why the registration ended.
        reason: String,
    },
    /// Acknowledge once every prior event has been processed.
    Flush(Sender<()>),
    /// Stop the thread.
    Shutdown,
}

pub(super) struct Dispatcher {
    events: Sender<DispatchEvent>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(super) fn spawn(inner: Arc<Inner>, queue: Receiver<DispatchEvent>) -> Self {
        let events = inner.events.clone();
        let thread = thread::spawn(move || run(&inner, &queue));
        Self {
            events,
            thread: Some(thread),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.events.send(DispatchEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(inner: &Inner, queue: &Receiver<DispatchEvent>) {
    while let Ok(event) = queue.recv() {
        match event {
            DispatchEvent::Shutdown => break,
            DispatchEvent::Flush(ack) => {
                let _ = ack.send(());
            }
            DispatchEvent::CollectionChanged(collection) => {
                let affected: Vec<ObserverToken> = {
                    let observers = inner.observers.read();
                    observers
                        .iter()
                        .filter(|(_, entry)| entry.select.collection == collection)
                        .map(|(token, _)| *token)
                        .collect()
                };
                for token in affected {
                    deliver_snapshot(inner, token);
                }
            }
            DispatchEvent::ObserverAdded(token) => deliver_snapshot(inner, token),
            DispatchEvent::Rescind { callback, reason } => {
                callback(ObserverEvent::Rescinded { reason });
            }
        }
    }
    debug!("dispatcher stopped");
}

/// Evaluates one observer's query and invokes its callback.
///
/// The registry is re-checked here so an observer unregistered while the
/// event sat in the queue never fires.
fn deliver_snapshot(inner: &Inner, token: ObserverToken) {
    let entry = {
        let observers = inner.observers.read();
        observers
            .get(&token)
            .map(|entry| (entry.callback.clone(), entry.select.clone(), entry.params.clone()))
    };

    if let Some((callback, select, params)) = entry {
        match inner.select_rows(&select, &params) {
            Ok(rows) => callback(ObserverEvent::Snapshot(ResultSet::new(rows))),
            Err(error) => warn!(%token, %error, "observer snapshot evaluation failed"),
        }
    }
}
