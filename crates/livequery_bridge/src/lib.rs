//! # LiveQuery Bridge
//!
//! Turns push-style live-query callbacks into cancellable, latest-value
//! snapshot streams.
//!
//! A store engine delivers query results by invoking a registered
//! callback on one of its own threads, possibly reentrantly and possibly
//! racing the consumer's teardown. This crate adapts that surface into
//! something consumers can hold: [`ObservationBridge::subscribe`] returns
//! a [`SnapshotStream`] that
//!
//! - decodes rows into a typed [`Snapshot`], skipping (and reporting)
//!   rows that fail to decode,
//! - conflates undrained deliveries to the newest one — a slow consumer
//!   sees fresh state, never a backlog,
//! - releases its paired engine registrations exactly once, on `close`
//!   or drop, with no consumer-visible delivery after disposal.
//!
//! [`TaskProjection`] and [`TaskStore`] are a small worked consumer over
//! a task collection, showing the broader-subscription/narrower-observer
//! split the bridge supports.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod error;
mod handle;
mod projection;
mod stream;

pub use bridge::{BridgeConfig, ObservationBridge};
pub use error::{BridgeError, BridgeResult, DecodeError, DisposalError};
pub use handle::QueryObserverHandle;
pub use projection::{Task, TaskProjection, TaskStore, TASKS_COLLECTION};
pub use stream::{Snapshot, SnapshotStream};
