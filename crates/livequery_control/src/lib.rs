//! # LiveQuery Control
//!
//! A sync control loop whose on/off state lives inside the store it
//! controls.
//!
//! The loop persists a boolean flag as a singleton document, observes it
//! through a live query, and starts or stops the engine's replication to
//! match what it sees. Toggling writes the flag rather than touching the
//! engine; the change takes effect when the loop's own observer sees the
//! write come back through the store. That detour is the point: any
//! process with write access to the store toggles sync for every
//! observer of the flag, and engine state is always a function of the
//! persisted value.
//!
//! Updates to the flag are last-writer-wins; the loop only reacts to the
//! latest snapshot it observes and never assumes it is the sole writer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod control;
mod error;
mod flag;

pub use control::{ControlConfig, ControlStats, SyncControlLoop};
pub use error::{ControlError, ControlResult, SyncAction};
pub use flag::{SyncFlag, FLAG_COLLECTION, FLAG_DOCUMENT_ID, FLAG_FIELD};
