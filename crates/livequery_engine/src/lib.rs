//! # LiveQuery Engine
//!
//! The store-engine capability seam for LiveQuery.
//!
//! This crate provides:
//! - The [`StoreEngine`] trait: the narrow surface the observation bridge
//!   and the sync control loop use to talk to an underlying store/sync
//!   engine (register/unregister subscriptions and observers, execute
//!   statements, start/stop sync)
//! - The query data model: [`Query`], [`ResultSet`], observer events
//! - [`MemoryEngine`]: an in-process engine for tests and demos
//!
//! ## Statement dialect
//!
//! [`MemoryEngine`] accepts exactly the statements live-query consumers
//! issue; anything else is rejected up front as malformed:
//!
//! ```text
//! SELECT * FROM <collection> [WHERE <cond>] [ORDER BY <field>]
//! INSERT INTO <collection> [INITIAL] DOCUMENTS (:<param>)
//! UPDATE <collection> SET <field> = :<param> [WHERE <cond>]
//!
//! <cond> ::= <term> [AND <term>]...
//! <term> ::= <field> = :<param> | NOT <field>
//! ```
//!
//! `INITIAL` inserts are idempotent first-run seeding: an existing
//! document with the same `_id` wins untouched.
//!
//! ## Delivery model
//!
//! Observer callbacks run on an engine-internal dispatch thread, never on
//! the thread that performed the mutation. Deliveries to one observer are
//! ordered; each carries a full result snapshot, not a diff. Callbacks
//! must not block and may call back into the engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod memory;
mod query;
mod store;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use memory::MemoryEngine;
pub use query::{Query, ResultSet};
pub use store::{ObserverCallback, ObserverEvent, ObserverToken, StoreEngine, SubscriptionToken};
