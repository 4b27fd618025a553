//! # sequin-core
//!
//! Client-side coordination recipes for a ZooKeeper-style service:
//! a FIFO-fair distributed lock and a FIFO multi-consumer queue, built only
//! from sequential nodes, atomic deletes and one-shot watches. Ships with
//! an in-process, linearizable service over pluggable node storage.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock;
pub mod queue;
pub mod service;
pub mod signal;
pub mod types;

pub use error::{CodecError, CoordError, RecipeError};
pub use lock::FairLock;
pub use queue::DistributedQueue;

#[cfg(test)]
mod codec_test;
#[cfg(test)]
mod lock_test;
#[cfg(test)]
mod signal_test;
