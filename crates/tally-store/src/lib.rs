//! Shared incremental store for the tally pipeline.
//!
//! A durable keyed record space with an append-only update log and
//! per-consumer replay cursors, written against the [`tally_core::kv::KvStore`]
//! seam. Two backends ship here: an in-memory map and a single-file SQLite
//! table.

mod memkv;
mod runtime;
mod schema;
mod sqlite;

pub mod error;

pub use error::{Error, Result};
pub use memkv::MemKv;
pub use runtime::{RuntimeStore, UpsertOutcome};
pub use sqlite::SqliteKv;
