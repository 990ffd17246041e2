//! The tally ingestion pipeline.
//!
//! Raw source-shaped records flow through the normalizer (one arm per record
//! kind), the identity resolver (profile lookup, merging, affiliation
//! stamping), and the release assigner, then land in the shared incremental
//! store. After each cycle the reconciliation pass sweeps the full store and
//! repairs derived and denormalized fields.

pub mod error;
pub mod identity;
pub mod lookup;
pub mod normalizer;
pub mod pipeline;
pub mod raw;
pub mod reconciler;
pub mod seed;

pub use error::{Error, Result};
pub use pipeline::{CycleStats, Pipeline, ProcessStats};

#[cfg(test)]
mod tests;
