//! Error type for `tally-processor`.
//!
//! Per-record data-quality problems are never surfaced here; they degrade to
//! "unknown identity" or drop the record. Only storage failures propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("store error: {0}")]
  Store(#[from] tally_store::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
