//! Error type for `tally-store`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A write-back addressed a record the store has never seen.
  #[error("unknown record: {0:?}")]
  UnknownRecord(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
