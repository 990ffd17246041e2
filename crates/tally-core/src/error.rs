//! Error types for `tally-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A failure raised by a key-value backend. The concrete backend error is
  /// boxed so the trait stays object-safe across storage technologies.
  #[error("storage backend error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("malformed date in seed data: {0:?}")]
  SeedDate(String),
}

impl Error {
  /// Wrap an arbitrary backend error into [`Error::Storage`].
  pub fn storage<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
