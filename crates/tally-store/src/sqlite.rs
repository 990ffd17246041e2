//! [`SqliteKv`], the SQLite implementation of the key-value seam.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension as _};
use tally_core::{Error as CoreError, Result, kv::KvStore};

use crate::schema::SCHEMA;

/// A key-value store backed by a single SQLite file.
///
/// Safe for one writer process; independent reader processes may open their
/// own connections (WAL mode keeps readers unblocked).
pub struct SqliteKv {
  conn: Connection,
}

impl SqliteKv {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).map_err(CoreError::storage)?;
    Self::init(conn)
  }

  /// Open an in-memory database for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(CoreError::storage)?;
    Self::init(conn)
  }

  fn init(conn: Connection) -> Result<Self> {
    conn.execute_batch(SCHEMA).map_err(CoreError::storage)?;
    Ok(Self { conn })
  }
}

impl KvStore for SqliteKv {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self
      .conn
      .query_row(
        "SELECT value FROM kv WHERE key = ?1",
        rusqlite::params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(CoreError::storage)
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
      )
      .map_err(CoreError::storage)?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self
      .conn
      .execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])
      .map_err(CoreError::storage)?;
    Ok(())
  }

  fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
    let mut stmt = self
      .conn
      .prepare_cached("SELECT value FROM kv WHERE key = ?1")
      .map_err(CoreError::storage)?;

    keys
      .iter()
      .map(|key| {
        stmt
          .query_row(rusqlite::params![key], |row| row.get(0))
          .optional()
          .map_err(CoreError::storage)
      })
      .collect()
  }
}
