//! The key-value store seam.
//!
//! The incremental store is written against this small interface so the
//! backing technology (in-memory map, SQLite file, distributed cache) can be
//! swapped without touching resolver or store logic.

use crate::Result;

/// A flat byte-oriented key-value store.
///
/// Multi-key operations exist so backends with a network round-trip per call
/// can batch them; the in-memory backend simply loops.
pub trait KvStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  fn set(&self, key: &str, value: &[u8]) -> Result<()>;

  fn delete(&self, key: &str) -> Result<()>;

  /// Fetch several keys at once; the result is positionally aligned with
  /// `keys`, with `None` for absent entries.
  fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
    keys.iter().map(|key| self.get(key)).collect()
  }

  fn set_multi(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
    for (key, value) in entries {
      self.set(key, value)?;
    }
    Ok(())
  }

  fn delete_multi(&self, keys: &[String]) -> Result<()> {
    for key in keys {
      self.delete(key)?;
    }
    Ok(())
  }
}
