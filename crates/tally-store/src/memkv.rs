//! In-memory key-value backend for tests and one-shot runs.

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard},
};

use tally_core::{Result, kv::KvStore};

/// A [`KvStore`] over a plain map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemKv {
  entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemKv {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
    // a poisoned map of bytes is still a map of bytes
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl KvStore for MemKv {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.entries().get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    self.entries().insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.entries().remove(key);
    Ok(())
  }
}
