//! [`RuntimeStore`], the shared incremental record store.
//!
//! Records live in a flat `record:{id}` namespace with a `primary_key →
//! record_id` side index held in memory (rebuilt by full scan on open).
//! Every write appends one entry to the `update:{n}` log; independent
//! consumers replay the log from their own cursor and therefore observe
//! every write at least once, in write order.
//!
//! Profiles fan out under `user:{key}`, one entry per known identity key
//! (sequence number, canonical id, handles, member id, every email), all
//! holding the same payload.

use std::collections::{BTreeSet, HashMap};

use serde::{Serialize, de::DeserializeOwned};
use tally_core::{kv::KvStore, profile::UserProfile, record::Record};
use tracing::debug;

use crate::{Error, Result};

/// How many records a replay fetches from the backend per round trip.
const BULK_READ_SIZE: usize = 64;

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
  Inserted,
  Updated,
  /// The merge handler reported no change; nothing was written.
  Unchanged,
}

/// A merge handler for [`RuntimeStore::upsert`]: fold `incoming` into
/// `existing` and report whether anything changed.
pub type MergeFn = dyn Fn(&mut Record, &Record) -> bool;

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct RuntimeStore<K> {
  kv:           K,
  primary_keys: HashMap<String, u64>,
}

impl<K: KvStore> RuntimeStore<K> {
  /// Open a store over `kv` and rebuild the primary-key index by full scan.
  pub fn open(kv: K) -> Result<Self> {
    let mut store = Self { kv, primary_keys: HashMap::new() };
    for record in store.all_records()? {
      store
        .primary_keys
        .insert(record.primary_key.clone(), record.record_id);
    }
    Ok(store)
  }

  pub fn into_inner(self) -> K {
    self.kv
  }

  // ── Generic JSON access ───────────────────────────────────────────────────

  pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.kv.get(key)? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    self.kv.set(key, &serde_json::to_vec(value)?)?;
    Ok(())
  }

  fn get_u64(&self, key: &str) -> Result<u64> {
    Ok(self.get_json(key)?.unwrap_or(0))
  }

  // ── Records ───────────────────────────────────────────────────────────────

  pub fn record_count(&self) -> Result<u64> {
    self.get_u64("record:count")
  }

  pub fn update_count(&self) -> Result<u64> {
    self.get_u64("update:count")
  }

  pub fn record(&self, record_id: u64) -> Result<Option<Record>> {
    self.get_json(&format!("record:{record_id}"))
  }

  pub fn record_by_primary_key(&self, primary_key: &str) -> Result<Option<Record>> {
    match self.primary_keys.get(primary_key) {
      Some(id) => self.record(*id),
      None => Ok(None),
    }
  }

  /// Insert or update one record.
  ///
  /// Known primary keys either replace the stored value outright or, when a
  /// merge handler is given, load the existing value, fold the incoming one
  /// into it, and write back only if the handler reports a change. Unknown
  /// primary keys get the next `record_id` and grow the index. Every
  /// successful write appends one update-log entry.
  pub fn upsert(
    &mut self,
    mut record: Record,
    merge: Option<&MergeFn>,
  ) -> Result<UpsertOutcome> {
    if let Some(&record_id) = self.primary_keys.get(&record.primary_key) {
      let outcome = match merge {
        None => {
          record.record_id = record_id;
          self.set_json(&format!("record:{record_id}"), &record)?;
          UpsertOutcome::Updated
        }
        Some(merge) => {
          let mut existing = self
            .record(record_id)?
            .ok_or_else(|| Error::UnknownRecord(record.primary_key.clone()))?;
          if !merge(&mut existing, &record) {
            return Ok(UpsertOutcome::Unchanged);
          }
          debug!(primary_key = %record.primary_key, "update record");
          self.set_json(&format!("record:{record_id}"), &existing)?;
          UpsertOutcome::Updated
        }
      };
      self.commit_update(record_id)?;
      return Ok(outcome);
    }

    let record_id = self.record_count()?;
    record.record_id = record_id;
    debug!(primary_key = %record.primary_key, record_id, "insert record");
    self.set_json(&format!("record:{record_id}"), &record)?;
    self.set_json("record:count", &(record_id + 1))?;
    self.primary_keys.insert(record.primary_key, record_id);
    self.commit_update(record_id)?;
    Ok(UpsertOutcome::Inserted)
  }

  /// Rewrite a record that already has a store-assigned id, logging the
  /// write. Used by the reconciliation pass, which only calls this for
  /// records whose derived fields actually changed.
  pub fn write_back(&mut self, record: &Record) -> Result<()> {
    if !self.primary_keys.contains_key(&record.primary_key) {
      return Err(Error::UnknownRecord(record.primary_key.clone()));
    }
    self.set_json(&format!("record:{}", record.record_id), record)?;
    self.commit_update(record.record_id)
  }

  /// Out-of-band correction of specific fields on a stored record, bypassing
  /// normal merge logic. Unknown primary keys are skipped. Returns whether a
  /// write (and log entry) happened.
  pub fn apply_patch(
    &mut self,
    primary_key: &str,
    overrides: &serde_json::Map<String, serde_json::Value>,
  ) -> Result<bool> {
    let Some(&record_id) = self.primary_keys.get(primary_key) else {
      return Ok(false);
    };
    let key = format!("record:{record_id}");
    let Some(mut stored) = self.get_json::<serde_json::Value>(&key)? else {
      return Ok(false);
    };

    let mut changed = false;
    if let Some(fields) = stored.as_object_mut() {
      for (field, value) in overrides {
        if fields.get(field) != Some(value) {
          fields.insert(field.clone(), value.clone());
          changed = true;
        }
      }
    }

    if changed {
      debug!(primary_key, "patch record");
      self.set_json(&key, &stored)?;
      self.commit_update(record_id)?;
    }
    Ok(changed)
  }

  /// Every record currently stored, in `record_id` order, fetched in
  /// [`BULK_READ_SIZE`] batches.
  pub fn all_records(&self) -> Result<Vec<Record>> {
    let count = self.record_count()?;
    self.fetch_records((0..count).collect())
  }

  fn fetch_records(&self, record_ids: Vec<u64>) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(record_ids.len());
    for chunk in record_ids.chunks(BULK_READ_SIZE) {
      let keys: Vec<String> =
        chunk.iter().map(|id| format!("record:{id}")).collect();
      for bytes in self.kv.get_multi(&keys)?.into_iter().flatten() {
        records.push(serde_json::from_slice(&bytes)?);
      }
    }
    Ok(records)
  }

  fn commit_update(&self, record_id: u64) -> Result<()> {
    let count = self.update_count()?;
    self.set_json(&format!("update:{count}"), &record_id)?;
    self.set_json("update:count", &(count + 1))?;
    Ok(())
  }

  // ── Consumer replay ───────────────────────────────────────────────────────

  /// Replay everything written since `consumer`'s last read and advance its
  /// cursor. A consumer with no recorded cursor bootstraps with the full
  /// record set. Records overwritten between two reads may be observed more
  /// than once (at-least-once, never missing).
  pub fn read_since(&mut self, consumer: &str) -> Result<Vec<Record>> {
    let cursor: Option<u64> = self.get_json(&format!("consumer:{consumer}"))?;
    let head = self.update_count()?;

    let records = match cursor {
      None => self.all_records()?,
      Some(cursor) => {
        // Resolve log entries to record ids, keeping write order but
        // dropping repeats of the same record within this replay.
        let mut seen = BTreeSet::new();
        let mut record_ids = Vec::new();
        for chunk_start in (cursor..head).step_by(BULK_READ_SIZE) {
          let chunk_end = (chunk_start + BULK_READ_SIZE as u64).min(head);
          let keys: Vec<String> =
            (chunk_start..chunk_end).map(|n| format!("update:{n}")).collect();
          for bytes in self.kv.get_multi(&keys)?.into_iter().flatten() {
            let record_id: u64 = serde_json::from_slice(&bytes)?;
            if seen.insert(record_id) {
              record_ids.push(record_id);
            }
          }
        }
        self.fetch_records(record_ids)?
      }
    };

    // The cursor advances only once the batch is fully materialized; a
    // failed replay retries the same range on the next read.
    self.set_json(&format!("consumer:{consumer}"), &head)?;
    self.register_consumer(consumer)?;
    Ok(records)
  }

  fn register_consumer(&self, consumer: &str) -> Result<()> {
    let mut consumers: BTreeSet<String> =
      self.get_json("consumers")?.unwrap_or_default();
    if consumers.insert(consumer.to_string()) {
      self.set_json("consumers", &consumers)?;
    }
    Ok(())
  }

  /// Drop consumers not in `active` and truncate the update log up to the
  /// minimum cursor among the remaining ones. Never truncates past an active
  /// consumer's position.
  pub fn gc(&mut self, active: &[String]) -> Result<()> {
    let stored: BTreeSet<String> =
      self.get_json("consumers")?.unwrap_or_default();
    for consumer in &stored {
      if !active.contains(consumer) {
        debug!(consumer, "drop inactive consumer");
        self.kv.delete(&format!("consumer:{consumer}"))?;
      }
    }
    self.set_json(
      "consumers",
      &active.iter().cloned().collect::<BTreeSet<_>>(),
    )?;

    let mut min_update = self.update_count()?;
    for consumer in active {
      if let Some(cursor) =
        self.get_json::<u64>(&format!("consumer:{consumer}"))?
      {
        min_update = min_update.min(cursor);
      }
    }

    let first_valid = self.get_u64("first-valid-update")?;
    let stale: Vec<String> =
      (first_valid..min_update).map(|n| format!("update:{n}")).collect();
    self.kv.delete_multi(&stale)?;
    self.set_json("first-valid-update", &min_update)?;
    Ok(())
  }

  // ── Per-source cursors ────────────────────────────────────────────────────

  /// The last seen head id for a source connector, e.g. a head commit hash.
  pub fn last_id(&self, source_key: &str) -> Result<Option<String>> {
    self.get_json(&format!("last:{source_key}"))
  }

  pub fn set_last_id(&self, source_key: &str, head: &str) -> Result<()> {
    self.set_json(&format!("last:{source_key}"), &head)
  }

  // ── Profiles ──────────────────────────────────────────────────────────────

  /// Persist a profile under every identity key it carries. A profile
  /// without a sequence number gets the next one first.
  pub fn store_profile(&mut self, profile: &mut UserProfile) -> Result<()> {
    let seq = match profile.seq {
      Some(seq) => seq,
      None => {
        let seq = self.get_u64("user:count")?;
        self.set_json("user:count", &(seq + 1))?;
        profile.seq = Some(seq);
        seq
      }
    };

    let mut keys = vec![format!("user:{seq}")];
    if !profile.user_id.is_empty() {
      keys.push(format!("user:{}", profile.user_id));
    }
    for handle in [
      &profile.profile_handle,
      &profile.review_handle,
      &profile.translation_handle,
    ]
    .into_iter()
    .flatten()
    {
      keys.push(format!("user:{handle}"));
    }
    if let Some(member_id) = &profile.member_id {
      keys.push(format!("user:member:{member_id}"));
    }
    for email in &profile.emails {
      keys.push(format!("user:{email}"));
    }

    let payload = serde_json::to_vec(profile)?;
    let entries: Vec<(String, Vec<u8>)> =
      keys.into_iter().map(|k| (k, payload.clone())).collect();
    self.kv.set_multi(&entries)?;
    Ok(())
  }

  /// Look up a profile by any identity key (email, handle, canonical id).
  pub fn profile_by_key(&self, key: &str) -> Result<Option<UserProfile>> {
    self.get_json(&format!("user:{key}"))
  }

  pub fn profile_by_seq(&self, seq: u64) -> Result<Option<UserProfile>> {
    self.get_json(&format!("user:{seq}"))
  }

  pub fn profile_by_member_id(
    &self,
    member_id: &str,
  ) -> Result<Option<UserProfile>> {
    self.get_json(&format!("user:member:{member_id}"))
  }

  /// Retire the losing side of a merge: its sequence-number entry goes away,
  /// and its canonical id is recorded in the redirect table so dependent
  /// records can be corrected by the reconciliation pass.
  pub fn supersede_profile(
    &mut self,
    loser: &UserProfile,
    winner_user_id: &str,
  ) -> Result<()> {
    if let Some(seq) = loser.seq {
      self.kv.delete(&format!("user:{seq}"))?;
    }
    if !loser.user_id.is_empty() && loser.user_id != winner_user_id {
      let mut redirects = self.redirects()?;
      redirects.insert(loser.user_id.clone(), winner_user_id.to_string());
      self.set_json("redirects", &redirects)?;
    }
    Ok(())
  }

  /// Record that records stamped with `old_user_id` should be re-pointed at
  /// `new_user_id` by the next reconciliation pass.
  pub fn add_redirect(
    &mut self,
    old_user_id: &str,
    new_user_id: &str,
  ) -> Result<()> {
    let mut redirects = self.redirects()?;
    redirects.insert(old_user_id.to_string(), new_user_id.to_string());
    self.set_json("redirects", &redirects)
  }

  /// Pending user-id redirects produced by profile merges.
  pub fn redirects(&self) -> Result<HashMap<String, String>> {
    Ok(self.get_json("redirects")?.unwrap_or_default())
  }

  pub fn clear_redirects(&mut self) -> Result<()> {
    self.kv.delete("redirects")?;
    Ok(())
  }
}
