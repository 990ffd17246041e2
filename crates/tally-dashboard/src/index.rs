//! The rebuildable secondary-index set.

use std::collections::{BTreeMap, HashMap, HashSet};

use tally_core::{
  kv::KvStore,
  record::{Record, RecordKind},
};
use tally_store::{Result, RuntimeStore};
use tracing::debug;

/// Per-field secondary indices over the current record set.
///
/// Built by replay, kept current by applying the store's update stream. An
/// update for an already-known record removes its old index memberships
/// before adding the new ones, so a record whose module or identity was
/// rewritten never lingers under the stale value.
#[derive(Debug, Default)]
pub struct MemoryIndex {
  records:      HashMap<u64, Record>,
  primary_keys: HashMap<String, u64>,

  pub(crate) by_kind:    HashMap<RecordKind, HashSet<u64>>,
  pub(crate) by_module:  HashMap<String, HashSet<u64>>,
  pub(crate) by_user:    HashMap<String, HashSet<u64>>,
  pub(crate) by_company: HashMap<String, HashSet<u64>>,
  pub(crate) by_release: HashMap<String, HashSet<u64>>,
  /// Day bucket, ordered so time ranges can walk it.
  pub(crate) by_day: BTreeMap<i64, HashSet<u64>>,
  /// Feature-request back-references: feature id to mentioning records.
  pub(crate) by_feature: HashMap<String, HashSet<u64>>,
  pub(crate) by_module_release: HashMap<(String, String), HashSet<u64>>,

  /// Companies index under their lowercased name; this keeps the original
  /// casing for display.
  company_display: HashMap<String, String>,
}

impl MemoryIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drain the store's update stream into the index. The first call on a
  /// fresh cursor replays the full record set.
  pub fn sync<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    consumer: &str,
  ) -> Result<usize> {
    let records = store.read_since(consumer)?;
    let applied = records.len();
    for record in records {
      self.apply(record);
    }
    debug!(consumer, applied, total = self.len(), "index synced");
    Ok(applied)
  }

  /// Build from a full scan of the record set. Unlike [`sync`], this never
  /// registers a consumer or moves a replay cursor, so it is the right call
  /// for one-shot reporting processes.
  ///
  /// [`sync`]: MemoryIndex::sync
  pub fn rebuild<K: KvStore>(
    &mut self,
    store: &RuntimeStore<K>,
  ) -> Result<usize> {
    let records = store.all_records()?;
    let applied = records.len();
    for record in records {
      self.apply(record);
    }
    debug!(applied, total = self.len(), "index rebuilt");
    Ok(applied)
  }

  /// Index one record, replacing any previously-indexed version of it.
  /// Returns whether the record was already known.
  pub fn apply(&mut self, record: Record) -> bool {
    let known = match self.records.get(&record.record_id) {
      Some(old) => {
        let old = old.clone();
        self.unindex(&old);
        true
      }
      None => false,
    };
    self.index(&record);
    self.primary_keys.insert(record.primary_key.clone(), record.record_id);
    self.records.insert(record.record_id, record);
    known
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn record(&self, record_id: u64) -> Option<&Record> {
    self.records.get(&record_id)
  }

  /// Point lookup for parent/child traversal, e.g. a mark finding its
  /// review.
  pub fn by_primary_key(&self, primary_key: &str) -> Option<&Record> {
    self
      .primary_keys
      .get(primary_key)
      .and_then(|id| self.records.get(id))
  }

  /// Every record mentioning the given feature request.
  pub fn records_for_feature(&self, feature_id: &str) -> Vec<&Record> {
    let mut out: Vec<&Record> = self
      .by_feature
      .get(feature_id)
      .into_iter()
      .flatten()
      .filter_map(|id| self.records.get(id))
      .collect();
    out.sort_by_key(|r| (r.date, r.record_id));
    out
  }

  /// The company name as stamped on records, given any casing.
  pub fn company_display(&self, company: &str) -> Option<&str> {
    self
      .company_display
      .get(&company.to_lowercase())
      .map(String::as_str)
  }

  pub(crate) fn records_map(&self) -> &HashMap<u64, Record> {
    &self.records
  }

  fn index(&mut self, record: &Record) {
    let id = record.record_id;
    self.by_kind.entry(record.kind()).or_default().insert(id);
    self
      .by_module
      .entry(record.module.clone())
      .or_default()
      .insert(id);
    self
      .by_user
      .entry(record.user_id.clone())
      .or_default()
      .insert(id);
    let company_key = record.company_name.to_lowercase();
    self
      .company_display
      .entry(company_key.clone())
      .or_insert_with(|| record.company_name.clone());
    self.by_company.entry(company_key).or_default().insert(id);
    self
      .by_release
      .entry(record.release.clone())
      .or_default()
      .insert(id);
    self.by_day.entry(record.day()).or_default().insert(id);
    for feature in &record.feature_refs {
      self.by_feature.entry(feature.clone()).or_default().insert(id);
    }
    self
      .by_module_release
      .entry((record.module.clone(), record.release.clone()))
      .or_default()
      .insert(id);
  }

  fn unindex(&mut self, record: &Record) {
    let id = record.record_id;
    remove(&mut self.by_kind, &record.kind(), id);
    remove(&mut self.by_module, &record.module, id);
    remove(&mut self.by_user, &record.user_id, id);
    remove(&mut self.by_company, &record.company_name.to_lowercase(), id);
    remove(&mut self.by_release, &record.release, id);
    if let Some(set) = self.by_day.get_mut(&record.day()) {
      set.remove(&id);
      if set.is_empty() {
        self.by_day.remove(&record.day());
      }
    }
    for feature in &record.feature_refs {
      remove(&mut self.by_feature, feature, id);
    }
    remove(
      &mut self.by_module_release,
      &(record.module.clone(), record.release.clone()),
      id,
    );
    self.primary_keys.remove(&record.primary_key);
  }
}

/// Drop empty buckets so index keys track the live record set.
fn remove<K, Q>(index: &mut HashMap<K, HashSet<u64>>, key: &Q, id: u64)
where
  K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
  Q: std::hash::Hash + Eq + ?Sized,
{
  if let Some(set) = index.get_mut(key) {
    set.remove(&id);
    if set.is_empty() {
      index.remove(key);
    }
  }
}
