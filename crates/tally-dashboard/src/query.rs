//! Conjunctive filter queries and grouped aggregates.

use std::collections::{BTreeMap, HashSet};

use tally_core::{
  record::{Payload, Record, RecordKind},
  time::timestamp_to_day,
};

use crate::MemoryIndex;

/// A conjunction of field constraints. Unset fields match everything; the
/// time range is inclusive-below, exclusive-above.
#[derive(Debug, Clone, Default)]
pub struct Filter {
  pub kind:    Option<RecordKind>,
  pub module:  Option<String>,
  pub release: Option<String>,
  pub user_id: Option<String>,
  /// Matched case-insensitively.
  pub company: Option<String>,
  pub since:   Option<i64>,
  pub until:   Option<i64>,
}

/// The grouping key for aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
  Company,
  Module,
  UserId,
  Release,
  Kind,
  Week,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupStats {
  pub count: u64,
  /// Summed lines of change, from commit records in the group.
  pub loc: u64,
  /// Summed translated words, from translation records in the group.
  pub words: u64,
}

impl MemoryIndex {
  /// All records matching the filter, ordered by date then record id.
  pub fn query(&self, filter: &Filter) -> Vec<&Record> {
    let mut out: Vec<&Record> = match self.candidates(filter) {
      Some(ids) => ids.iter().filter_map(|id| self.record(*id)).collect(),
      None => self.records_map().values().collect(),
    };
    out.retain(|record| in_time_range(record, filter));
    out.sort_by_key(|r| (r.date, r.record_id));
    out
  }

  /// Per-group counts and sums over the records matching the filter.
  pub fn aggregate(
    &self,
    filter: &Filter,
    group_by: GroupBy,
  ) -> BTreeMap<String, GroupStats> {
    let mut groups: BTreeMap<String, GroupStats> = BTreeMap::new();
    for record in self.query(filter) {
      let key = match group_by {
        GroupBy::Company => record.company_name.clone(),
        GroupBy::Module => record.module.clone(),
        GroupBy::UserId => record.user_id.clone(),
        GroupBy::Release => record.release.clone(),
        GroupBy::Kind => record.kind().as_str().to_string(),
        GroupBy::Week => record.week.to_string(),
      };
      let stats = groups.entry(key).or_default();
      stats.count += 1;
      match &record.payload {
        Payload::Commit { loc, .. } => stats.loc += loc,
        Payload::Translation { words, .. } => stats.words += words,
        _ => {}
      }
    }
    groups
  }

  /// Intersect the per-field id sets the filter names. `None` means the
  /// filter constrains no indexed field and every record is a candidate.
  fn candidates(&self, filter: &Filter) -> Option<HashSet<u64>> {
    let empty = HashSet::new();
    let mut sets: Vec<&HashSet<u64>> = Vec::new();

    // module ∧ release hits the composite index instead of two lookups
    match (&filter.module, &filter.release) {
      (Some(module), Some(release)) => sets.push(
        self
          .by_module_release
          .get(&(module.clone(), release.clone()))
          .unwrap_or(&empty),
      ),
      (Some(module), None) => {
        sets.push(self.by_module.get(module).unwrap_or(&empty))
      }
      (None, Some(release)) => {
        sets.push(self.by_release.get(release).unwrap_or(&empty))
      }
      (None, None) => {}
    }
    if let Some(kind) = &filter.kind {
      sets.push(self.by_kind.get(kind).unwrap_or(&empty));
    }
    if let Some(user_id) = &filter.user_id {
      sets.push(self.by_user.get(user_id).unwrap_or(&empty));
    }
    if let Some(company) = &filter.company {
      sets.push(
        self.by_company.get(&company.to_lowercase()).unwrap_or(&empty),
      );
    }

    // A pure time-range query walks the day index instead of scanning
    // everything; exact boundaries are still enforced per record.
    if sets.is_empty() {
      if filter.since.is_none() && filter.until.is_none() {
        return None;
      }
      let lo = filter.since.map(timestamp_to_day).unwrap_or(i64::MIN);
      let hi = filter
        .until
        .map(|until| timestamp_to_day(until - 1))
        .unwrap_or(i64::MAX);
      return Some(
        self
          .by_day
          .range(lo..=hi)
          .flat_map(|(_, ids)| ids.iter().copied())
          .collect(),
      );
    }

    sets.sort_by_key(|set| set.len());
    let (first, rest) = sets.split_first()?;
    Some(
      first
        .iter()
        .copied()
        .filter(|id| rest.iter().all(|set| set.contains(id)))
        .collect(),
    )
  }
}

fn in_time_range(record: &Record, filter: &Filter) -> bool {
  if let Some(since) = filter.since {
    if record.date < since {
      return false;
    }
  }
  if let Some(until) = filter.until {
    if record.date >= until {
      return false;
    }
  }
  true
}
