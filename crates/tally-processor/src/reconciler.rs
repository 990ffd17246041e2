//! The post-processing reconciliation pass.
//!
//! A full sweep over all stored records, run after each ingestion cycle. It
//! repairs denormalized identity fields left stale by profile merges and
//! affiliation changes, recomputes derived aggregates (feature mention
//! counts, per-user review sequence numbers, core-reviewer seats), flags
//! reviewer disagreement, and prunes dangling feature back-references. Only
//! records whose fields actually changed are written back.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tally_core::{
  kv::KvStore,
  profile::{CoreSeat, ROBOTS, UserProfile},
  record::{Payload, Record},
};
use tally_store::RuntimeStore;
use tracing::{debug, info};

use crate::{Result, identity::DomainMap};

/// Trailing window within which extreme votes grant a core-reviewer seat.
const CORE_WINDOW_SECS: i64 = 90 * 24 * 3600;

/// The absolute vote value considered "extreme" (full approval/rejection).
const CORE_VOTE: i32 = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileStats {
  pub scanned:     usize,
  pub rewritten:   usize,
  pub pruned_refs: usize,
}

pub struct Reconciler<'a> {
  domains: &'a DomainMap,
  now:     i64,
}

#[derive(Debug, Default)]
struct MentionStats {
  count:     u64,
  last_date: i64,
}

impl<'a> Reconciler<'a> {
  pub fn new(domains: &'a DomainMap) -> Self {
    Self { domains, now: Utc::now().timestamp() }
  }

  /// Pin "now" (the core-reviewer window end) for tests.
  pub fn with_now(domains: &'a DomainMap, now: i64) -> Self {
    Self { domains, now }
  }

  pub fn run<K: KvStore>(
    &self,
    store: &mut RuntimeStore<K>,
    updated_users: &HashSet<String>,
  ) -> Result<ReconcileStats> {
    let records = store.all_records()?;
    let mut stats =
      ReconcileStats { scanned: records.len(), ..Default::default() };

    let mentions = collect_mentions(&records);
    let valid_features = collect_valid_features(&records);
    let review_numbers = number_reviews(&records);
    let core_seats = self.collect_core_seats(&records);
    let disagreements = flag_disagreements(&records, &core_seats);
    let redirects = store.redirects()?;

    self.update_profiles(store, &records, &core_seats)?;

    for mut record in records {
      let mut changed = false;

      // Merge/affiliation repair on denormalized identity fields.
      let target = redirects.get(&record.user_id);
      if target.is_some() || updated_users.contains(&record.user_id) {
        let user_id = target.cloned().unwrap_or_else(|| record.user_id.clone());
        if let Some(profile) = store.profile_by_key(&user_id)? {
          changed |= self.restamp(&mut record, &profile);
        }
      }

      // Dangling feature back-references are pruned, not errors.
      let before = record.feature_refs.len();
      record.feature_refs.retain(|id| {
        let keep = valid_features.contains(id);
        if !keep {
          debug!(primary_key = %record.primary_key, feature = %id, "prune dangling feature ref");
        }
        keep
      });
      if record.feature_refs.len() != before {
        stats.pruned_refs += before - record.feature_refs.len();
        changed = true;
      }

      changed |= update_derived(
        &mut record,
        &mentions,
        &review_numbers,
        &disagreements,
      );

      if changed {
        store.write_back(&record)?;
        stats.rewritten += 1;
      }
    }

    store.clear_redirects()?;
    info!(
      scanned = stats.scanned,
      rewritten = stats.rewritten,
      "reconciliation pass complete"
    );
    Ok(stats)
  }

  /// Re-stamp identity fields from a (possibly redirected) profile.
  fn restamp(&self, record: &mut Record, profile: &UserProfile) -> bool {
    let mut changed = false;

    if record.user_id != profile.user_id {
      record.user_id = profile.user_id.clone();
      changed = true;
    }
    if !profile.user_name.is_empty() && record.author_name != profile.user_name
    {
      record.author_name = profile.user_name.clone();
      changed = true;
    }

    let mut company = profile.company_at(record.date).to_string();
    if !profile.is_static && company != ROBOTS {
      if let Some(mapped) =
        self.domains.company_for_email(&record.author_email)
      {
        company = mapped.to_string();
      }
    }
    if record.company_name != company {
      debug!(
        primary_key = %record.primary_key,
        company,
        "update record affiliation"
      );
      record.company_name = company;
      changed = true;
    }

    changed
  }

  /// Seats granted by extreme votes inside the trailing window.
  fn collect_core_seats(
    &self,
    records: &[Record],
  ) -> HashMap<String, HashSet<CoreSeat>> {
    let cutoff = self.now - CORE_WINDOW_SECS;
    let mut seats: HashMap<String, HashSet<CoreSeat>> = HashMap::new();
    for record in records {
      if let Payload::Mark { value, .. } = &record.payload {
        if record.date >= cutoff && value.abs() >= CORE_VOTE {
          seats.entry(record.user_id.clone()).or_default().insert(CoreSeat {
            module: record.module.clone(),
            branch: record.branch.clone(),
          });
        }
      }
    }
    seats
  }

  /// Write recomputed core seats back onto profiles that changed.
  fn update_profiles<K: KvStore>(
    &self,
    store: &mut RuntimeStore<K>,
    records: &[Record],
    core_seats: &HashMap<String, HashSet<CoreSeat>>,
  ) -> Result<()> {
    let user_ids: HashSet<&str> =
      records.iter().map(|r| r.user_id.as_str()).collect();
    for user_id in user_ids {
      if user_id.is_empty() {
        continue;
      }
      let Some(mut profile) = store.profile_by_key(user_id)? else {
        continue;
      };
      let seats: std::collections::BTreeSet<CoreSeat> = core_seats
        .get(user_id)
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();
      if profile.core != seats {
        profile.core = seats;
        store.store_profile(&mut profile)?;
      }
    }
    Ok(())
  }
}

// ─── Derived aggregates ──────────────────────────────────────────────────────

fn collect_mentions(records: &[Record]) -> HashMap<String, MentionStats> {
  let mut mentions: HashMap<String, MentionStats> = HashMap::new();
  for record in records {
    for feature in &record.feature_refs {
      let entry = mentions.entry(feature.clone()).or_default();
      entry.count += 1;
      entry.last_date = entry.last_date.max(record.date);
    }
  }
  mentions
}

fn collect_valid_features(records: &[Record]) -> HashSet<String> {
  records
    .iter()
    .filter_map(|record| match &record.payload {
      Payload::DraftedFeature { feature_id, .. } => Some(feature_id.clone()),
      _ => None,
    })
    .collect()
}

/// Each submitter's reviews ordered by date; the Nth review carries number N.
fn number_reviews(records: &[Record]) -> HashMap<String, u64> {
  let mut per_user: BTreeMap<&str, Vec<(i64, &str)>> = BTreeMap::new();
  for record in records {
    if matches!(record.payload, Payload::Review { .. }) {
      per_user
        .entry(record.user_id.as_str())
        .or_default()
        .push((record.date, record.primary_key.as_str()));
    }
  }

  let mut numbers = HashMap::new();
  for (_, mut reviews) in per_user {
    reviews.sort();
    for (n, (_, primary_key)) in reviews.into_iter().enumerate() {
      numbers.insert(primary_key.to_string(), n as u64 + 1);
    }
  }
  numbers
}

/// For every `(review, patch)` pair, the earliest mark cast by a recognized
/// core reviewer for that module/branch fixes a reference sign; every later
/// mark whose sign opposes it is flagged.
fn flag_disagreements(
  records: &[Record],
  core_seats: &HashMap<String, HashSet<CoreSeat>>,
) -> HashMap<String, bool> {
  let mut per_patch: HashMap<(String, u32), Vec<&Record>> = HashMap::new();
  for record in records {
    if let Payload::Mark { review_id, patch_number, .. } = &record.payload {
      per_patch
        .entry((review_id.clone(), *patch_number))
        .or_default()
        .push(record);
    }
  }

  let mut flags = HashMap::new();
  for (_, mut marks) in per_patch {
    marks.sort_by(|a, b| {
      (a.date, &a.primary_key).cmp(&(b.date, &b.primary_key))
    });

    let mut reference = 0i32;
    for mark in marks {
      let Payload::Mark { value, .. } = &mark.payload else {
        unreachable!("per_patch only holds marks");
      };
      if reference == 0 {
        flags.insert(mark.primary_key.clone(), false);
        let is_core = core_seats
          .get(&mark.user_id)
          .is_some_and(|seats| {
            seats.contains(&CoreSeat {
              module: mark.module.clone(),
              branch: mark.branch.clone(),
            })
          });
        if is_core {
          reference = *value;
        }
        continue;
      }
      let opposes =
        (reference < 0 && *value > 0) || (reference > 0 && *value < 0);
      flags.insert(mark.primary_key.clone(), opposes);
    }
  }
  flags
}

fn update_derived(
  record: &mut Record,
  mentions: &HashMap<String, MentionStats>,
  review_numbers: &HashMap<String, u64>,
  disagreements: &HashMap<String, bool>,
) -> bool {
  match &mut record.payload {
    Payload::DraftedFeature { feature_id, mention_count, mention_date } => {
      let stats = mentions.get(feature_id);
      let (count, date) =
        stats.map(|s| (s.count, s.last_date)).unwrap_or((0, 0));
      if *mention_count != count || *mention_date != date {
        *mention_count = count;
        *mention_date = date;
        return true;
      }
      false
    }
    Payload::Review { review_number, .. } => {
      let number = review_numbers.get(&record.primary_key).copied();
      if *review_number != number {
        *review_number = number;
        return true;
      }
      false
    }
    Payload::Mark { disagreement, .. } => {
      let flag = disagreements
        .get(&record.primary_key)
        .copied()
        .unwrap_or(false);
      if *disagreement != flag {
        *disagreement = flag;
        return true;
      }
      false
    }
    _ => false,
  }
}
