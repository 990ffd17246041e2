//! The ingestion pipeline: raw records in, canonical stored records out.
//!
//! One cycle normalizes a batch, resolves identities, stamps releases, and
//! upserts into the shared store, then runs the reconciliation pass so
//! derived fields and merge fallout settle before any consumer reads.

use std::collections::HashSet;

use tally_core::{
  kv::KvStore,
  profile::ROBOTS,
  record::{Payload, Record},
  release::ReleaseTable,
};
use tally_store::{RuntimeStore, UpsertOutcome};
use tracing::{debug, info};

use crate::{
  Result,
  identity::{DomainMap, Resolver},
  lookup::IdentityLookup,
  normalizer::Normalizer,
  raw::RawRecord,
  reconciler::{ReconcileStats, Reconciler},
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStats {
  pub inserted:  usize,
  pub updated:   usize,
  pub unchanged: usize,
  pub dropped:   usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
  pub process:   ProcessStats,
  pub reconcile: ReconcileStats,
}

pub struct Pipeline<'a> {
  normalizer: &'a Normalizer,
  domains:    &'a DomainMap,
  releases:   &'a ReleaseTable,
  lookup:     &'a dyn IdentityLookup,
}

impl<'a> Pipeline<'a> {
  pub fn new(
    normalizer: &'a Normalizer,
    domains: &'a DomainMap,
    releases: &'a ReleaseTable,
    lookup: &'a dyn IdentityLookup,
  ) -> Self {
    Self { normalizer, domains, releases, lookup }
  }

  /// Ingest one batch. Returns the stats together with the set of canonical
  /// ids whose affiliation or id changed, which the reconciliation pass
  /// needs.
  pub fn process<K: KvStore>(
    &self,
    store: &mut RuntimeStore<K>,
    batch: impl IntoIterator<Item = RawRecord>,
  ) -> Result<(ProcessStats, HashSet<String>)> {
    let mut stats = ProcessStats::default();
    let mut resolver = Resolver::new(self.domains, self.lookup);

    for raw in batch {
      for canonical in self.normalizer.normalize(raw) {
        let mut record = canonical.record;
        resolver.resolve_and_stamp(store, &mut record, &canonical.signals)?;
        record.release = self.releases.assign(record.date).to_string();

        // Automation accounts leave no statistics trail, except that their
        // review activity stays visible as review/patch plumbing.
        if record.company_name == ROBOTS
          && !matches!(
            record.payload,
            Payload::Review { .. } | Payload::Patch { .. }
          )
        {
          debug!(primary_key = %record.primary_key, "drop robot record");
          stats.dropped += 1;
          continue;
        }

        match store.upsert(record, Some(&merge_fresh))? {
          UpsertOutcome::Inserted => stats.inserted += 1,
          UpsertOutcome::Updated => stats.updated += 1,
          UpsertOutcome::Unchanged => stats.unchanged += 1,
        }
      }
    }

    info!(
      inserted = stats.inserted,
      updated = stats.updated,
      unchanged = stats.unchanged,
      dropped = stats.dropped,
      "batch processed"
    );
    Ok((stats, resolver.updated_users))
  }

  /// One full ingestion cycle: process the batch, then reconcile.
  pub fn run_cycle<K: KvStore>(
    &self,
    store: &mut RuntimeStore<K>,
    batch: impl IntoIterator<Item = RawRecord>,
  ) -> Result<CycleStats> {
    let (process, updated_users) = self.process(store, batch)?;
    let reconcile =
      Reconciler::new(self.domains).run(store, &updated_users)?;
    Ok(CycleStats { process, reconcile })
  }
}

/// Merge a re-ingested record over its stored version. Store-assigned and
/// reconciler-owned fields survive; everything else comes from the fresh
/// record. Reports whether the stored value changed.
pub fn merge_fresh(existing: &mut Record, incoming: &Record) -> bool {
  let mut fresh = incoming.clone();
  fresh.record_id = existing.record_id;

  match (&mut fresh.payload, &existing.payload) {
    (
      Payload::Review { review_number, .. },
      Payload::Review { review_number: stored, .. },
    ) => *review_number = *stored,
    (
      Payload::Mark { disagreement, .. },
      Payload::Mark { disagreement: stored, .. },
    ) => *disagreement = *stored,
    (
      Payload::DraftedFeature { mention_count, mention_date, .. },
      Payload::DraftedFeature {
        mention_count: stored_count,
        mention_date: stored_date,
        ..
      },
    ) => {
      *mention_count = *stored_count;
      *mention_date = *stored_date;
    }
    _ => {}
  }

  if *existing == fresh {
    return false;
  }
  *existing = fresh;
  true
}
