//! Identity resolution and affiliation tracking.
//!
//! The resolver is an explicit context object constructed once per ingestion
//! run and threaded through calls; there is no hidden global state. Per
//! record it resolves (or creates) the author's profile, merges duplicates
//! discovered along the way, and stamps the record with the canonical id and
//! the affiliation valid at the record's timestamp.

use std::collections::HashMap;

use tally_core::{
  kv::KvStore,
  profile::{AffiliationSpan, INDEPENDENT, ROBOTS, UserProfile},
  record::Record,
  time::{email_domain, is_valid_email},
};
use tally_store::RuntimeStore;
use tracing::debug;

use crate::{
  Result,
  lookup::IdentityLookup,
  normalizer::Signals,
};

// ─── Domain map ──────────────────────────────────────────────────────────────

/// The curated `email domain → company` mapping.
#[derive(Debug, Clone, Default)]
pub struct DomainMap {
  domains: HashMap<String, String>,
}

impl DomainMap {
  pub fn new(domains: HashMap<String, String>) -> Self {
    let domains = domains
      .into_iter()
      .map(|(domain, company)| (domain.to_lowercase(), company))
      .collect();
    Self { domains }
  }

  /// Longest-suffix lookup: `mxw.nes.nec.co.jp` matches a mapped
  /// `nec.co.jp` before any shorter suffix would. Suffixes shorter than two
  /// labels are never consulted.
  pub fn company_for_email(&self, email: &str) -> Option<&str> {
    let domain = email_domain(email)?.to_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    for take in (2..=labels.len()).rev() {
      let suffix = labels[labels.len() - take..].join(".");
      if let Some(company) = self.domains.get(&suffix) {
        return Some(company);
      }
    }
    None
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub struct Resolver<'a> {
  domains: &'a DomainMap,
  lookup:  &'a dyn IdentityLookup,
  /// Canonical ids whose affiliation changed during this run; the
  /// reconciliation pass re-stamps their already-stored records.
  pub updated_users: std::collections::HashSet<String>,
}

impl<'a> Resolver<'a> {
  pub fn new(domains: &'a DomainMap, lookup: &'a dyn IdentityLookup) -> Self {
    Self {
      domains,
      lookup,
      updated_users: std::collections::HashSet::new(),
    }
  }

  /// Resolve the author of a record to a single profile, creating or merging
  /// profiles as needed, then stamp the record's identity fields.
  pub fn resolve_and_stamp<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    record: &mut Record,
    signals: &Signals,
  ) -> Result<UserProfile> {
    let profile = self.resolve(store, signals)?;
    self.stamp(record, &profile);
    Ok(profile)
  }

  pub fn resolve<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    signals: &Signals,
  ) -> Result<UserProfile> {
    let email = signals
      .email
      .as_deref()
      .filter(|e| is_valid_email(e))
      .map(str::to_lowercase);
    let mut profile_handle = signals.profile_handle.clone();
    let mut name_hint = signals.name_hint.clone();

    let by_email = match &email {
      Some(email) => store.profile_by_key(email)?,
      None => None,
    };

    // Out-of-band discovery: an email we have never seen and no handle on
    // the record. A lookup failure is just a missing signal.
    if by_email.is_none() && profile_handle.is_none() {
      if let Some(email) = &email {
        if let Some(remote) = self.lookup.lookup_by_email(email) {
          debug!(email, handle = %remote.handle, "email mapped to external profile");
          name_hint.get_or_insert(remote.display_name);
          profile_handle = Some(remote.handle);
        }
      }
    }

    // Gather every profile the signals point at, deduplicated by sequence
    // number.
    let mut candidates: Vec<UserProfile> = Vec::new();
    let push = |candidate: Option<UserProfile>,
                    candidates: &mut Vec<UserProfile>| {
      if let Some(candidate) = candidate {
        if !candidates.iter().any(|c| c.seq == candidate.seq) {
          candidates.push(candidate);
        }
      }
    };

    push(by_email, &mut candidates);
    for key in [
      &profile_handle,
      &signals.review_handle,
      &signals.translation_handle,
    ]
    .into_iter()
    .flatten()
    {
      push(store.profile_by_key(key)?, &mut candidates);
    }
    if let Some(member_id) = &signals.member_id {
      push(store.profile_by_member_id(member_id)?, &mut candidates);
    }

    let mut profile = if candidates.len() > 1 {
      self.merge_profiles(store, candidates)?
    } else if let Some(only) = candidates.pop() {
      only
    } else {
      self.create_profile(
        store,
        email.as_deref(),
        profile_handle.as_deref(),
        signals,
        name_hint.as_deref(),
      )?
    };

    self.enrich_profile(
      store,
      &mut profile,
      email.as_deref(),
      profile_handle.as_deref(),
      signals,
    )?;

    Ok(profile)
  }

  /// Stamp the record's denormalized identity fields from the resolved
  /// profile.
  pub fn stamp(&self, record: &mut Record, profile: &UserProfile) {
    record.user_id = profile.user_id.clone();
    if !profile.user_name.is_empty() {
      record.author_name = profile.user_name.clone();
    }

    let mut company = profile.company_at(record.date).to_string();
    // A live email domain is stronger evidence than a possibly-stale curated
    // history, but curated (static) profiles are trusted as-is.
    if !profile.is_static && company != ROBOTS {
      if let Some(mapped) = self.domains.company_for_email(&record.author_email)
      {
        company = mapped.to_string();
      }
    }
    record.company_name = company;
  }

  // ── Creation ──────────────────────────────────────────────────────────────

  fn create_profile<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    email: Option<&str>,
    profile_handle: Option<&str>,
    signals: &Signals,
    name_hint: Option<&str>,
  ) -> Result<UserProfile> {
    let company = signals
      .company_hint
      .clone()
      .or_else(|| {
        email
          .and_then(|e| self.domains.company_for_email(e))
          .map(str::to_string)
      })
      .unwrap_or_else(|| INDEPENDENT.to_string());

    let user_name = name_hint
      .map(str::to_string)
      .or_else(|| {
        profile_handle.and_then(|handle| self.lookup.lookup_by_handle(handle))
      })
      .unwrap_or_default();

    let mut profile = UserProfile {
      user_name,
      profile_handle: profile_handle.map(str::to_string),
      review_handle: signals.review_handle.clone(),
      translation_handle: signals.translation_handle.clone(),
      member_id: signals.member_id.clone(),
      emails: email.map(str::to_string).into_iter().collect(),
      companies: vec![AffiliationSpan {
        company_name: company,
        end_date:     0,
      }],
      ..Default::default()
    };
    profile.normalize();
    debug!(user_id = %profile.user_id, "create profile");

    if profile.has_identity_key() {
      store.store_profile(&mut profile)?;
    }
    Ok(profile)
  }

  // ── Merging ───────────────────────────────────────────────────────────────

  /// Merge duplicate profiles into one. The survivor takes the union of
  /// identity keys, emails, and core seats; a curated affiliation history
  /// beats an inferred one, and any real history beats the single
  /// "independent" placeholder. Losing persisted profiles are superseded and
  /// leave a redirect behind.
  fn merge_profiles<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    candidates: Vec<UserProfile>,
  ) -> Result<UserProfile> {
    let mut merged = UserProfile::default();

    // Affiliation history: first curated one wins, else first real history,
    // else whatever the first candidate has.
    let history_donor = candidates
      .iter()
      .find(|c| c.is_static)
      .or_else(|| candidates.iter().find(|c| !c.has_only_independent()))
      .unwrap_or(&candidates[0]);
    merged.companies = history_donor.companies.clone();
    merged.is_static = candidates.iter().any(|c| c.is_static);

    for candidate in &candidates {
      if merged.user_name.is_empty() {
        merged.user_name = candidate.user_name.clone();
      }
      merge_key(&mut merged.profile_handle, &candidate.profile_handle);
      merge_key(&mut merged.review_handle, &candidate.review_handle);
      merge_key(&mut merged.translation_handle, &candidate.translation_handle);
      merge_key(&mut merged.member_id, &candidate.member_id);
      merged.emails.extend(candidate.emails.iter().cloned());
      merged.core.extend(candidate.core.iter().cloned());
    }

    // The survivor keeps the smallest persisted sequence number.
    merged.seq = candidates.iter().filter_map(|c| c.seq).min();
    merged.normalize();

    for candidate in &candidates {
      if candidate.seq != merged.seq {
        debug!(
          loser = %candidate.user_id,
          winner = %merged.user_id,
          "supersede duplicate profile"
        );
        store.supersede_profile(candidate, &merged.user_id)?;
      } else if candidate.user_id != merged.user_id {
        // Same profile, renamed canonical id.
        store.supersede_profile(candidate, &merged.user_id)?;
      }
      if candidate.user_id != merged.user_id {
        self.updated_users.insert(merged.user_id.clone());
      }
    }

    store.store_profile(&mut merged)?;
    Ok(merged)
  }

  // ── Enrichment ────────────────────────────────────────────────────────────

  /// Fold any new identity signals into an already-resolved profile and
  /// apply the one-time independent-to-known affiliation promotion.
  fn enrich_profile<K: KvStore>(
    &mut self,
    store: &mut RuntimeStore<K>,
    profile: &mut UserProfile,
    email: Option<&str>,
    profile_handle: Option<&str>,
    signals: &Signals,
  ) -> Result<()> {
    let mut changed = false;

    if let Some(email) = email {
      if profile.emails.insert(email.to_string()) {
        debug!(user_id = %profile.user_id, email, "add email to profile");
        changed = true;
      }
    }
    changed |= merge_key_str(&mut profile.profile_handle, profile_handle);
    changed |=
      merge_key(&mut profile.review_handle, &signals.review_handle);
    changed |= merge_key(
      &mut profile.translation_handle,
      &signals.translation_handle,
    );
    changed |= merge_key(&mut profile.member_id, &signals.member_id);

    // One-time promotion: a lone open "independent" interval on a non-curated
    // profile is rewritten when the email domain maps to a known company.
    if !profile.is_static && profile.has_only_independent() {
      if let Some(company) = email.and_then(|e| self.domains.company_for_email(e))
      {
        if company != INDEPENDENT {
          debug!(user_id = %profile.user_id, company, "promote affiliation");
          profile.companies[0].company_name = company.to_string();
          self.updated_users.insert(profile.user_id.clone());
          changed = true;
        }
      }
    }

    if changed {
      let old_user_id = profile.user_id.clone();
      profile.normalize();
      if !old_user_id.is_empty() && old_user_id != profile.user_id {
        // Gaining a stronger identity key renames the canonical id; records
        // stamped with the old id are corrected by the reconciliation pass.
        store.add_redirect(&old_user_id, &profile.user_id)?;
        self.updated_users.insert(profile.user_id.clone());
      }
      store.store_profile(profile)?;
    }
    Ok(())
  }
}

fn merge_key(slot: &mut Option<String>, incoming: &Option<String>) -> bool {
  if slot.is_none() && incoming.is_some() {
    *slot = incoming.clone();
    return true;
  }
  false
}

fn merge_key_str(slot: &mut Option<String>, incoming: Option<&str>) -> bool {
  if slot.is_none() && incoming.is_some() {
    *slot = incoming.map(str::to_string);
    return true;
  }
  false
}
