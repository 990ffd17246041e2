//! Curated reference data: companies and their domains, releases, project
//! repositories, and pre-seeded static profiles.
//!
//! Seed values are human-entered and get normalized on load: dates parse to
//! unix seconds, names lowercase where they act as keys, affiliation spans
//! sort with the open interval last.

use std::collections::HashMap;

use serde::Deserialize;
use tally_core::{
  kv::KvStore,
  profile::{AffiliationSpan, UserProfile},
  release::{Release, ReleaseTable},
  time::date_to_timestamp,
};
use tally_store::RuntimeStore;
use tracing::info;

use crate::{Result, identity::DomainMap, normalizer::Normalizer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
  #[serde(default)]
  pub companies: Vec<CompanySeed>,
  #[serde(default)]
  pub users: Vec<UserSeed>,
  #[serde(default)]
  pub releases: Vec<ReleaseSeed>,
  #[serde(default)]
  pub repos: Vec<RepoSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanySeed {
  pub company_name: String,
  #[serde(default)]
  pub domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
  pub user_name: String,
  #[serde(default)]
  pub profile_handle: Option<String>,
  #[serde(default)]
  pub review_handle: Option<String>,
  #[serde(default)]
  pub emails: Vec<String>,
  #[serde(default)]
  pub companies: Vec<SpanSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpanSeed {
  pub company_name: String,
  /// Human date (`2014-Sep-08`); absent means the open, current interval.
  #[serde(default)]
  pub end_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseSeed {
  pub release_name: String,
  /// Human date; the last release may use `now` or any far-future date.
  pub end_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoSeed {
  pub module: String,
  /// Former names of a renamed project; all map to `module`.
  #[serde(default)]
  pub aliases: Vec<String>,
}

impl SeedData {
  pub fn from_json(bytes: &[u8]) -> Result<Self> {
    Ok(serde_json::from_slice(bytes)?)
  }

  pub fn domain_map(&self) -> DomainMap {
    let mut domains = HashMap::new();
    for company in &self.companies {
      for domain in &company.domains {
        domains.insert(domain.clone(), company.company_name.clone());
      }
    }
    DomainMap::new(domains)
  }

  pub fn release_table(&self) -> Result<ReleaseTable> {
    let mut releases = Vec::with_capacity(self.releases.len());
    for seed in &self.releases {
      releases.push(Release {
        release_name: seed.release_name.clone(),
        end_date:     date_to_timestamp(&seed.end_date)?,
      });
    }
    Ok(ReleaseTable::new(releases))
  }

  pub fn normalizer(&self) -> Normalizer {
    let modules = self.repos.iter().map(|r| r.module.clone()).collect();
    let mut aliases = HashMap::new();
    for repo in &self.repos {
      for alias in &repo.aliases {
        aliases.insert(alias.clone(), repo.module.clone());
      }
    }
    Normalizer::new(modules, aliases)
  }

  /// Persist the curated profiles, marked static so inferred mappings never
  /// overwrite their affiliation history. An already-stored profile keeps
  /// its sequence number and any emails learned since the last seeding.
  pub fn seed_profiles<K: KvStore>(
    &self,
    store: &mut RuntimeStore<K>,
  ) -> Result<usize> {
    let mut seeded = 0;
    for seed in &self.users {
      let mut profile = UserProfile {
        user_name: seed.user_name.clone(),
        profile_handle: seed.profile_handle.clone(),
        review_handle: seed.review_handle.clone(),
        emails: seed.emails.iter().map(|e| e.to_lowercase()).collect(),
        is_static: true,
        ..Default::default()
      };
      for span in &seed.companies {
        profile.companies.push(AffiliationSpan {
          company_name: span.company_name.clone(),
          end_date:     span
            .end_date
            .as_deref()
            .map(date_to_timestamp)
            .transpose()?
            .unwrap_or(0),
        });
      }
      profile.normalize();

      if let Some(existing) = store.profile_by_key(&profile.user_id)? {
        profile.seq = existing.seq;
        profile.emails.extend(existing.emails);
        profile.core = existing.core;
      }

      store.store_profile(&mut profile)?;
      seeded += 1;
    }
    info!(seeded, "seeded curated profiles");
    Ok(seeded)
  }
}
