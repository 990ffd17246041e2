//! User profiles, the durable identities records resolve to.
//!
//! A profile is created on first sighting of a new identity key and merged
//! when two profiles are discovered to represent the same person. Losing
//! merge sides are superseded, never dropped: their sequence number lands in
//! a redirect table so dependent records can be corrected later.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The reserved company for contributors with no known affiliation.
pub const INDEPENDENT: &str = "*independent";

/// The reserved company for automation accounts; their activity is filtered
/// out of most of the pipeline.
pub const ROBOTS: &str = "*robots";

// ─── Affiliation ─────────────────────────────────────────────────────────────

/// One affiliation interval: the profile belonged to `company_name` up to
/// `end_date` (unix seconds, exclusive). `end_date == 0` marks the open,
/// current interval; at most one interval per profile is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationSpan {
  pub company_name: String,
  pub end_date:     i64,
}

// ─── Core-reviewer seat ──────────────────────────────────────────────────────

/// A `(module, branch)` pair on which a profile is a recognized core
/// reviewer.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CoreSeat {
  pub module: String,
  pub branch: String,
}

// ─── Profile ─────────────────────────────────────────────────────────────────

/// A durable canonical identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  /// Canonical key; prefers an external handle over a raw email (see
  /// [`make_user_id`]).
  pub user_id: String,
  /// Internal sequence number; assigned by the store on first persist.
  /// Profiles are compared for sameness by this number.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub seq: Option<u64>,
  #[serde(default)]
  pub user_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub profile_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub review_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub translation_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub member_id: Option<String>,
  #[serde(default)]
  pub emails: BTreeSet<String>,
  /// Ordered, non-overlapping affiliation intervals; the open interval (if
  /// any) sorts last.
  #[serde(default)]
  pub companies: Vec<AffiliationSpan>,
  /// Core-reviewer seats; recomputed by the reconciliation pass.
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub core: BTreeSet<CoreSeat>,
  /// Profiles sourced from the curated reference catalog. Their affiliation
  /// history is trusted and never overwritten by inferred mappings.
  #[serde(default, rename = "static")]
  pub is_static: bool,
}

impl UserProfile {
  /// Whether the profile carries any durable identity key worth persisting.
  pub fn has_identity_key(&self) -> bool {
    self.profile_handle.is_some()
      || self.review_handle.is_some()
      || self.translation_handle.is_some()
      || self.member_id.is_some()
      || !self.emails.is_empty()
  }

  /// True when the affiliation history is the single open "independent"
  /// interval a fresh profile starts with.
  pub fn has_only_independent(&self) -> bool {
    self.companies.len() == 1
      && self.companies[0].end_date == 0
      && self.companies[0].company_name == INDEPENDENT
  }

  /// Sort affiliation intervals by `end_date` with the open interval last,
  /// and make sure the history ends with an open interval. Curated seed
  /// profiles often list only closed jobs; the trailing open interval is
  /// what unresolved dates fall into.
  pub fn normalize(&mut self) {
    self
      .companies
      .sort_by_key(|span| (span.end_date == 0, span.end_date));
    match self.companies.last() {
      Some(last) if last.end_date == 0 => {}
      _ => self.companies.push(AffiliationSpan {
        company_name: INDEPENDENT.to_string(),
        end_date:     0,
      }),
    }
    self.user_id = make_user_id(
      self.profile_handle.as_deref(),
      self.emails.iter().next().map(String::as_str),
      self.member_id.as_deref(),
      self.review_handle.as_deref(),
      self.translation_handle.as_deref(),
    );
  }

  /// The affiliation valid at `timestamp`: the first interval whose
  /// `end_date` strictly exceeds it, else the last (open) interval.
  ///
  /// A linear scan, not a bisect; intervals are few and the boundary rule
  /// must be exact.
  pub fn company_at(&self, timestamp: i64) -> &str {
    for span in &self.companies {
      if timestamp < span.end_date {
        return &span.company_name;
      }
    }
    self
      .companies
      .last()
      .map(|span| span.company_name.as_str())
      .unwrap_or(INDEPENDENT)
  }
}

/// Build the canonical user id from the available identity keys.
/// A member-directory id wins, then an external profile handle, then a raw
/// email address. Accounts known only through a review or translation
/// system fall back to that handle under a namespace prefix, so two
/// contributors never share an id just because neither has an email on
/// file.
pub fn make_user_id(
  profile_handle: Option<&str>,
  email: Option<&str>,
  member_id: Option<&str>,
  review_handle: Option<&str>,
  translation_handle: Option<&str>,
) -> String {
  if let Some(member) = member_id {
    return format!("member:{member}");
  }
  if let Some(id) = profile_handle.or(email) {
    return id.to_string();
  }
  if let Some(handle) = review_handle {
    return format!("review:{handle}");
  }
  if let Some(handle) = translation_handle {
    return format!("translation:{handle}");
  }
  String::new()
}
