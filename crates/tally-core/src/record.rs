//! Record types, the fundamental unit of the tally pipeline.
//!
//! A record is one normalized contribution event. Exactly one record exists
//! per `primary_key`; updates replace the stored value in place and never
//! create duplicates.

use serde::{Deserialize, Serialize};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// The closed set of record kinds the pipeline understands.
///
/// A new kind added here must be handled everywhere the compiler points at;
/// there is intentionally no catch-all variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
  Commit,
  Review,
  Mark,
  Patch,
  Email,
  DraftedFeature,
  CompletedFeature,
  FiledIssue,
  ResolvedIssue,
  Translation,
  Member,
  CiVote,
}

impl RecordKind {
  /// The discriminant string used as an index key and in seed/report data.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Commit => "commit",
      Self::Review => "review",
      Self::Mark => "mark",
      Self::Patch => "patch",
      Self::Email => "email",
      Self::DraftedFeature => "drafted-feature",
      Self::CompletedFeature => "completed-feature",
      Self::FiledIssue => "filed-issue",
      Self::ResolvedIssue => "resolved-issue",
      Self::Translation => "translation",
      Self::Member => "member",
      Self::CiVote => "ci-vote",
    }
  }
}

// ─── Per-kind payloads ───────────────────────────────────────────────────────

/// The kind-specific payload of a record. The variant determines the record's
/// [`RecordKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
  Commit {
    lines_added:   u64,
    lines_deleted: u64,
    /// Total lines of change; denormalized at normalization time.
    loc:           u64,
  },
  Review {
    review_id: String,
    open:      bool,
    /// This submitter's Nth review ever; stamped by the reconciliation pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    review_number: Option<u64>,
  },
  Mark {
    review_id:    String,
    patch_number: u32,
    /// Vote category as reported by the review system, e.g. "Code-Review".
    category:     String,
    value:        i32,
    /// Set by the reconciliation pass when this vote opposes the reference
    /// core-reviewer vote on the same patch.
    #[serde(default)]
    disagreement: bool,
  },
  Patch {
    review_id:    String,
    patch_number: u32,
  },
  Email {
    message_id: String,
    subject:    String,
  },
  DraftedFeature {
    feature_id: String,
    /// How many records reference this feature; maintained by the
    /// reconciliation pass.
    #[serde(default)]
    mention_count: u64,
    /// Timestamp of the most recent mention; maintained by the
    /// reconciliation pass.
    #[serde(default)]
    mention_date: i64,
  },
  CompletedFeature {
    feature_id: String,
  },
  FiledIssue {
    issue_id: String,
  },
  ResolvedIssue {
    issue_id: String,
  },
  Translation {
    language: String,
    words:    u64,
  },
  Member {
    member_id: String,
  },
  CiVote {
    review_id:    String,
    patch_number: u32,
    passed:       bool,
  },
}

impl Payload {
  pub fn kind(&self) -> RecordKind {
    match self {
      Self::Commit { .. } => RecordKind::Commit,
      Self::Review { .. } => RecordKind::Review,
      Self::Mark { .. } => RecordKind::Mark,
      Self::Patch { .. } => RecordKind::Patch,
      Self::Email { .. } => RecordKind::Email,
      Self::DraftedFeature { .. } => RecordKind::DraftedFeature,
      Self::CompletedFeature { .. } => RecordKind::CompletedFeature,
      Self::FiledIssue { .. } => RecordKind::FiledIssue,
      Self::ResolvedIssue { .. } => RecordKind::ResolvedIssue,
      Self::Translation { .. } => RecordKind::Translation,
      Self::Member { .. } => RecordKind::Member,
      Self::CiVote { .. } => RecordKind::CiVote,
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One normalized contribution event.
///
/// `record_id` is assigned by the incremental store on first insert and is
/// stable for the record's lifetime. All other common fields are stamped by
/// the normalizer/resolver chain; the reconciliation pass may later rewrite
/// the denormalized identity fields and the derived parts of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  /// Source-stable de-duplication key.
  pub primary_key: String,
  /// Store-assigned integer id; `0` until first inserted.
  #[serde(default)]
  pub record_id: u64,
  /// Event timestamp, unix seconds.
  pub date: i64,
  /// Week bucket derived from `date` (see [`crate::time::timestamp_to_week`]).
  pub week: i64,
  /// Release window the event falls into; assigned by the release assigner.
  #[serde(default)]
  pub release: String,
  pub module: String,
  #[serde(default)]
  pub branch: String,
  /// Canonical identity of the author; stamped by the identity resolver.
  #[serde(default)]
  pub user_id: String,
  pub author_name: String,
  pub author_email: String,
  /// Affiliation valid at `date`; stamped by the identity resolver.
  #[serde(default)]
  pub company_name: String,
  /// Feature-request ids mentioned by this record. Dangling entries are
  /// pruned by the reconciliation pass.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub feature_refs: Vec<String>,
  #[serde(flatten)]
  pub payload: Payload,
}

impl Record {
  pub fn kind(&self) -> RecordKind {
    self.payload.kind()
  }

  /// Day bucket derived from `date`.
  pub fn day(&self) -> i64 {
    crate::time::timestamp_to_day(self.date)
  }
}
