//! Source-shaped raw records as delivered by the connectors.
//!
//! The pipeline requires only that each raw record carries a stable source
//! identifier (used in the primary key), a timestamp, and an author email
//! and/or a source-specific handle. Everything else is kind-specific.

use serde::{Deserialize, Serialize};

/// One raw record, tagged with its source kind. The variant set is closed;
/// adding a source means adding a normalizer arm, and the compiler will point
/// at every place that needs one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum RawRecord {
  Commit(RawCommit),
  Review(RawReview),
  Post(RawPost),
  Feature(RawFeature),
  Issue(RawIssue),
  Translation(RawTranslation),
  Member(RawMember),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommit {
  pub commit_id:     String,
  pub author_name:   String,
  pub author_email:  String,
  pub date:          i64,
  pub lines_added:   u64,
  pub lines_deleted: u64,
  pub module:        String,
  #[serde(default)]
  pub branch: String,
  #[serde(default)]
  pub feature_refs: Vec<String>,
}

/// An account reference as review systems report them; any field may be
/// missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAccount {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub username: Option<String>,
}

impl RawAccount {
  /// An account with neither email nor handle cannot be attributed at all.
  pub fn is_attributable(&self) -> bool {
    self.email.is_some() || self.username.is_some()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawApproval {
  /// Vote category, e.g. `Code-Review`, `Workflow`, `Verified`.
  pub category:   String,
  pub value:      i32,
  pub granted_on: i64,
  pub by:         RawAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPatchSet {
  pub number:     u32,
  pub author:     RawAccount,
  pub created_on: i64,
  #[serde(default)]
  pub approvals: Vec<RawApproval>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReview {
  pub review_id:  String,
  pub module:     String,
  #[serde(default)]
  pub branch: String,
  pub owner:      RawAccount,
  pub created_on: i64,
  #[serde(default)]
  pub open: bool,
  #[serde(default)]
  pub patch_sets: Vec<RawPatchSet>,
  #[serde(default)]
  pub feature_refs: Vec<String>,
}

/// A mailing-list post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
  pub message_id:   String,
  pub author_name:  String,
  pub author_email: String,
  pub date:         i64,
  pub subject:      String,
  /// Explicit project name, when the archive provides one; otherwise the
  /// normalizer guesses from the subject line.
  #[serde(default)]
  pub module: Option<String>,
  #[serde(default)]
  pub feature_refs: Vec<String>,
}

/// A feature request (blueprint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeature {
  pub name:         String,
  pub module:       String,
  #[serde(default)]
  pub drafter: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  #[serde(default)]
  pub assignee: Option<String>,
  pub date_created: i64,
  #[serde(default)]
  pub date_completed: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssue {
  pub issue_id:     String,
  pub module:       String,
  #[serde(default)]
  pub owner_handle: Option<String>,
  #[serde(default)]
  pub owner_email: Option<String>,
  #[serde(default)]
  pub assignee: Option<String>,
  pub date_created: i64,
  #[serde(default)]
  pub date_fix_committed: Option<i64>,
  #[serde(default)]
  pub date_fix_released: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranslation {
  pub translation_handle: String,
  pub module:             String,
  pub date:               i64,
  pub language:           String,
  pub words:              u64,
}

/// A foundation member-directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMember {
  pub member_id:   String,
  pub author_name: String,
  pub date_joined: i64,
  #[serde(default)]
  pub company_draft: Option<String>,
}
