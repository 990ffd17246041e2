//! The record normalizer, one arm per raw record kind.
//!
//! Each arm emits a finite sequence of canonical records (zero, one, or
//! many) carrying the identity signals the resolver needs. Dropping a record
//! here (e.g. a commit with an unattributable author) is a filter, not an
//! error.

use std::collections::HashMap;

use tally_core::{
  record::{Payload, Record},
  time::{is_valid_email, timestamp_to_day, timestamp_to_week},
};
use tracing::debug;

use crate::raw::{
  RawAccount, RawCommit, RawFeature, RawIssue, RawMember, RawPost, RawRecord,
  RawReview, RawTranslation,
};

/// Vote category used by CI verification accounts.
const CI_CATEGORY: &str = "Verified";

// ─── Signals ─────────────────────────────────────────────────────────────────

/// The identity signals a canonical record carries into resolution.
#[derive(Debug, Clone, Default)]
pub struct Signals {
  pub email:              Option<String>,
  pub profile_handle:     Option<String>,
  pub review_handle:      Option<String>,
  pub translation_handle: Option<String>,
  pub member_id:          Option<String>,
  pub name_hint:          Option<String>,
  /// Self-declared company, e.g. from a member-directory entry. Used only
  /// when a fresh profile is created.
  pub company_hint: Option<String>,
}

/// A normalized record together with its identity signals; the record's
/// `user_id`/`company_name` are still blank at this point.
#[derive(Debug, Clone)]
pub struct Canonical {
  pub record:  Record,
  pub signals: Signals,
}

// ─── Normalizer ──────────────────────────────────────────────────────────────

pub struct Normalizer {
  /// Known canonical module names, lowercase.
  modules: Vec<String>,
  /// Historical names mapped to the canonical one.
  aliases: HashMap<String, String>,
}

impl Normalizer {
  pub fn new(modules: Vec<String>, aliases: HashMap<String, String>) -> Self {
    let modules = modules.into_iter().map(|m| m.to_lowercase()).collect();
    let aliases = aliases
      .into_iter()
      .map(|(alias, canonical)| {
        (alias.to_lowercase(), canonical.to_lowercase())
      })
      .collect();
    Self { modules, aliases }
  }

  /// Map a module name through the alias table to its canonical form.
  pub fn resolve_module(&self, name: &str) -> String {
    let lower = name.to_lowercase();
    self.aliases.get(&lower).cloned().unwrap_or(lower)
  }

  /// Guess the project a free-text subject refers to: the longest known
  /// module name found earliest in the subject wins.
  pub fn guess_module(&self, subject: &str) -> Option<String> {
    let subject = subject.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for module in &self.modules {
      if let Some(pos) = subject.find(module.as_str()) {
        let better = match best {
          None => true,
          Some((best_pos, best_module)) => {
            pos < best_pos || (pos == best_pos && module.len() > best_module.len())
          }
        };
        if better {
          best = Some((pos, module));
        }
      }
    }
    best.map(|(_, module)| module.to_string())
  }

  /// Expand one raw record into its canonical records.
  pub fn normalize(&self, raw: RawRecord) -> Vec<Canonical> {
    match raw {
      RawRecord::Commit(commit) => self.normalize_commit(commit),
      RawRecord::Review(review) => self.normalize_review(review),
      RawRecord::Post(post) => self.normalize_post(post),
      RawRecord::Feature(feature) => self.normalize_feature(feature),
      RawRecord::Issue(issue) => self.normalize_issue(issue),
      RawRecord::Translation(tr) => self.normalize_translation(tr),
      RawRecord::Member(member) => self.normalize_member(member),
    }
  }

  // ── Arms ──────────────────────────────────────────────────────────────────

  fn normalize_commit(&self, commit: RawCommit) -> Vec<Canonical> {
    let email = commit.author_email.to_lowercase();
    if !is_valid_email(&email) {
      // No attributable author; filtered, not an error.
      debug!(commit_id = %commit.commit_id, "drop commit with invalid author email");
      return Vec::new();
    }

    let record = base(
      commit.commit_id.clone(),
      commit.date,
      self.resolve_module(&commit.module),
      commit.branch,
      commit.author_name,
      email.clone(),
      Payload::Commit {
        lines_added:   commit.lines_added,
        lines_deleted: commit.lines_deleted,
        loc:           commit.lines_added + commit.lines_deleted,
      },
    )
    .with_refs(commit.feature_refs);

    vec![Canonical { record, signals: email_signals(email) }]
  }

  fn normalize_review(&self, review: RawReview) -> Vec<Canonical> {
    let mut out = Vec::new();
    let module = self.resolve_module(&review.module);

    if review.owner.is_attributable() {
      let record = base(
        review.review_id.clone(),
        review.created_on,
        module.clone(),
        review.branch.clone(),
        review.owner.name.clone().unwrap_or_default(),
        lower_email(&review.owner),
        Payload::Review {
          review_id:     review.review_id.clone(),
          open:          review.open,
          review_number: None,
        },
      )
      .with_refs(review.feature_refs.clone());
      out.push(Canonical {
        record,
        signals: account_signals(&review.owner),
      });
    } else {
      debug!(review_id = %review.review_id, "skip review with unattributable owner");
    }

    for patch in &review.patch_sets {
      if patch.author.is_attributable() {
        let record = base(
          format!("{}:{}", review.review_id, patch.number),
          patch.created_on,
          module.clone(),
          review.branch.clone(),
          patch.author.name.clone().unwrap_or_default(),
          lower_email(&patch.author),
          Payload::Patch {
            review_id:    review.review_id.clone(),
            patch_number: patch.number,
          },
        );
        out.push(Canonical {
          record,
          signals: account_signals(&patch.author),
        });
      }

      for approval in &patch.approvals {
        if !approval.by.is_attributable() {
          continue;
        }
        let (primary_key, payload) = if approval.category == CI_CATEGORY {
          (
            format!(
              "{}:{}:ci:{}",
              review.review_id, patch.number, approval.granted_on
            ),
            Payload::CiVote {
              review_id:    review.review_id.clone(),
              patch_number: patch.number,
              passed:       approval.value > 0,
            },
          )
        } else {
          (
            // composite key keeps marks unique across patch revisions
            format!(
              "{}:{}:{}",
              review.review_id, approval.granted_on, approval.category
            ),
            Payload::Mark {
              review_id:    review.review_id.clone(),
              patch_number: patch.number,
              category:     approval.category.clone(),
              value:        approval.value,
              disagreement: false,
            },
          )
        };
        let record = base(
          primary_key,
          approval.granted_on,
          module.clone(),
          review.branch.clone(),
          approval.by.name.clone().unwrap_or_default(),
          lower_email(&approval.by),
          payload,
        );
        out.push(Canonical {
          record,
          signals: account_signals(&approval.by),
        });
      }
    }

    out
  }

  fn normalize_post(&self, post: RawPost) -> Vec<Canonical> {
    let module = match &post.module {
      Some(module) => self.resolve_module(module),
      None => self
        .guess_module(&post.subject)
        .unwrap_or_else(|| "unknown".to_string()),
    };

    let email = post.author_email.to_lowercase();
    let record = base(
      post.message_id.clone(),
      post.date,
      module,
      String::new(),
      post.author_name,
      email.clone(),
      Payload::Email {
        message_id: post.message_id,
        subject:    post.subject,
      },
    )
    .with_refs(post.feature_refs);

    vec![Canonical { record, signals: email_signals(email) }]
  }

  fn normalize_feature(&self, feature: RawFeature) -> Vec<Canonical> {
    let module = self.resolve_module(&feature.module);
    let feature_id = format!("{}:{}", module, feature.name.to_lowercase());
    let mut out = Vec::new();

    let drafter = feature.drafter.clone().or_else(|| feature.owner.clone());
    out.push(Canonical {
      record:  base(
        format!("bpd:{feature_id}"),
        feature.date_created,
        module.clone(),
        String::new(),
        String::new(),
        String::new(),
        Payload::DraftedFeature {
          feature_id:    feature_id.clone(),
          mention_count: 0,
          mention_date:  0,
        },
      ),
      signals: handle_signals(drafter),
    });

    if let (Some(assignee), Some(completed)) =
      (&feature.assignee, feature.date_completed)
    {
      out.push(Canonical {
        record:  base(
          format!("bpc:{feature_id}"),
          completed,
          module,
          String::new(),
          String::new(),
          String::new(),
          Payload::CompletedFeature { feature_id },
        ),
        signals: handle_signals(Some(assignee.clone())),
      });
    }

    out
  }

  fn normalize_issue(&self, issue: RawIssue) -> Vec<Canonical> {
    let module = self.resolve_module(&issue.module);
    let issue_id = format!("{}/{}", module, issue.issue_id);
    let mut out = Vec::new();

    let filer = Signals {
      email: issue.owner_email.as_deref().map(str::to_lowercase),
      profile_handle: issue.owner_handle.clone(),
      ..Default::default()
    };
    out.push(Canonical {
      record:  base(
        format!("bugf:{issue_id}"),
        issue.date_created,
        module.clone(),
        String::new(),
        String::new(),
        filer.email.clone().unwrap_or_default(),
        Payload::FiledIssue { issue_id: issue_id.clone() },
      ),
      signals: filer,
    });

    // fix-released date wins; fall back to fix-committed
    let resolved_at = issue.date_fix_released.or(issue.date_fix_committed);
    if let (Some(assignee), Some(resolved_at)) = (&issue.assignee, resolved_at)
    {
      out.push(Canonical {
        record:  base(
          format!("bugr:{issue_id}"),
          resolved_at,
          module,
          String::new(),
          String::new(),
          String::new(),
          Payload::ResolvedIssue { issue_id },
        ),
        signals: handle_signals(Some(assignee.clone())),
      });
    }

    out
  }

  fn normalize_translation(&self, tr: RawTranslation) -> Vec<Canonical> {
    let module = self.resolve_module(&tr.module);
    let record = base(
      format!(
        "tr:{}:{}:{}",
        tr.translation_handle,
        module,
        timestamp_to_day(tr.date)
      ),
      tr.date,
      module,
      String::new(),
      String::new(),
      String::new(),
      Payload::Translation { language: tr.language, words: tr.words },
    );
    vec![Canonical {
      record,
      signals: Signals {
        translation_handle: Some(tr.translation_handle),
        ..Default::default()
      },
    }]
  }

  fn normalize_member(&self, member: RawMember) -> Vec<Canonical> {
    let record = base(
      format!("member:{}", member.member_id),
      member.date_joined,
      "unknown".to_string(),
      String::new(),
      member.author_name.clone(),
      String::new(),
      Payload::Member { member_id: member.member_id.clone() },
    );
    vec![Canonical {
      record,
      signals: Signals {
        member_id: Some(member.member_id),
        name_hint: Some(member.author_name),
        company_hint: member.company_draft,
        ..Default::default()
      },
    }]
  }
}

// ─── Construction helpers ────────────────────────────────────────────────────

fn base(
  primary_key: String,
  date: i64,
  module: String,
  branch: String,
  author_name: String,
  author_email: String,
  payload: Payload,
) -> Record {
  Record {
    primary_key,
    record_id: 0,
    date,
    week: timestamp_to_week(date),
    release: String::new(),
    module,
    branch,
    user_id: String::new(),
    author_name,
    author_email,
    company_name: String::new(),
    feature_refs: Vec::new(),
    payload,
  }
}

trait WithRefs {
  fn with_refs(self, refs: Vec<String>) -> Self;
}

impl WithRefs for Record {
  fn with_refs(mut self, refs: Vec<String>) -> Self {
    self.feature_refs = refs;
    self
  }
}

fn lower_email(account: &RawAccount) -> String {
  account
    .email
    .as_deref()
    .map(str::to_lowercase)
    .unwrap_or_default()
}

fn email_signals(email: String) -> Signals {
  Signals { email: Some(email), ..Default::default() }
}

fn account_signals(account: &RawAccount) -> Signals {
  Signals {
    email: account.email.as_deref().map(str::to_lowercase),
    review_handle: account.username.clone(),
    name_hint: account.name.clone(),
    ..Default::default()
  }
}

fn handle_signals(handle: Option<String>) -> Signals {
  Signals { profile_handle: handle, ..Default::default() }
}
