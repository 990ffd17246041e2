use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tally_core::{
  profile::{INDEPENDENT, ROBOTS},
  record::Payload,
};
use tally_store::{MemKv, RuntimeStore};

use crate::{
  Pipeline,
  lookup::{IdentityLookup, NullLookup, RemoteIdentity},
  raw::{
    RawAccount, RawApproval, RawCommit, RawFeature, RawPatchSet, RawPost,
    RawRecord, RawReview, RawTranslation,
  },
  reconciler::Reconciler,
  seed::SeedData,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn store() -> RuntimeStore<MemKv> {
  RuntimeStore::open(MemKv::default()).unwrap()
}

fn seed() -> SeedData {
  serde_json::from_value(serde_json::json!({
    "companies": [
      { "company_name": "NEC", "domains": ["nec.com", "nec.co.jp"] },
      { "company_name": "IBM", "domains": ["us.ibm.com"] },
      { "company_name": ROBOTS, "domains": [] },
    ],
    "users": [
      {
        "user_name": "John Doe",
        "profile_handle": "john_doe",
        "review_handle": "john_doe",
        "emails": ["johndoe@gmail.com", "jdoe@super.no"],
        "companies": [
          { "company_name": "*independent", "end_date": "2013-May-01" },
          { "company_name": "SuperCompany" },
        ],
      },
      {
        "user_name": "CI Robot",
        "profile_handle": "ci-robot",
        "emails": ["ci@review.example.org"],
        "companies": [{ "company_name": ROBOTS }],
      },
    ],
    "releases": [
      { "release_name": "prehistory", "end_date": "2011-Apr-21" },
      { "release_name": "icehouse", "end_date": "2014-Apr-17" },
      { "release_name": "juno", "end_date": "now" },
    ],
    "repos": [
      { "module": "nova", "aliases": [] },
      { "module": "quantum", "aliases": ["neutron-legacy"] },
    ],
  }))
  .unwrap()
}

fn commit(id: &str, name: &str, email: &str, date: i64) -> RawRecord {
  RawRecord::Commit(RawCommit {
    commit_id:     id.to_string(),
    author_name:   name.to_string(),
    author_email:  email.to_string(),
    date,
    lines_added:   12,
    lines_deleted: 3,
    module:        "nova".to_string(),
    branch:        "master".to_string(),
    feature_refs:  Vec::new(),
  })
}

fn account(name: &str, email: &str, username: &str) -> RawAccount {
  RawAccount {
    name:     Some(name.to_string()),
    email:    Some(email.to_string()),
    username: Some(username.to_string()),
  }
}

/// Timestamp safely inside the juno release and the core-reviewer window.
fn recent() -> i64 {
  Utc::now().timestamp() - 3600
}

fn run(
  seed: &SeedData,
  store: &mut RuntimeStore<MemKv>,
  batch: Vec<RawRecord>,
) -> crate::CycleStats {
  let normalizer = seed.normalizer();
  let domains = seed.domain_map();
  let releases = seed.release_table().unwrap();
  seed.seed_profiles(store).unwrap();
  Pipeline::new(&normalizer, &domains, &releases, &NullLookup)
    .run_cycle(store, batch)
    .unwrap()
}

// ─── Affiliation mapping ─────────────────────────────────────────────────────

#[test]
fn domain_lookup_matches_longest_suffix() {
  let seed = seed();
  let domains = seed.domain_map();

  assert_eq!(domains.company_for_email("dev@nec.com"), Some("NEC"));
  assert_eq!(domains.company_for_email("dev@nec.co.jp"), Some("NEC"));
  // a deep subdomain still reaches the mapped suffix
  assert_eq!(
    domains.company_for_email("dev@mxw.nes.nec.co.jp"),
    Some("NEC")
  );
  assert_eq!(domains.company_for_email("dev@us.ibm.com"), Some("IBM"));
  // the bare tld-plus-one of a deeper mapping does not match
  assert_eq!(domains.company_for_email("dev@ibm.com"), None);
  assert_eq!(domains.company_for_email("dev@example.org"), None);
  assert_eq!(domains.company_for_email("not-an-email"), None);
}

#[test]
fn curated_history_assigns_company_by_date() {
  let seed = seed();
  let mut store = store();
  // 2013-Jan-01 falls in the closed independent interval, recent() in the
  // open SuperCompany one.
  run(&seed, &mut store, vec![
    commit("c-old", "John Doe", "johndoe@gmail.com", 1357043824),
    commit("c-new", "John Doe", "jdoe@super.no", recent()),
  ]);

  let old = store.record_by_primary_key("c-old").unwrap().unwrap();
  assert_eq!(old.user_id, "john_doe");
  assert_eq!(old.company_name, INDEPENDENT);

  let new = store.record_by_primary_key("c-new").unwrap().unwrap();
  assert_eq!(new.user_id, "john_doe");
  assert_eq!(new.company_name, "SuperCompany");
}

#[test]
fn fresh_profile_takes_company_from_email_domain() {
  let seed = seed();
  let mut store = store();
  run(&seed, &mut store, vec![
    commit("c1", "New Dev", "dev@nec.co.jp", recent()),
    commit("c2", "Other Dev", "someone@nowhere.example", recent()),
  ]);

  let mapped = store.record_by_primary_key("c1").unwrap().unwrap();
  assert_eq!(mapped.user_id, "dev@nec.co.jp");
  assert_eq!(mapped.company_name, "NEC");

  let unmapped = store.record_by_primary_key("c2").unwrap().unwrap();
  assert_eq!(unmapped.company_name, INDEPENDENT);
}

#[test]
fn independent_profile_promoted_once_domain_becomes_known() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let review = |id: &str, email: &str, created_on: i64| {
    RawRecord::Review(RawReview {
      review_id:    id.to_string(),
      module:       "nova".to_string(),
      branch:       "master".to_string(),
      owner:        account("Ann", email, "ann"),
      created_on,
      open:         true,
      patch_sets:   Vec::new(),
      feature_refs: Vec::new(),
    })
  };

  // first sighting from an unmapped address: independent
  run(&seed, &mut store, vec![review("r1", "ann@nowhere.example", t)]);
  assert_eq!(
    store.record_by_primary_key("r1").unwrap().unwrap().company_name,
    INDEPENDENT
  );

  // the same handle later appears with a corporate address; the lone open
  // interval is rewritten and the earlier record re-stamped
  run(&seed, &mut store, vec![review("r2", "ann@nec.com", t + 10)]);

  let first = store.record_by_primary_key("r1").unwrap().unwrap();
  let second = store.record_by_primary_key("r2").unwrap().unwrap();
  assert_eq!(second.company_name, "NEC");
  assert_eq!(first.company_name, "NEC");
}

#[test]
fn commit_with_invalid_email_is_dropped() {
  let seed = seed();
  let mut store = store();
  let stats = run(&seed, &mut store, vec![commit(
    "c1",
    "Ghost",
    "not-an-email",
    recent(),
  )]);

  assert_eq!(stats.process.inserted, 0);
  assert_eq!(store.record_count().unwrap(), 0);
}

// ─── External lookup ─────────────────────────────────────────────────────────

struct StaticLookup {
  by_email: HashMap<String, RemoteIdentity>,
}

impl IdentityLookup for StaticLookup {
  fn lookup_by_email(&self, email: &str) -> Option<RemoteIdentity> {
    self.by_email.get(email).cloned()
  }

  fn lookup_by_handle(&self, _handle: &str) -> Option<String> {
    None
  }
}

#[test]
fn unknown_email_resolves_through_external_lookup() {
  let seed = seed();
  let mut store = store();
  seed.seed_profiles(&mut store).unwrap();

  let lookup = StaticLookup {
    by_email: HashMap::from([(
      "smith@linux.com".to_string(),
      RemoteIdentity {
        handle:       "smith".to_string(),
        display_name: "Smith Smith".to_string(),
      },
    )]),
  };
  let normalizer = seed.normalizer();
  let domains = seed.domain_map();
  let releases = seed.release_table().unwrap();
  let pipeline = Pipeline::new(&normalizer, &domains, &releases, &lookup);
  pipeline
    .run_cycle(&mut store, vec![commit(
      "c1",
      "",
      "smith@linux.com",
      recent(),
    )])
    .unwrap();

  let rec = store.record_by_primary_key("c1").unwrap().unwrap();
  assert_eq!(rec.user_id, "smith");
  assert_eq!(rec.author_name, "Smith Smith");

  let profile = store.profile_by_key("smith").unwrap().unwrap();
  assert_eq!(profile.profile_handle.as_deref(), Some("smith"));
  assert!(profile.emails.contains("smith@linux.com"));
}

#[test]
fn lookup_miss_keys_profile_by_email() {
  let seed = seed();
  let mut store = store();
  run(&seed, &mut store, vec![commit(
    "c1",
    "Nobody Known",
    "nobody@void.example",
    recent(),
  )]);

  let rec = store.record_by_primary_key("c1").unwrap().unwrap();
  assert_eq!(rec.user_id, "nobody@void.example");
  assert_eq!(rec.company_name, INDEPENDENT);
  assert!(store.profile_by_key("nobody@void.example").unwrap().is_some());
}

// ─── Merging and redirects ───────────────────────────────────────────────────

#[test]
fn shared_keys_merge_profiles_and_restamp_old_records() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let review = |id: &str, email: &str, created_on: i64| {
    RawRecord::Review(RawReview {
      review_id:    id.to_string(),
      module:       "nova".to_string(),
      branch:       "master".to_string(),
      owner:        account("Ann", email, "ann"),
      created_on,
      open:         true,
      patch_sets:   Vec::new(),
      feature_refs: Vec::new(),
    })
  };

  // Two sightings that cannot be connected yet: one profile keyed by the
  // work email, one by the personal email plus the review handle.
  run(&seed, &mut store, vec![commit("c1", "Ann", "ann@corp.example", t)]);
  run(&seed, &mut store, vec![review("r1", "ann@gmail.example", t + 10)]);
  assert_ne!(
    store.record_by_primary_key("c1").unwrap().unwrap().user_id,
    store.record_by_primary_key("r1").unwrap().unwrap().user_id
  );

  // A third sighting carries the work email together with the handle; the
  // two profiles collapse and the reconciliation pass corrects records
  // stamped with the losing id.
  run(&seed, &mut store, vec![review("r2", "ann@corp.example", t + 20)]);

  let c1 = store.record_by_primary_key("c1").unwrap().unwrap();
  let r1 = store.record_by_primary_key("r1").unwrap().unwrap();
  let r2 = store.record_by_primary_key("r2").unwrap().unwrap();
  assert_eq!(c1.user_id, r2.user_id);
  assert_eq!(r1.user_id, r2.user_id);

  // one surviving profile answers for every key
  let by_work = store.profile_by_key("ann@corp.example").unwrap().unwrap();
  let by_personal = store.profile_by_key("ann@gmail.example").unwrap().unwrap();
  let by_handle = store.profile_by_key("ann").unwrap().unwrap();
  assert_eq!(by_work.seq, by_handle.seq);
  assert_eq!(by_personal.seq, by_handle.seq);
}

#[test]
fn second_cycle_with_same_batch_changes_nothing() {
  let seed = seed();
  let mut store = store();
  let t = recent();
  let batch = vec![
    commit("c1", "John Doe", "johndoe@gmail.com", t),
    commit("c2", "New Dev", "dev@nec.com", t + 1),
  ];

  run(&seed, &mut store, batch.clone());
  let head = store.update_count().unwrap();
  let before = store.all_records().unwrap();

  let stats = run(&seed, &mut store, batch);
  assert_eq!(stats.process.inserted, 0);
  assert_eq!(stats.process.updated, 0);
  assert_eq!(stats.process.unchanged, 2);
  assert_eq!(stats.reconcile.rewritten, 0);
  assert_eq!(store.update_count().unwrap(), head);
  assert_eq!(store.all_records().unwrap(), before);
}

// ─── Robots ──────────────────────────────────────────────────────────────────

#[test]
fn robot_activity_is_dropped_except_review_plumbing() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let review = RawRecord::Review(RawReview {
    review_id:    "r1".to_string(),
    module:       "nova".to_string(),
    branch:       "master".to_string(),
    owner:        account("CI Robot", "ci@review.example.org", "ci-robot"),
    created_on:   t,
    open:         true,
    patch_sets:   vec![RawPatchSet {
      number:     1,
      author:     account("CI Robot", "ci@review.example.org", "ci-robot"),
      created_on: t,
      approvals:  vec![RawApproval {
        category:   "Code-Review".to_string(),
        value:      1,
        granted_on: t + 5,
        by:         account("CI Robot", "ci@review.example.org", "ci-robot"),
      }],
    }],
    feature_refs: Vec::new(),
  });
  let stats = run(&seed, &mut store, vec![
    review,
    commit("c1", "CI Robot", "ci@review.example.org", t),
  ]);

  // the review and patch survive; the mark and commit do not
  assert!(store.record_by_primary_key("r1").unwrap().is_some());
  assert!(store.record_by_primary_key("r1:1").unwrap().is_some());
  assert_eq!(stats.process.dropped, 2);
  for record in store.all_records().unwrap() {
    assert_eq!(record.company_name, ROBOTS);
    assert!(matches!(
      record.payload,
      Payload::Review { .. } | Payload::Patch { .. }
    ));
  }
}

// ─── Derived fields ──────────────────────────────────────────────────────────

#[test]
fn feature_mentions_counted_and_dangling_refs_pruned() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let feature = RawRecord::Feature(RawFeature {
    name:           "Hot-Standby".to_string(),
    module:         "nova".to_string(),
    drafter:        Some("ann".to_string()),
    owner:          None,
    assignee:       None,
    date_created:   t - 100,
    date_completed: None,
  });
  let mut c1 = commit("c1", "Ann", "ann@corp.example", t);
  if let RawRecord::Commit(c) = &mut c1 {
    c.feature_refs =
      vec!["nova:hot-standby".to_string(), "nova:no-such".to_string()];
  }
  let stats = run(&seed, &mut store, vec![feature, c1]);
  assert_eq!(stats.reconcile.pruned_refs, 1);

  let commit = store.record_by_primary_key("c1").unwrap().unwrap();
  assert_eq!(commit.feature_refs, vec!["nova:hot-standby".to_string()]);

  let drafted = store
    .record_by_primary_key("bpd:nova:hot-standby")
    .unwrap()
    .unwrap();
  let Payload::DraftedFeature { mention_count, mention_date, .. } =
    drafted.payload
  else {
    panic!("expected drafted feature, got {:?}", drafted.payload);
  };
  assert_eq!(mention_count, 1);
  assert_eq!(mention_date, t);
}

#[test]
fn reviews_numbered_per_submitter_in_date_order() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let review = |id: &str, created_on: i64| {
    RawRecord::Review(RawReview {
      review_id:    id.to_string(),
      module:       "nova".to_string(),
      branch:       "master".to_string(),
      owner:        account("Ann", "ann@corp.example", "ann"),
      created_on,
      open:         false,
      patch_sets:   Vec::new(),
      feature_refs: Vec::new(),
    })
  };
  // deliberately ingested out of date order
  run(&seed, &mut store, vec![review("r2", t + 50), review("r1", t)]);

  let number = |pk: &str| {
    let rec = store.record_by_primary_key(pk).unwrap().unwrap();
    match rec.payload {
      Payload::Review { review_number, .. } => review_number,
      other => panic!("expected review, got {other:?}"),
    }
  };
  assert_eq!(number("r1"), Some(1));
  assert_eq!(number("r2"), Some(2));
}

#[test]
fn later_vote_against_core_reference_is_flagged() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let vote = |value: i32, granted_on: i64, who: &str| RawApproval {
    category: "Code-Review".to_string(),
    value,
    granted_on,
    by: account(who, &format!("{who}@corp.example"), who),
  };
  let review = RawRecord::Review(RawReview {
    review_id:    "r1".to_string(),
    module:       "nova".to_string(),
    branch:       "master".to_string(),
    owner:        account("Ann", "ann@corp.example", "ann"),
    created_on:   t,
    open:         true,
    patch_sets:   vec![RawPatchSet {
      number:     1,
      author:     account("Ann", "ann@corp.example", "ann"),
      created_on: t,
      approvals:  vec![
        // the +2 both fixes the reference and grants the seat
        vote(2, t + 10, "core"),
        vote(-2, t + 20, "grumpy"),
        vote(1, t + 30, "cheerful"),
      ],
    }],
    feature_refs: Vec::new(),
  });
  run(&seed, &mut store, vec![review]);

  let flag = |pk: &str| {
    let rec = store.record_by_primary_key(pk).unwrap().unwrap();
    match rec.payload {
      Payload::Mark { disagreement, .. } => disagreement,
      other => panic!("expected mark, got {other:?}"),
    }
  };
  assert!(!flag(&format!("r1:{}:Code-Review", t + 10)));
  assert!(flag(&format!("r1:{}:Code-Review", t + 20)));
  assert!(!flag(&format!("r1:{}:Code-Review", t + 30)));

  let core = store.profile_by_key("core").unwrap().unwrap();
  assert!(!core.core.is_empty());
}

// ─── Module resolution ───────────────────────────────────────────────────────

#[test]
fn posts_guess_module_from_subject() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let post = |id: &str, subject: &str| {
    RawRecord::Post(RawPost {
      message_id:   id.to_string(),
      author_name:  "Ann".to_string(),
      author_email: "ann@corp.example".to_string(),
      date:         t,
      subject:      subject.to_string(),
      module:       None,
      feature_refs: Vec::new(),
    })
  };
  run(&seed, &mut store, vec![
    post("m1", "[nova] scheduler woes"),
    post("m2", "no project mentioned here"),
  ]);

  let module = |pk: &str| {
    store.record_by_primary_key(pk).unwrap().unwrap().module
  };
  assert_eq!(module("m1"), "nova");
  assert_eq!(module("m2"), "unknown");
}

#[test]
fn renamed_modules_resolve_through_aliases() {
  let seed = seed();
  let normalizer = seed.normalizer();
  assert_eq!(normalizer.resolve_module("Neutron-Legacy"), "quantum");
  assert_eq!(normalizer.resolve_module("nova"), "nova");
  assert_eq!(normalizer.resolve_module("brand-new"), "brand-new");
}

// ─── Releases ────────────────────────────────────────────────────────────────

#[test]
fn records_are_stamped_with_their_release() {
  let seed = seed();
  let mut store = store();
  run(&seed, &mut store, vec![
    commit("c-ancient", "Ann", "ann@corp.example", 1_000_000_000),
    commit("c-recent", "Ann", "ann@corp.example", recent()),
  ]);

  let release = |pk: &str| {
    store.record_by_primary_key(pk).unwrap().unwrap().release
  };
  assert_eq!(release("c-ancient"), "prehistory");
  assert_eq!(release("c-recent"), "juno");
}

// ─── Reconciler directly ─────────────────────────────────────────────────────

#[test]
fn stale_votes_lose_the_core_seat() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let review = RawRecord::Review(RawReview {
    review_id:    "r1".to_string(),
    module:       "nova".to_string(),
    branch:       "master".to_string(),
    owner:        account("Ann", "ann@corp.example", "ann"),
    created_on:   t,
    open:         true,
    patch_sets:   vec![RawPatchSet {
      number:     1,
      author:     account("Ann", "ann@corp.example", "ann"),
      created_on: t,
      approvals:  vec![RawApproval {
        category:   "Code-Review".to_string(),
        value:      2,
        granted_on: t,
        by:         account("Core", "core@corp.example", "core"),
      }],
    }],
    feature_refs: Vec::new(),
  });
  run(&seed, &mut store, vec![review]);
  assert!(!store.profile_by_key("core").unwrap().unwrap().core.is_empty());

  // a year later the vote is outside the window
  let domains = seed.domain_map();
  Reconciler::with_now(&domains, t + 365 * 24 * 3600)
    .run(&mut store, &HashSet::new())
    .unwrap();
  assert!(store.profile_by_key("core").unwrap().unwrap().core.is_empty());
}

// ─── Handle-only identities ──────────────────────────────────────────────────

#[test]
fn translators_keep_distinct_identities() {
  let seed = seed();
  let mut store = store();
  let t = recent();

  let translation = |handle: &str, words: u64| {
    RawRecord::Translation(RawTranslation {
      translation_handle: handle.to_string(),
      module:             "nova".to_string(),
      date:               t,
      language:           "de".to_string(),
      words,
    })
  };
  run(&seed, &mut store, vec![
    translation("alice", 120),
    translation("bob", 40),
  ]);

  // no email on file, yet the two handles never share an identity
  let records = store.all_records().unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].user_id, "translation:alice");
  assert_eq!(records[1].user_id, "translation:bob");

  let alice = store.profile_by_key("alice").unwrap().unwrap();
  let bob = store.profile_by_key("bob").unwrap().unwrap();
  assert_ne!(alice.seq, bob.seq);
  assert_eq!(
    store.profile_by_key("translation:alice").unwrap().unwrap().seq,
    alice.seq
  );
}
