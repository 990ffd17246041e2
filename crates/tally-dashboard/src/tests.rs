use tally_core::{
  record::{Payload, Record, RecordKind},
  time::timestamp_to_week,
};
use tally_store::{MemKv, RuntimeStore};

use crate::{Filter, GroupBy, MemoryIndex};

const DAY: i64 = 86_400;

fn commit(pk: &str, user: &str, company: &str, date: i64, loc: u64) -> Record {
  Record {
    primary_key:  pk.to_string(),
    record_id:    0,
    date,
    week:         timestamp_to_week(date),
    release:      "icehouse".to_string(),
    module:       "nova".to_string(),
    branch:       "master".to_string(),
    user_id:      user.to_string(),
    author_name:  user.to_string(),
    author_email: format!("{user}@example.org"),
    company_name: company.to_string(),
    feature_refs: Vec::new(),
    payload:      Payload::Commit {
      lines_added:   loc,
      lines_deleted: 0,
      loc,
    },
  }
}

fn filled_store(records: Vec<Record>) -> RuntimeStore<MemKv> {
  let mut store = RuntimeStore::open(MemKv::default()).unwrap();
  for record in records {
    store.upsert(record, None).unwrap();
  }
  store
}

#[test]
fn sync_bootstraps_then_follows_updates() {
  let mut store = filled_store(vec![
    commit("c1", "ann", "Acme", 1000, 10),
    commit("c2", "bob", "Blue", 2000, 20),
  ]);

  let mut index = MemoryIndex::new();
  assert_eq!(index.sync(&mut store, "dash").unwrap(), 2);
  assert_eq!(index.len(), 2);

  // an in-place update arrives as exactly one replayed record
  let mut changed = index.by_primary_key("c1").unwrap().clone();
  changed.company_name = "Blue".to_string();
  store.upsert(changed, None).unwrap();
  assert_eq!(index.sync(&mut store, "dash").unwrap(), 1);
  assert_eq!(index.len(), 2);
  assert_eq!(
    index.by_primary_key("c1").unwrap().company_name,
    "Blue"
  );
}

#[test]
fn reindex_removes_stale_memberships() {
  let mut index = MemoryIndex::new();
  let mut record = commit("c1", "ann", "Acme", 1000, 10);
  record.record_id = 7;
  assert!(!index.apply(record.clone()));

  record.module = "quantum".to_string();
  record.user_id = "ann-renamed".to_string();
  assert!(index.apply(record));

  let old_module = Filter {
    module: Some("nova".to_string()),
    ..Default::default()
  };
  assert!(index.query(&old_module).is_empty());

  let old_user = Filter {
    user_id: Some("ann".to_string()),
    ..Default::default()
  };
  assert!(index.query(&old_user).is_empty());

  let current = Filter {
    module: Some("quantum".to_string()),
    user_id: Some("ann-renamed".to_string()),
    ..Default::default()
  };
  assert_eq!(index.query(&current).len(), 1);
}

#[test]
fn conjunctive_filters_intersect() {
  let mut index = MemoryIndex::new();
  let mut records = vec![
    commit("c1", "ann", "Acme", 1000, 10),
    commit("c2", "ann", "Acme", 2000, 20),
    commit("c3", "bob", "Blue", 3000, 30),
  ];
  records[1].module = "quantum".to_string();
  for (id, mut record) in records.into_iter().enumerate() {
    record.record_id = id as u64;
    index.apply(record);
  }

  let ann_nova = Filter {
    module: Some("nova".to_string()),
    user_id: Some("ann".to_string()),
    ..Default::default()
  };
  let hits = index.query(&ann_nova);
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].primary_key, "c1");

  // companies match regardless of casing
  let acme = Filter {
    company: Some("ACME".to_string()),
    ..Default::default()
  };
  assert_eq!(index.query(&acme).len(), 2);
  assert_eq!(index.company_display("acme"), Some("Acme"));

  let nowhere = Filter {
    module: Some("no-such".to_string()),
    ..Default::default()
  };
  assert!(index.query(&nowhere).is_empty());
}

#[test]
fn time_range_is_inclusive_below_exclusive_above() {
  let mut index = MemoryIndex::new();
  for (id, date) in [DAY, 2 * DAY, 3 * DAY].into_iter().enumerate() {
    let mut record = commit(&format!("c{id}"), "ann", "Acme", date, 1);
    record.record_id = id as u64;
    index.apply(record);
  }

  let range = Filter {
    since: Some(DAY),
    until: Some(3 * DAY),
    ..Default::default()
  };
  let hits = index.query(&range);
  assert_eq!(hits.len(), 2);
  assert_eq!(hits[0].date, DAY);
  assert_eq!(hits[1].date, 2 * DAY);
}

#[test]
fn aggregates_group_counts_and_sums() {
  let mut index = MemoryIndex::new();
  for (id, record) in [
    commit("c1", "ann", "Acme", 1000, 10),
    commit("c2", "ann", "Acme", 2000, 20),
    commit("c3", "bob", "Blue", 3000, 30),
  ]
  .into_iter()
  .enumerate()
  {
    let mut record = record;
    record.record_id = id as u64;
    index.apply(record);
  }

  let by_company = index.aggregate(&Filter::default(), GroupBy::Company);
  assert_eq!(by_company["Acme"].count, 2);
  assert_eq!(by_company["Acme"].loc, 30);
  assert_eq!(by_company["Blue"].count, 1);
  assert_eq!(by_company["Blue"].loc, 30);

  let commits_only = Filter {
    kind: Some(RecordKind::Commit),
    user_id: Some("ann".to_string()),
    ..Default::default()
  };
  let by_user = index.aggregate(&commits_only, GroupBy::UserId);
  assert_eq!(by_user.len(), 1);
  assert_eq!(by_user["ann"].loc, 30);
}

#[test]
fn feature_backrefs_and_point_lookup() {
  let mut index = MemoryIndex::new();
  let mut c1 = commit("c1", "ann", "Acme", 1000, 10);
  c1.record_id = 0;
  c1.feature_refs = vec!["nova:hot-standby".to_string()];
  let mut c2 = commit("c2", "bob", "Blue", 500, 20);
  c2.record_id = 1;
  c2.feature_refs = vec!["nova:hot-standby".to_string()];
  index.apply(c1);
  index.apply(c2);

  let mentions = index.records_for_feature("nova:hot-standby");
  assert_eq!(mentions.len(), 2);
  // ordered by date
  assert_eq!(mentions[0].primary_key, "c2");

  assert!(index.by_primary_key("c1").is_some());
  assert!(index.by_primary_key("no-such").is_none());
  assert!(index.records_for_feature("no-such").is_empty());
}

#[test]
fn two_consumers_keep_independent_cursors() {
  let mut store = filled_store(vec![commit("c1", "ann", "Acme", 1000, 10)]);

  let mut first = MemoryIndex::new();
  let mut second = MemoryIndex::new();
  assert_eq!(first.sync(&mut store, "first").unwrap(), 1);
  assert_eq!(second.sync(&mut store, "second").unwrap(), 1);

  store.upsert(commit("c2", "bob", "Blue", 2000, 20), None).unwrap();
  assert_eq!(first.sync(&mut store, "first").unwrap(), 1);
  // the slower consumer still sees the update on its own schedule
  assert_eq!(second.sync(&mut store, "second").unwrap(), 1);
  assert_eq!(first.len(), 2);
  assert_eq!(second.len(), 2);
}

#[test]
fn rebuild_scans_everything_without_moving_cursors() {
  let mut store = filled_store(vec![commit("c1", "ann", "Acme", 1000, 10)]);
  // another reader has already drained the log to the head
  store.read_since("report").unwrap();

  let mut index = MemoryIndex::new();
  assert_eq!(index.rebuild(&store).unwrap(), 1);
  assert_eq!(index.len(), 1);
  assert!(index.by_primary_key("c1").is_some());

  // the full scan neither advanced that cursor nor registered one
  store.upsert(commit("c2", "bob", "Blue", 2000, 20), None).unwrap();
  assert_eq!(store.read_since("report").unwrap().len(), 1);
}
