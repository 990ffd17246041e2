//! The `tally` contribution attribution pipeline binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, and runs one of the subcommands: `process` ingests raw record
//! batches and reconciles, `stats` answers aggregate queries over the store,
//! `gc` prunes the update log.
//!
//! # Usage
//!
//! ```
//! tally --db tally.db process --seed seed.json batch1.json batch2.json
//! tally --db tally.db stats --group-by company --module nova
//! tally --db tally.db gc --keep dashboard
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tally_core::record::RecordKind;
use tally_dashboard::{Filter, GroupBy, MemoryIndex};
use tally_processor::{
  Pipeline, lookup::NullLookup, raw::RawRecord, seed::SeedData,
};
use tally_store::{RuntimeStore, SqliteKv};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tally", about = "Contribution attribution pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Path to the SQLite store (overrides the config file).
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ingest raw record batches and run the reconciliation pass.
  Process {
    /// Seed data file (companies, users, releases, repos).
    #[arg(long)]
    seed: Option<PathBuf>,

    /// JSON files each holding an array of raw records.
    #[arg(required = true)]
    batches: Vec<PathBuf>,
  },

  /// Aggregate counts and sums over the stored records.
  Stats {
    #[arg(long, value_enum, default_value_t = Group::Company)]
    group_by: Group,

    #[arg(long)]
    module: Option<String>,
    #[arg(long)]
    release: Option<String>,
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    user: Option<String>,
    /// Record kind, e.g. `commit`, `review`, `mark`.
    #[arg(long)]
    kind: Option<String>,
  },

  /// Drop inactive consumer cursors and truncate the update log.
  Gc {
    /// Consumers whose cursors stay registered.
    #[arg(long)]
    keep: Vec<String>,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Group {
  Company,
  Module,
  User,
  Release,
  Kind,
  Week,
}

impl From<Group> for GroupBy {
  fn from(group: Group) -> Self {
    match group {
      Group::Company => GroupBy::Company,
      Group::Module => GroupBy::Module,
      Group::User => GroupBy::UserId,
      Group::Release => GroupBy::Release,
      Group::Kind => GroupBy::Kind,
      Group::Week => GroupBy::Week,
    }
  }
}

// ─── Config file ─────────────────────────────────────────────────────────────

/// Shape of the TOML config file; every field has a usable default.
#[derive(Debug, Deserialize)]
struct Settings {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  seed_path: Option<PathBuf>,
}

fn default_store_path() -> PathBuf {
  PathBuf::from("tally.db")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings: Settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("TALLY"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store_path = cli.db.unwrap_or(settings.store_path.clone());
  let kv = SqliteKv::open(&store_path)
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let mut store =
    RuntimeStore::open(kv).context("failed to load store index")?;

  match cli.command {
    Command::Process { seed, batches } => {
      let seed_path = seed
        .or(settings.seed_path)
        .context("no seed file given (--seed or seed_path in config)")?;
      process(&mut store, &seed_path, &batches)
    }
    Command::Stats { group_by, module, release, company, user, kind } => {
      let filter = Filter {
        kind: kind.as_deref().map(parse_kind).transpose()?,
        module,
        release,
        company,
        user_id: user,
        ..Default::default()
      };
      stats(&store, &filter, group_by.into())
    }
    Command::Gc { keep } => {
      store.gc(&keep).context("gc failed")?;
      Ok(())
    }
  }
}

// ─── Subcommands ─────────────────────────────────────────────────────────────

fn process(
  store: &mut RuntimeStore<SqliteKv>,
  seed_path: &Path,
  batches: &[PathBuf],
) -> anyhow::Result<()> {
  let raw = std::fs::read(seed_path)
    .with_context(|| format!("reading seed file {seed_path:?}"))?;
  let seed = SeedData::from_json(&raw).context("parsing seed file")?;

  seed.seed_profiles(store).context("seeding profiles")?;
  let normalizer = seed.normalizer();
  let domains = seed.domain_map();
  let releases = seed.release_table().context("parsing release dates")?;
  let pipeline = Pipeline::new(&normalizer, &domains, &releases, &NullLookup);

  for path in batches {
    let raw = std::fs::read(path)
      .with_context(|| format!("reading batch file {path:?}"))?;
    let batch: Vec<RawRecord> =
      serde_json::from_slice(&raw).with_context(|| {
        format!("parsing batch file {path:?}")
      })?;

    let stats = pipeline
      .run_cycle(store, batch)
      .with_context(|| format!("processing batch {path:?}"))?;
    info!(
      batch = %path.display(),
      inserted = stats.process.inserted,
      updated = stats.process.updated,
      unchanged = stats.process.unchanged,
      dropped = stats.process.dropped,
      rewritten = stats.reconcile.rewritten,
      "batch complete"
    );
  }
  Ok(())
}

fn stats(
  store: &RuntimeStore<SqliteKv>,
  filter: &Filter,
  group_by: GroupBy,
) -> anyhow::Result<()> {
  // One-shot: scan everything rather than registering a replay cursor that
  // would make the next invocation start from a partial index.
  let mut index = MemoryIndex::new();
  index.rebuild(store).context("building index")?;

  let groups = index.aggregate(filter, group_by);
  for (key, group) in &groups {
    println!(
      "{key}\tcount={}\tloc={}\twords={}",
      group.count, group.loc, group.words
    );
  }
  info!(groups = groups.len(), records = index.len(), "stats complete");
  Ok(())
}

/// Parse a kebab-case record kind as it appears in reports and seed data.
fn parse_kind(kind: &str) -> anyhow::Result<RecordKind> {
  serde_json::from_value(serde_json::Value::String(kind.to_string()))
    .with_context(|| format!("unknown record kind {kind:?}"))
}
