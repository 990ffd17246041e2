//! SQL schema for the SQLite key-value backend.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// The store is a flat key namespace. Record payloads, the update log, and
/// profile fan-out entries all live in this one table; structure lives in the
/// key scheme, not in SQL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

PRAGMA user_version = 1;
";
