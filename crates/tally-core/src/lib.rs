//! Core types and trait definitions for the tally contribution pipeline.
//!
//! This crate is deliberately free of database and network dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod error;
pub mod kv;
pub mod profile;
pub mod record;
pub mod release;
pub mod time;

pub use error::{Error, Result};
