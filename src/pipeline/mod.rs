//! # Kill statistics pipeline
//!
//! In-memory aggregation of kill telemetry submitted by game servers, with
//! a best-effort durable sink behind it.
//!
//! ## Architecture
//!
//! ```text
//! Submission (server_id + raw fields)
//!     ↓
//! AdmissionController   per-source sliding ceiling
//!     ↓
//! normalizer            raw fields → KillEvent
//!     ↓
//! AggregationIndex      append-only log + five precomputed groupings
//!     ↓ (mpsc, fire-and-forget)
//! KillSink              SQLite: host, server, game_match, player, weapon, kill
//! ```
//!
//! Reads go through `KillStatEngine::query`: a dimension plus an optional
//! `QueryFilter`, answered from the index (never from SQLite).
//!
//! ## Module Organization
//!
//! - `types` - KillEvent, Dimension table, BucketView, Grouping
//! - `admission` - per-source admission control
//! - `normalizer` - raw submission → KillEvent
//! - `filter` - typed query predicates
//! - `index` - aggregation index
//! - `hosts` - host id → display name
//! - `db` - durable sink trait and SQLite writer
//! - `engine` - submit/query façade
//! - `query` - request parsing and JSON output
//! - `ingestion` - async channel tasks
//! - `reader` - JSONL submission stream reader
//! - `config` - environment configuration

pub mod types;
pub mod admission;
pub mod normalizer;
pub mod filter;
pub mod index;
pub mod hosts;
pub mod db;
pub mod engine;
pub mod query;
pub mod ingestion;
pub mod reader;
pub mod config;

// Re-export commonly used types
pub use types::{BucketView, Dimension, Grouping, KillEvent, Loadout};
pub use admission::{AdmissionController, AdmissionError};
pub use normalizer::{NormalizationError, RawKillFields, Submission};
pub use filter::{FilterField, FilterValue, QueryFilter};
pub use index::AggregationIndex;
pub use hosts::HostDirectory;
pub use db::{KillSink, SinkError, SqliteKillWriter};
pub use engine::{KillStatEngine, SubmitOutcome, SubmitStats};
pub use query::{QueryError, QueryRequest};
pub use config::{ConfigError, PipelineConfig};
