//! Core library for stagever.
//!
//! stagever assigns semantic versions to merges. Each repository keeps one
//! version line per deployment environment; merges into an environment's
//! branches bump that line according to the issues they reference, and
//! merges into production promote the current development version.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading and management
//! - [`engine`] - Merge and release event handlers
//! - [`environment`] - Environments and branch classification
//! - [`policy`] - Per-repository policy resolution
//! - [`promotion`] - Development to production promotion
//! - [`release`] - Import of published releases
//! - [`store`] - Version persistence (memory and SQLite)
//! - [`tracker`] - Issue tracker ports and issue reference extraction
//! - [`version`] - Bump determination and version calculation
//! - [`version_file`] - The per-environment `version.json` artifact
//! - [`changelog`] - Changelog generation
//! - [`error`] - Error types and result aliases
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stagever_core::engine::{EngineSettings, VersionEngine};
//! use stagever_core::store::MemoryStore;
//! use stagever_core::tracker::{CommitInfo, StaticTracker};
//!
//! let tracker = Arc::new(StaticTracker::default());
//! let engine = VersionEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     tracker.clone(),
//!     tracker.clone(),
//!     tracker,
//!     EngineSettings::default(),
//! );
//! let version = engine
//!     .handle_branch_merge("web", "dev", &[CommitInfo::from_message("PROJ-1: fix login")])
//!     .expect("merge failed");
//! println!("{version:?}");
//! ```
#![deny(unsafe_code)]

pub mod changelog;

pub mod config;

pub mod engine;

pub mod environment;

pub mod error;

pub mod policy;

pub mod promotion;

pub mod release;

pub mod store;

pub mod tracker;

pub mod version;

pub mod version_file;

pub use config::{Config, ConfigLoader, LogLevel};

pub use engine::{EngineSettings, MergeInfo, VersionEngine};

pub use environment::Environment;

pub use error::{ConfigError, ConfigResult, EngineError, EngineResult};

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
