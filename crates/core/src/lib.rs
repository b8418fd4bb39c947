//! tracksync core library.
//!
//! This crate provides the foundational components for one-way Gitea → Kimai
//! synchronization: configuration, the SQLite mapping store, change detection
//! and conflict resolution, project provisioning, remote clients, and the
//! sync engine.

pub mod activity;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod models;
pub mod provision;
pub mod remote;
pub mod retry;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::{AppConfig, ConflictPolicy, SyncConfig};
pub use db::Database;
pub use provision::{Provisioner, RepositoryMappingCache};
pub use sync_engine::{CancelToken, SyncEngine, SyncReport};
