pub mod changelog_fetcher;
pub mod client;
pub mod config;
pub mod duckdb_store;
pub mod error;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod persistence;
pub mod rate_limit;
pub mod sync;

pub use client::{Auth, OrgScope, ScrollCursor, SearchPage, TrackerClient, TrackerConfig};
pub use error::{Error, Result};
pub use models::*;

// Fetch pipeline re-exports
pub use changelog_fetcher::{
    ChangelogBatch, ChangelogFetcher, FailurePolicy, FetchConfig, ProgressCallback,
};
pub use pagination::IssuePaginator;
pub use rate_limit::SharedRateLimiter;

// Sync module re-exports
pub use sync::{SyncConfig, SyncPhase, SyncReport, SyncService};

// Persistence module re-exports
pub use persistence::{PersistenceStore, StorageStats};

// DuckDB store re-export
pub use duckdb_store::DuckDBStore;

// Config and logging re-exports
pub use config::{AppConfig, LogConfig, LogFormat};
pub use logging::init_logging;

pub use tokio_util::sync::CancellationToken;
