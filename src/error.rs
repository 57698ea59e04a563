use thiserror::Error;

use crate::sync::SyncPhase;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response header: {0}")]
    InvalidHeader(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("max retries exceeded for issue {issue_key} after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        issue_key: String,
        attempts: u32,
        source: Box<Error>,
    },

    #[error("changelog fetch failed for {failed} of {total} issues: {source}")]
    ChangelogBatchFailed {
        failed: usize,
        total: usize,
        source: Box<Error>,
    },

    #[error("sync failed while {phase}: {source}")]
    SyncFailed { phase: SyncPhase, source: Box<Error> },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// 上流のスロットリング（HTTP 429）かどうか
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimitExceeded)
    }

    /// キャンセルによる失敗かどうか（ラップされたエラーも辿る）
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::SyncFailed { source, .. }
            | Error::ChangelogBatchFailed { source, .. }
            | Error::MaxRetriesExceeded { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
