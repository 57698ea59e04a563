//! 環境変数からのアプリケーション設定
//!
//! 設定は起動時に1回だけ組み立て、各コンポーネントへ値で渡す。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::changelog_fetcher::FailurePolicy;
use crate::client::{Auth, OrgScope, TrackerConfig};
use crate::error::{Error, Result};
use crate::rate_limit::defaults;
use crate::sync::SyncConfig;

pub const ENV_API_ISSUES_URL: &str = "TRACKER_API_ISSUES_URL";
pub const ENV_ORG_ID: &str = "TRACKER_ORG_ID";
pub const ENV_OAUTH_TOKEN: &str = "TRACKER_OAUTH_TOKEN";
pub const ENV_ORG_KIND: &str = "TRACKER_ORG_KIND";
pub const ENV_FILTER: &str = "TRACKER_FILTER";
pub const ENV_HISTORY_DEPTH: &str = "TRACKER_INITIAL_HISTORY_DEPTH";
pub const ENV_RATE_LIMIT: &str = "TRACKER_RATE_LIMIT";
pub const ENV_RATE_BURST: &str = "TRACKER_RATE_BURST";
pub const ENV_MAX_RETRIES: &str = "TRACKER_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "TRACKER_RETRY_DELAY_MS";
pub const ENV_MAX_IN_FLIGHT: &str = "TRACKER_MAX_IN_FLIGHT";
pub const ENV_FAILURE_POLICY: &str = "TRACKER_FAILURE_POLICY";
pub const ENV_DUCKDB_PATH: &str = "DUCKDB_PATH";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// ログの出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(Error::InvalidConfiguration(format!(
                "{} must be json or text, got {:?}",
                ENV_LOG_FORMAT, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// アプリケーション全体の設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub sync: SyncConfig,
    pub database_path: PathBuf,
    pub log: LogConfig,
}

impl AppConfig {
    /// プロセスの環境変数から読み込み
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー検索関数から読み込み
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            lookup(key).ok_or_else(|| {
                Error::ConfigurationMissing(format!("{} not found in environment", key))
            })
        };

        let base_url = required(ENV_API_ISSUES_URL)?;
        let org_id = required(ENV_ORG_ID)?;
        let token = required(ENV_OAUTH_TOKEN)?;

        let org = match lookup(ENV_ORG_KIND).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("org") => OrgScope::Org(org_id),
            Some("cloud") => OrgScope::CloudOrg(org_id),
            Some(other) => {
                return Err(Error::InvalidConfiguration(format!(
                    "{} must be org or cloud, got {:?}",
                    ENV_ORG_KIND, other
                )));
            }
        };
        // クラウド組織はIAMトークン
        let auth = match org {
            OrgScope::Org(_) => Auth::OAuth { token },
            OrgScope::CloudOrg(_) => Auth::Bearer { token },
        };
        let tracker = TrackerConfig::new(base_url, auth, org)?;

        let rate_limit = parse_positive(&lookup, ENV_RATE_LIMIT, defaults::RATE_PER_SECOND)?;
        let burst = parse_positive(&lookup, ENV_RATE_BURST, defaults::BURST)?;
        let max_retries = parse_positive(&lookup, ENV_MAX_RETRIES, 3u32)?;
        let retry_delay_ms = parse_positive(&lookup, ENV_RETRY_DELAY_MS, 2000u64)?;
        let max_in_flight = parse_positive(&lookup, ENV_MAX_IN_FLIGHT, 50usize)?;
        let failure_policy = match lookup(ENV_FAILURE_POLICY) {
            Some(value) => value.parse::<FailurePolicy>()?,
            None => FailurePolicy::default(),
        };

        let sync = SyncConfig::new()
            .filter(lookup(ENV_FILTER).unwrap_or_default())
            .history_depth(lookup(ENV_HISTORY_DEPTH))
            .rate_limit(rate_limit, burst)
            .max_retries(max_retries)
            .retry_delay(Duration::from_millis(retry_delay_ms))
            .max_in_flight(max_in_flight)
            .failure_policy(failure_policy);

        let database_path = lookup(ENV_DUCKDB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path);

        let level = lookup(ENV_LOG_LEVEL)
            .unwrap_or_else(|| "info".to_string())
            .to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::InvalidConfiguration(format!(
                "{} must be one of {}, got {:?}",
                ENV_LOG_LEVEL,
                LOG_LEVELS.join("/"),
                level
            )));
        }
        let format = match lookup(ENV_LOG_FORMAT) {
            Some(value) => value.parse::<LogFormat>()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            tracker,
            sync,
            database_path,
            log: LogConfig { level, format },
        })
    }

    pub fn organization_id(&self) -> &str {
        self.tracker.org.id()
    }
}

/// `<データディレクトリ>/tracker-import/tracker.duckdb`
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("tracker-import"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracker.duckdb")
}

fn parse_positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(Error::InvalidConfiguration(format!(
            "{} must be a positive integer, got {:?}",
            key, raw
        ))),
    }
}
