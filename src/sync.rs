use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::changelog_fetcher::{ChangelogFetcher, FailurePolicy, FetchConfig, ProgressCallback};
use crate::client::{TrackerClient, cancellable};
use crate::error::{Error, Result};
use crate::pagination::{IssuePaginator, apply_history_depth};
use crate::persistence::PersistenceStore;

/// 同期処理の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    FetchIssues,
    SaveIssues,
    FetchStatusTypes,
    SaveStatusTypes,
    FetchChangelogs,
    SaveChangelogs,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncPhase::FetchIssues => "fetching issues",
            SyncPhase::SaveIssues => "saving issues",
            SyncPhase::FetchStatusTypes => "fetching status types",
            SyncPhase::SaveStatusTypes => "saving status types",
            SyncPhase::FetchChangelogs => "fetching changelogs",
            SyncPhase::SaveChangelogs => "saving changelogs",
        };
        f.write_str(text)
    }
}

/// 同期サービスの設定
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 課題検索のフィルタクエリ
    pub filter: String,
    /// 初回取得の履歴深さ（例：`7d`）
    pub history_depth: Option<String>,
    /// 変更履歴取得の設定
    pub fetch: FetchConfig,
}

impl SyncConfig {
    /// デフォルト設定で新しいSyncConfigを作成
    pub fn new() -> Self {
        Self {
            filter: String::new(),
            history_depth: None,
            fetch: FetchConfig::new(),
        }
    }

    /// フィルタを設定
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// 履歴深さを設定
    pub fn history_depth(mut self, depth: Option<String>) -> Self {
        self.history_depth = depth;
        self
    }

    /// レート制限を設定
    pub fn rate_limit(mut self, rate_per_second: u32, burst: u32) -> Self {
        self.fetch = self.fetch.rate_limit(rate_per_second, burst);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.fetch = self.fetch.max_retries(max_retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.fetch = self.fetch.retry_delay(delay);
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.fetch = self.fetch.max_in_flight(max_in_flight);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.fetch = self.fetch.failure_policy(policy);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 同期処理の結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// 同期開始時刻
    pub start_time: DateTime<Utc>,
    /// 同期終了時刻
    pub end_time: DateTime<Utc>,
    /// 保存した課題数
    pub issues_count: usize,
    /// 保存したステータス定義数
    pub status_types_count: usize,
    /// 保存した変更履歴の行数
    pub changelogs_count: usize,
    /// 変更履歴を取得できなかった課題（BestEffort時のみ）
    pub failed_issue_keys: Vec<String>,
}

impl SyncReport {
    /// 同期処理時間を取得（秒）
    pub fn duration_seconds(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_complete(&self) -> bool {
        self.failed_issue_keys.is_empty()
    }
}

fn failed_at(phase: SyncPhase) -> impl FnOnce(Error) -> Error {
    move |source| Error::SyncFailed {
        phase,
        source: Box::new(source),
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, phase: SyncPhase) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(failed_at(phase)(Error::Cancelled));
    }
    Ok(())
}

/// 課題・ステータス定義・変更履歴を順に取得して保存する同期サービス
pub struct SyncService<S: PersistenceStore> {
    client: TrackerClient,
    store: S,
    config: SyncConfig,
    paginator: IssuePaginator,
    fetcher: ChangelogFetcher,
}

impl<S: PersistenceStore> SyncService<S> {
    /// 新しい同期サービスを作成
    pub fn new(client: TrackerClient, store: S, config: SyncConfig) -> Result<Self> {
        let paginator = IssuePaginator::new(client.clone()).history_depth(config.history_depth.clone());
        let fetcher = ChangelogFetcher::new(client.clone(), config.fetch.clone())?;

        Ok(Self {
            client,
            store,
            config,
            paginator,
            fetcher,
        })
    }

    /// 変更履歴取得の進捗コールバックを設定
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.fetcher = self.fetcher.on_progress(callback);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// フィルタ（履歴深さ込み）に一致する課題数
    pub async fn count_matching_issues(&self, cancel: &CancellationToken) -> Result<u64> {
        let query = apply_history_depth(&self.config.filter, self.config.history_depth.as_deref());
        cancellable(cancel, self.client.count_issues(&query)).await
    }

    /// 同期を1回実行
    ///
    /// 各段階の失敗でその場で中断する。それまでに保存した課題や
    /// ステータス定義は残る。
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let start_time = Utc::now();
        info!(filter = %self.config.filter, "Starting sync");

        let issues = self
            .paginator
            .fetch_all(&self.config.filter, cancel)
            .await
            .map_err(failed_at(SyncPhase::FetchIssues))?;
        info!(count = issues.len(), "Retrieved issues from Tracker");

        ensure_not_cancelled(cancel, SyncPhase::SaveIssues)?;
        let issues_count = self
            .store
            .save_issues(&issues)
            .await
            .map_err(failed_at(SyncPhase::SaveIssues))?;

        let status_types = cancellable(cancel, self.client.get_status_types())
            .await
            .map_err(failed_at(SyncPhase::FetchStatusTypes))?;
        info!(count = status_types.len(), "Retrieved status types from Tracker");

        ensure_not_cancelled(cancel, SyncPhase::SaveStatusTypes)?;
        let status_types_count = self
            .store
            .save_status_types(&status_types)
            .await
            .map_err(failed_at(SyncPhase::SaveStatusTypes))?;

        let batch = self
            .fetcher
            .fetch_all(&issues, cancel)
            .await
            .map_err(failed_at(SyncPhase::FetchChangelogs))?;
        info!(count = batch.rows.len(), "Retrieved changelogs from Tracker");

        ensure_not_cancelled(cancel, SyncPhase::SaveChangelogs)?;
        let changelogs_count = self
            .store
            .save_changelogs(&batch.rows)
            .await
            .map_err(failed_at(SyncPhase::SaveChangelogs))?;

        let report = SyncReport {
            start_time,
            end_time: Utc::now(),
            issues_count,
            status_types_count,
            changelogs_count,
            failed_issue_keys: batch.failed_issue_keys,
        };
        info!(
            issues = report.issues_count,
            status_types = report.status_types_count,
            changelogs = report.changelogs_count,
            failed_issues = report.failed_issue_keys.len(),
            duration_seconds = report.duration_seconds(),
            "Sync completed"
        );
        Ok(report)
    }
}
