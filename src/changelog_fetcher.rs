//! 課題ごとの変更履歴を並行取得するフェッチャー
//!
//! 課題1件につき1タスクを起動し、全タスクで1つのトークンバケットを共有する。
//! 同時に走るタスク数はセマフォで上限を設ける。

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::Retryable;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{TrackerClient, cancellable};
use crate::error::{Error, Result};
use crate::models::{ChangelogRow, Issue};
use crate::rate_limit::{SharedRateLimiter, defaults};

/// 進捗コールバック（完了数, 総数, 完了した課題キー）
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// 一部の課題が失敗したときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 1件でも失敗したらバッチ全体を失敗にする
    #[default]
    FailBatch,
    /// 成功した課題の行を返し、失敗した課題キーを報告する
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-batch" | "fail_batch" => Ok(FailurePolicy::FailBatch),
            "best-effort" | "best_effort" => Ok(FailurePolicy::BestEffort),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown failure policy {:?} (expected fail-batch or best-effort)",
                other
            ))),
        }
    }
}

/// 変更履歴取得の設定
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// 持続レート（リクエスト/秒）
    pub rate_per_second: u32,
    /// バースト許容量
    pub burst: u32,
    /// 1課題あたりの最大試行回数
    pub max_retries: u32,
    /// 429時の待機の基準値（試行回数倍される）
    pub retry_delay: Duration,
    /// 同時実行タスク数の上限
    pub max_in_flight: usize,
    pub failure_policy: FailurePolicy,
}

impl FetchConfig {
    pub fn new() -> Self {
        Self {
            rate_per_second: defaults::RATE_PER_SECOND,
            burst: defaults::BURST,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            max_in_flight: 50,
            failure_policy: FailurePolicy::FailBatch,
        }
    }

    pub fn rate_limit(mut self, rate_per_second: u32, burst: u32) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst = burst;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 取得結果
#[derive(Debug, Clone, Default)]
pub struct ChangelogBatch {
    pub rows: Vec<ChangelogRow>,
    /// BestEffort時に失敗した課題キー（ソート済み）
    pub failed_issue_keys: Vec<String>,
}

#[derive(Clone)]
pub struct ChangelogFetcher {
    client: TrackerClient,
    limiter: SharedRateLimiter,
    config: FetchConfig,
    on_progress: Option<ProgressCallback>,
}

impl ChangelogFetcher {
    pub fn new(client: TrackerClient, config: FetchConfig) -> Result<Self> {
        if config.max_retries == 0 {
            return Err(Error::InvalidConfiguration(
                "max retries must be greater than zero".to_string(),
            ));
        }
        if config.max_in_flight == 0 {
            return Err(Error::InvalidConfiguration(
                "max in-flight must be greater than zero".to_string(),
            ));
        }

        let limiter = SharedRateLimiter::new(config.rate_per_second, config.burst)?;
        Ok(Self {
            client,
            limiter,
            config,
            on_progress: None,
        })
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// 全課題の変更履歴を取得
    ///
    /// すべてのタスクの完了を待ってから結果を判定する。
    pub async fn fetch_all(
        &self,
        issues: &[Issue],
        cancel: &CancellationToken,
    ) -> Result<ChangelogBatch> {
        let total = issues.len();
        if total == 0 {
            return Ok(ChangelogBatch::default());
        }
        info!(
            total_issues = total,
            max_in_flight = self.config.max_in_flight,
            "Starting fetching changelogs"
        );

        // 各タスクは各チャネルに高々1回しか送らないので、送信側は詰まらない
        let capacity = total.max(1);
        let (rows_tx, mut rows_rx) = mpsc::channel::<Vec<ChangelogRow>>(capacity);
        let (err_tx, mut err_rx) = mpsc::channel::<(String, Error)>(capacity);
        let (progress_tx, progress_rx) = mpsc::channel::<String>(capacity);

        let reporter = tokio::spawn(report_progress(
            progress_rx,
            total,
            self.on_progress.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut tasks = JoinSet::new();
        for issue in issues {
            let fetcher = self.clone();
            let issue_key = issue.key.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let rows_tx = rows_tx.clone();
            let err_tx = err_tx.clone();
            let progress_tx = progress_tx.clone();

            tasks.spawn(async move {
                let result = match acquire_slot(semaphore, &cancel).await {
                    Ok(_permit) => fetcher.fetch_issue(&issue_key, &cancel).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(rows) => {
                        let _ = rows_tx.send(rows).await;
                    }
                    Err(e) => {
                        let _ = err_tx.send((issue_key.clone(), e)).await;
                    }
                }
                let _ = progress_tx.send(issue_key).await;
            });
        }
        drop(rows_tx);
        drop(err_tx);
        drop(progress_tx);

        let mut panicked = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Changelog task did not complete");
                panicked += 1;
            }
        }
        // 全送信側が閉じたので、報告タスクも終了する
        let _ = reporter.await;

        let mut rows = Vec::new();
        while let Some(mut batch) = rows_rx.recv().await {
            rows.append(&mut batch);
        }
        let mut failures = Vec::new();
        while let Some(failure) = err_rx.recv().await {
            failures.push(failure);
        }

        if cancel.is_cancelled() || failures.iter().any(|(_, e)| e.is_cancelled()) {
            info!(
                completed = total - failures.len(),
                total, "Changelog fetch cancelled"
            );
            return Err(Error::Cancelled);
        }
        if panicked > 0 {
            return Err(Error::Unexpected(format!(
                "{} of {} changelog tasks did not complete",
                panicked, total
            )));
        }

        self.finish(rows, failures, total)
    }

    fn finish(
        &self,
        rows: Vec<ChangelogRow>,
        mut failures: Vec<(String, Error)>,
        total: usize,
    ) -> Result<ChangelogBatch> {
        if failures.is_empty() {
            info!(total_changelogs = rows.len(), "Finished fetching all changelogs");
            return Ok(ChangelogBatch {
                rows,
                failed_issue_keys: Vec::new(),
            });
        }

        failures.sort_by(|a, b| a.0.cmp(&b.0));
        match self.config.failure_policy {
            FailurePolicy::FailBatch => {
                let failed = failures.len();
                let (_, source) = failures.swap_remove(0);
                Err(Error::ChangelogBatchFailed {
                    failed,
                    total,
                    source: Box::new(source),
                })
            }
            FailurePolicy::BestEffort => {
                for (issue_key, error) in &failures {
                    warn!(issue_key = %issue_key, error = %error, "Skipping issue after failed changelog fetch");
                }
                let failed_issue_keys: Vec<String> =
                    failures.into_iter().map(|(key, _)| key).collect();
                info!(
                    total_changelogs = rows.len(),
                    failed_issues = failed_issue_keys.len(),
                    "Finished fetching changelogs with failures"
                );
                Ok(ChangelogBatch {
                    rows,
                    failed_issue_keys,
                })
            }
        }
    }

    /// 1課題分の変更履歴を再試行付きで取得し、行に展開
    ///
    /// 429は `retry_delay × 試行回数` 待ってから、それ以外の失敗は待たずに
    /// 再試行する。最後の試行の後は待たない。
    pub async fn fetch_issue(
        &self,
        issue_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangelogRow>> {
        let max_retries = self.config.max_retries;
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let fetch_once = move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.limiter.acquire(cancel).await?;
            let events = cancellable(cancel, self.client.get_changelog(issue_key)).await?;
            let rows: Vec<ChangelogRow> = events
                .into_iter()
                .flat_map(|event| event.into_rows(issue_key))
                .collect();
            debug!(issue_key, attempt, rows = rows.len(), "Fetched changelog");
            Ok::<_, Error>(rows)
        };

        let retrying = fetch_once
            .retry(retry_backoff(max_retries, self.config.retry_delay))
            .when(|e: &Error| !e.is_cancelled())
            .adjust(|e: &Error, delay: Option<Duration>| {
                if e.is_rate_limited() {
                    delay
                } else {
                    delay.map(|_| Duration::ZERO)
                }
            })
            .notify(|e: &Error, delay: Duration| {
                let attempt = attempts.load(Ordering::SeqCst);
                if e.is_rate_limited() {
                    warn!(issue_key, attempt, max_retries, ?delay, "Rate limit exceeded, retrying");
                } else {
                    debug!(issue_key, attempt, error = %e, "Changelog request failed, retrying");
                }
            });

        // バックオフ中の待機もキャンセルで打ち切る
        match cancellable(cancel, retrying).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::MaxRetriesExceeded {
                issue_key: issue_key.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
                source: Box::new(e),
            }),
        }
    }
}

/// 試行 `a` の失敗後に `retry_delay × a` 待つバックオフ列
///
/// 長さは `max_retries - 1` なので、最後の試行の後は待たない。
fn retry_backoff(max_retries: u32, retry_delay: Duration) -> std::vec::IntoIter<Duration> {
    (1..max_retries)
        .map(|attempt| retry_delay.saturating_mul(attempt))
        .collect::<Vec<_>>()
        .into_iter()
}

async fn acquire_slot(
    semaphore: Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        permit = semaphore.acquire_owned() => {
            permit.map_err(|_| Error::Unexpected("in-flight semaphore closed".to_string()))
        }
    }
}

async fn report_progress(
    mut progress_rx: mpsc::Receiver<String>,
    total: usize,
    on_progress: Option<ProgressCallback>,
) -> usize {
    let mut processed = 0usize;
    while let Some(issue_key) = progress_rx.recv().await {
        processed += 1;
        if processed % 10 == 0 || processed == total {
            debug!(
                processed,
                total,
                percentage = processed * 100 / total,
                "Progress update"
            );
        }
        if let Some(callback) = &on_progress {
            callback(processed, total, &issue_key);
        }
    }
    processed
}
