use crate::error::Result;
use crate::models::{ChangelogRow, Issue, StatusType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 同期先ストアの抽象化トレイト
///
/// 保存系はエンティティ種別ごとに1トランザクションで冪等にupsertする。
/// 1行でも失敗したらその種別のバッチ全体をロールバックする。
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// スキーマを作成（既にあれば何もしない）
    async fn initialize(&self) -> Result<()>;

    /// 課題を保存（衝突キーは `tracker_id`）
    async fn save_issues(&self, issues: &[Issue]) -> Result<usize>;

    /// 変更履歴を保存（衝突キーは `(tracker_id, field_display)`）
    async fn save_changelogs(&self, rows: &[ChangelogRow]) -> Result<usize>;

    /// ステータス定義を保存（衝突キーは `(tracker_id, status_key)`）
    async fn save_status_types(&self, status_types: &[StatusType]) -> Result<usize>;

    /// 課題キーの最新の `updated_at`（行がなければ `None`）
    async fn last_update_time(&self, issue_key: &str) -> Result<Option<DateTime<Utc>>>;

    /// 課題キーの変更履歴を読み込み
    async fn load_changelogs(&self, issue_key: &str) -> Result<Vec<ChangelogRow>>;

    /// ストレージの統計情報を取得
    async fn get_stats(&self) -> Result<StorageStats>;
}

/// エンティティ種別ごとの行数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub issues: usize,
    pub changelogs: usize,
    pub status_types: usize,
}

impl StorageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_rows(&self) -> usize {
        self.issues + self.changelogs + self.status_types
    }
}
