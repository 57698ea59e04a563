use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{ChangelogRow, Issue, StatusType, display_of, join_displays, key_of};
use crate::persistence::{PersistenceStore, StorageStats};

/// DuckDBに書き込む日時の形式
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// `strftime` で読み出すときの形式
const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%f";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS issues (
    organization_id VARCHAR NOT NULL,
    self_url VARCHAR,
    tracker_id VARCHAR NOT NULL UNIQUE CHECK (tracker_id <> ''),
    "key" VARCHAR NOT NULL,
    version BIGINT,
    story_points DOUBLE,
    summary VARCHAR,
    description VARCHAR,
    status_start_time TIMESTAMP,
    boards_names VARCHAR,
    created_at TIMESTAMP,
    comment_without_external_message_count BIGINT,
    votes BIGINT,
    comment_with_external_message_count BIGINT,
    deadline TIMESTAMP,
    updated_at TIMESTAMP,
    favorite BOOLEAN,
    updated_by_display VARCHAR,
    type_display VARCHAR,
    priority_display VARCHAR,
    created_by_display VARCHAR,
    assignee_display VARCHAR,
    queue_key VARCHAR,
    queue_display VARCHAR,
    status_display VARCHAR,
    previous_status_display VARCHAR,
    parent_key VARCHAR,
    parent_display VARCHAR,
    components_display VARCHAR,
    sprint_display VARCHAR,
    epic_display VARCHAR,
    previous_status_last_assignee_display VARCHAR,
    original_estimation VARCHAR,
    spent VARCHAR,
    tags VARCHAR,
    estimation VARCHAR,
    checklist_done BIGINT,
    checklist_total BIGINT,
    email_created_by VARCHAR,
    sla VARCHAR,
    email_to VARCHAR,
    email_from VARCHAR,
    last_comment_updated_at TIMESTAMP,
    followers VARCHAR,
    pending_reply_from VARCHAR,
    end_time VARCHAR,
    start_time VARCHAR,
    project_display VARCHAR,
    voted_by_display VARCHAR,
    aliases VARCHAR,
    previous_queue_display VARCHAR,
    access VARCHAR,
    resolved_at VARCHAR,
    resolved_by_display VARCHAR,
    resolution_display VARCHAR,
    last_queue_display VARCHAR,
    status_type VARCHAR,
    qa_engineer_display VARCHAR,
    type_of_work VARCHAR,
    team_number VARCHAR,
    updated_at_db TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS changelog (
    organization_id VARCHAR NOT NULL,
    tracker_id VARCHAR NOT NULL CHECK (tracker_id <> ''),
    issue_key VARCHAR NOT NULL,
    updated_at TIMESTAMP,
    updated_by_display VARCHAR,
    "type" VARCHAR,
    field_display VARCHAR NOT NULL,
    from_display VARCHAR,
    to_display VARCHAR,
    worklog VARCHAR,
    UNIQUE (tracker_id, field_display)
);

CREATE TABLE IF NOT EXISTS status_types (
    organization_id VARCHAR NOT NULL,
    tracker_id VARCHAR NOT NULL,
    status_key VARCHAR NOT NULL,
    status_type VARCHAR,
    status_name VARCHAR,
    updated_at_db TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (tracker_id, status_key)
);

CREATE INDEX IF NOT EXISTS idx_issues_key ON issues("key");
CREATE INDEX IF NOT EXISTS idx_changelog_issue_key ON changelog(issue_key);
"#;

const INSERT_ISSUE: &str = r#"
INSERT INTO issues (
    organization_id, self_url, tracker_id, "key", version, story_points, summary, description,
    status_start_time, boards_names, created_at, comment_without_external_message_count, votes,
    comment_with_external_message_count, deadline, updated_at, favorite, updated_by_display,
    type_display, priority_display, created_by_display, assignee_display, queue_key, queue_display,
    status_display, previous_status_display, parent_key, parent_display, components_display,
    sprint_display, epic_display, previous_status_last_assignee_display, original_estimation, spent,
    tags, estimation, checklist_done, checklist_total, email_created_by, sla, email_to, email_from,
    last_comment_updated_at, followers, pending_reply_from, end_time, start_time, project_display,
    voted_by_display, aliases, previous_queue_display, access, resolved_at, resolved_by_display,
    resolution_display, last_queue_display, status_type, qa_engineer_display, type_of_work, team_number
) VALUES (
    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
)
ON CONFLICT (tracker_id) DO UPDATE SET
    updated_at = EXCLUDED.updated_at,
    updated_at_db = now(),
    team_number = EXCLUDED.team_number
"#;

const INSERT_CHANGELOG: &str = r#"
INSERT INTO changelog (
    organization_id, tracker_id, issue_key, updated_at, updated_by_display,
    "type", field_display, from_display, to_display, worklog
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (tracker_id, field_display) DO UPDATE SET
    updated_at = EXCLUDED.updated_at,
    updated_by_display = EXCLUDED.updated_by_display,
    from_display = EXCLUDED.from_display,
    to_display = EXCLUDED.to_display,
    worklog = EXCLUDED.worklog
"#;

const INSERT_STATUS_TYPE: &str = r#"
INSERT INTO status_types (
    organization_id, tracker_id, status_key, status_type, status_name
) VALUES (?, ?, ?, ?, ?)
ON CONFLICT (tracker_id, status_key) DO UPDATE SET
    status_type = EXCLUDED.status_type,
    status_name = EXCLUDED.status_name,
    updated_at_db = now()
"#;

fn format_timestamp(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
                .map(|naive| naive.and_utc())
                .map_err(|e| Error::DatabaseError(format!("Invalid stored timestamp {:?}: {}", raw, e)))
        })
        .transpose()
}

fn db_error(context: &str) -> impl Fn(duckdb::Error) -> Error + '_ {
    move |e| Error::DatabaseError(format!("{}: {}", context, e))
}

/// 1トランザクションで `f` を実行（失敗したらロールバック）
fn in_transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute("BEGIN TRANSACTION", params![])
        .map_err(db_error("Failed to begin transaction"))?;

    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", params![])
                .map_err(db_error("Failed to commit transaction"))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", params![]);
            Err(e)
        }
    }
}

/// DuckDB形式のデータストア
#[derive(Clone)]
pub struct DuckDBStore {
    /// データベースファイルのパス
    db_path: PathBuf,
    /// 全行に付与する組織ID
    organization_id: String,
    /// DuckDB接続（スレッドセーフ）
    connection: Arc<Mutex<Connection>>,
}

impl DuckDBStore {
    /// 新しいDuckDBストアを作成（親ディレクトリがなければ作る）
    pub fn new<P: AsRef<Path>>(db_path: P, organization_id: impl Into<String>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(&db_path)
            .map_err(|e| Error::DatabaseError(format!("Failed to open DuckDB: {}", e)))?;

        Ok(Self {
            db_path,
            organization_id: organization_id.into(),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// インメモリデータベースを作成
    pub fn new_in_memory(organization_id: impl Into<String>) -> Result<Self> {
        let connection = Connection::open_in_memory().map_err(|e| {
            Error::DatabaseError(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            organization_id: organization_id.into(),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    /// ブロッキングスレッドで接続を使う
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.connection);

        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::DatabaseError("DuckDB connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::DatabaseError(format!("Task join error: {}", e)))?
    }
}

fn insert_issue(stmt: &mut duckdb::Statement<'_>, org: &str, issue: &Issue) -> duckdb::Result<usize> {
    stmt.execute(params![
        org,
        issue.self_url,
        issue.id,
        issue.key,
        issue.version,
        issue.story_points,
        issue.summary,
        issue.description,
        format_timestamp(&issue.status_start_time),
        issue.board_names(),
        format_timestamp(&issue.created_at),
        issue.comment_without_external_message_count,
        issue.votes,
        issue.comment_with_external_message_count,
        format_timestamp(&issue.deadline),
        format_timestamp(&issue.updated_at),
        issue.favorite,
        display_of(&issue.updated_by),
        display_of(&issue.issue_type),
        display_of(&issue.priority),
        display_of(&issue.created_by),
        display_of(&issue.assignee),
        key_of(&issue.queue),
        display_of(&issue.queue),
        display_of(&issue.status),
        display_of(&issue.previous_status),
        key_of(&issue.parent),
        display_of(&issue.parent),
        join_displays(&issue.components),
        join_displays(&issue.sprint),
        display_of(&issue.epic),
        display_of(&issue.previous_status_last_assignee),
        issue.original_estimation,
        issue.spent,
        issue.joined_tags(),
        issue.estimation,
        issue.checklist_done,
        issue.checklist_total,
        issue.email_created_by,
        join_displays(&issue.sla),
        issue.email_to,
        issue.email_from,
        format_timestamp(&issue.last_comment_updated_at),
        join_displays(&issue.followers),
        issue.pending_reply_from,
        issue.end,
        issue.start,
        display_of(&issue.project),
        display_of(&issue.voted_by),
        issue.joined_aliases(),
        display_of(&issue.previous_queue),
        join_displays(&issue.access),
        issue.resolved_at,
        display_of(&issue.resolved_by),
        display_of(&issue.resolution),
        display_of(&issue.last_queue),
        display_of(&issue.status_type),
        display_of(&issue.qa_engineer),
        issue.type_of_work,
        issue.team_number,
    ])
}

#[async_trait]
impl PersistenceStore for DuckDBStore {
    /// データベーススキーマを初期化
    async fn initialize(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(db_error("Schema creation failed"))
        })
        .await?;
        debug!(db_path = %self.db_path.display(), "Initialized DuckDB schema");
        Ok(())
    }

    async fn save_issues(&self, issues: &[Issue]) -> Result<usize> {
        info!(total_issues = issues.len(), "Starting save issues");
        let org = self.organization_id.clone();
        let issues = issues.to_vec();

        let saved = self
            .with_connection(move |conn| {
                in_transaction(conn, |conn| {
                    let mut stmt = conn
                        .prepare(INSERT_ISSUE)
                        .map_err(db_error("Failed to prepare issue insert"))?;
                    for issue in &issues {
                        insert_issue(&mut stmt, &org, issue).map_err(|e| {
                            Error::DatabaseError(format!(
                                "Failed to insert issue {}: {}",
                                issue.key, e
                            ))
                        })?;
                    }
                    Ok(issues.len())
                })
            })
            .await?;

        info!(total_issues = saved, "Successfully saved all issues");
        Ok(saved)
    }

    async fn save_changelogs(&self, rows: &[ChangelogRow]) -> Result<usize> {
        info!(total_changelogs = rows.len(), "Starting save changelogs");
        let org = self.organization_id.clone();
        let rows = rows.to_vec();

        let saved = self
            .with_connection(move |conn| {
                in_transaction(conn, |conn| {
                    let mut stmt = conn
                        .prepare(INSERT_CHANGELOG)
                        .map_err(db_error("Failed to prepare changelog insert"))?;
                    for row in &rows {
                        stmt.execute(params![
                            org,
                            row.tracker_id,
                            row.issue_key,
                            format_timestamp(&row.updated_at),
                            row.updated_by_display,
                            row.change_type,
                            row.field_display,
                            row.from_display,
                            row.to_display,
                            row.worklog,
                        ])
                        .map_err(|e| {
                            Error::DatabaseError(format!(
                                "Failed to insert changelog {} ({}) for issue {}: {}",
                                row.tracker_id, row.field_display, row.issue_key, e
                            ))
                        })?;
                    }
                    Ok(rows.len())
                })
            })
            .await?;

        info!(total_changelogs = saved, "Successfully saved all changelogs");
        Ok(saved)
    }

    async fn save_status_types(&self, status_types: &[StatusType]) -> Result<usize> {
        info!(total_status_types = status_types.len(), "Starting save status types");
        let org = self.organization_id.clone();
        let status_types = status_types.to_vec();

        let saved = self
            .with_connection(move |conn| {
                in_transaction(conn, |conn| {
                    let mut stmt = conn
                        .prepare(INSERT_STATUS_TYPE)
                        .map_err(db_error("Failed to prepare status type insert"))?;
                    for status in &status_types {
                        stmt.execute(params![
                            org,
                            status.tracker_id(),
                            status.key,
                            status.status_type,
                            status.name,
                        ])
                        .map_err(|e| {
                            Error::DatabaseError(format!(
                                "Failed to insert status type {}: {}",
                                status.key, e
                            ))
                        })?;
                    }
                    Ok(status_types.len())
                })
            })
            .await?;

        info!(total_status_types = saved, "Successfully saved all status types");
        Ok(saved)
    }

    async fn last_update_time(&self, issue_key: &str) -> Result<Option<DateTime<Utc>>> {
        let issue_key = issue_key.to_string();

        let raw = self
            .with_connection(move |conn| {
                let query = format!(
                    r#"SELECT strftime(updated_at, '{}') FROM issues
                       WHERE "key" = ? AND updated_at IS NOT NULL
                       ORDER BY updated_at DESC LIMIT 1"#,
                    SQL_TIMESTAMP_FORMAT
                );
                let mut stmt = conn
                    .prepare(&query)
                    .map_err(db_error("Failed to prepare last update query"))?;
                let mut rows = stmt
                    .query(params![issue_key])
                    .map_err(db_error("Failed to get last update time"))?;
                match rows.next().map_err(db_error("Failed to get last update time"))? {
                    Some(row) => row
                        .get::<_, Option<String>>(0)
                        .map_err(db_error("Failed to read last update time")),
                    None => Ok(None),
                }
            })
            .await?;

        parse_timestamp(raw)
    }

    async fn load_changelogs(&self, issue_key: &str) -> Result<Vec<ChangelogRow>> {
        let issue_key = issue_key.to_string();

        let raw_rows = self
            .with_connection(move |conn| {
                let query = format!(
                    r#"SELECT tracker_id, issue_key, strftime(updated_at, '{}'), updated_by_display,
                              "type", field_display, from_display, to_display, worklog
                       FROM changelog
                       WHERE issue_key = ?
                       ORDER BY updated_at NULLS FIRST, tracker_id, field_display"#,
                    SQL_TIMESTAMP_FORMAT
                );
                let mut stmt = conn
                    .prepare(&query)
                    .map_err(db_error("Failed to prepare changelog query"))?;
                let rows = stmt
                    .query_map(params![issue_key], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, Option<String>>(8)?,
                        ))
                    })
                    .map_err(db_error("Failed to load changelogs"))?;

                rows.collect::<duckdb::Result<Vec<_>>>()
                    .map_err(db_error("Failed to load changelogs"))
            })
            .await?;

        raw_rows
            .into_iter()
            .map(
                |(tracker_id, issue_key, updated_at, updated_by, change_type, field, from, to, worklog)| {
                    Ok(ChangelogRow {
                        tracker_id,
                        issue_key,
                        updated_at: parse_timestamp(updated_at)?,
                        updated_by_display: updated_by.unwrap_or_default(),
                        change_type: change_type.unwrap_or_default(),
                        field_display: field,
                        from_display: from.unwrap_or_default(),
                        to_display: to.unwrap_or_default(),
                        worklog: worklog.unwrap_or_default(),
                    })
                },
            )
            .collect()
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        self.with_connection(|conn| {
            let count = |table: &str| -> Result<usize> {
                let total: i64 = conn
                    .prepare(&format!("SELECT COUNT(*) FROM {}", table))
                    .and_then(|mut stmt| stmt.query_row(params![], |row| row.get(0)))
                    .map_err(db_error("Stats operation failed"))?;
                Ok(total as usize)
            };

            Ok(StorageStats {
                issues: count("issues")?,
                changelogs: count("changelog")?,
                status_types: count("status_types")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entity;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_test_issue(id: &str, key: &str, updated_hour: u32) -> Issue {
        Issue {
            id: id.to_string(),
            key: key.to_string(),
            summary: Some(format!("Summary of {}", key)),
            status: Some(Entity::new("open", "Open")),
            queue: Some(Entity::new("PROJ", "Project")),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 3, 29, updated_hour, 0, 0).unwrap()),
            votes: Some(0),
            team_number: Some("1".to_string()),
            ..Default::default()
        }
    }

    fn create_test_row(event_id: &str, issue_key: &str, field: &str, to: &str) -> ChangelogRow {
        ChangelogRow {
            tracker_id: event_id.to_string(),
            issue_key: issue_key.to_string(),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 3, 29, 19, 16, 33).unwrap()),
            updated_by_display: "Ivan Petrov".to_string(),
            change_type: "IssueWorkflow".to_string(),
            field_display: field.to_string(),
            from_display: String::new(),
            to_display: to.to_string(),
            worklog: String::new(),
        }
    }

    async fn initialized_store() -> DuckDBStore {
        let store = DuckDBStore::new_in_memory("org-1").unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_duckdb_store_new_creates_parent_dir() {
        // Given: 存在しないディレクトリ配下のパス
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("tracker.duckdb");

        // When: ストアを作成
        let store = DuckDBStore::new(&db_path, "org-1").unwrap();

        // Then: ファイルが作られる
        assert_eq!(store.db_path(), db_path.as_path());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = initialized_store().await;
        store.initialize().await.unwrap();

        assert_eq!(store.get_stats().await.unwrap(), StorageStats::default());
    }

    #[tokio::test]
    async fn test_save_issues_twice_keeps_one_row_per_issue() {
        // Given: 同じ課題を2回保存（2回目はupdated_atとteam_numberが変わる）
        let store = initialized_store().await;
        let first = vec![create_test_issue("a1", "PROJ-1", 10), create_test_issue("a2", "PROJ-2", 10)];
        store.save_issues(&first).await.unwrap();

        let mut refreshed = first.clone();
        refreshed[0].updated_at = Some(Utc.with_ymd_and_hms(2025, 3, 30, 8, 0, 0).unwrap());
        refreshed[0].team_number = Some("7".to_string());
        refreshed[0].summary = Some("Changed summary".to_string());

        // When: 再保存
        store.save_issues(&refreshed).await.unwrap();

        // Then: 行数は変わらず、updated_atは最新の値
        assert_eq!(store.get_stats().await.unwrap().issues, 2);
        assert_eq!(
            store.last_update_time("PROJ-1").await.unwrap(),
            Some(Utc.with_ymd_and_hms(2025, 3, 30, 8, 0, 0).unwrap())
        );

        // 衝突時に更新するのは決められた列だけ
        let (summary, team_number) = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT summary, team_number FROM issues WHERE tracker_id = 'a1'",
                    params![],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .map_err(db_error("query failed"))
            })
            .await
            .unwrap();
        assert_eq!(summary, "Summary of PROJ-1");
        assert_eq!(team_number, "7");
    }

    async fn issue_updated_at_db(store: &DuckDBStore, tracker_id: &str) -> String {
        let query = format!(
            "SELECT strftime(updated_at_db, '{}') FROM issues WHERE tracker_id = ?",
            SQL_TIMESTAMP_FORMAT
        );
        let tracker_id = tracker_id.to_string();
        store
            .with_connection(move |conn| {
                conn.query_row(&query, params![tracker_id], |row| row.get::<_, String>(0))
                    .map_err(db_error("query failed"))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_refreshes_updated_at_db() {
        // Given: 保存済みの課題
        let store = initialized_store().await;
        let issue = create_test_issue("a1", "PROJ-1", 10);
        store.save_issues(std::slice::from_ref(&issue)).await.unwrap();
        let first = issue_updated_at_db(&store, "a1").await;

        // When: 時間をおいて同じ課題を再保存
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        store.save_issues(&[issue]).await.unwrap();

        // Then: 衝突時の更新でupdated_at_dbが進む
        let second = issue_updated_at_db(&store, "a1").await;
        assert_ne!(first, second);
        assert!(parse_timestamp(Some(second)).unwrap() > parse_timestamp(Some(first)).unwrap());
    }

    #[tokio::test]
    async fn test_absent_values_are_stored_as_null() {
        let store = initialized_store().await;
        let issue = create_test_issue("a1", "PROJ-1", 10);
        store.save_issues(&[issue]).await.unwrap();

        let (votes, story_points, org) = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT votes, story_points, organization_id FROM issues WHERE tracker_id = 'a1'",
                    params![],
                    |row| {
                        Ok((
                            row.get::<_, Option<i64>>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .map_err(db_error("query failed"))
            })
            .await
            .unwrap();

        // 0はそのまま、省略はNULL
        assert_eq!(votes, Some(0));
        assert_eq!(story_points, None);
        assert_eq!(org, "org-1");
    }

    #[tokio::test]
    async fn test_failed_row_rolls_back_issue_batch() {
        // Given: 2件目のtracker_idが空（CHECK制約違反）
        let store = initialized_store().await;
        let batch = vec![create_test_issue("a1", "PROJ-1", 10), create_test_issue("", "PROJ-BAD", 10)];

        // When: 保存
        let result = store.save_issues(&batch).await;

        // Then: 失敗した課題が分かるエラーで、1件目も残らない
        match result {
            Err(Error::DatabaseError(msg)) => assert!(msg.contains("PROJ-BAD")),
            other => panic!("Expected DatabaseError, got {:?}", other),
        }
        assert_eq!(store.get_stats().await.unwrap().issues, 0);

        // ロールバック後も同じ接続で保存できる
        store
            .save_issues(&[create_test_issue("a1", "PROJ-1", 10)])
            .await
            .unwrap();
        assert_eq!(store.get_stats().await.unwrap().issues, 1);
    }

    #[tokio::test]
    async fn test_last_update_time_without_rows_is_none() {
        let store = initialized_store().await;
        assert_eq!(store.last_update_time("PROJ-404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_changelog_identity_is_event_and_field() {
        // Given: 同じイベントの2フィールドと、別イベントの同じフィールド
        let store = initialized_store().await;
        let rows = vec![
            create_test_row("e1", "PROJ-1", "Status", "In progress"),
            create_test_row("e1", "PROJ-1", "Assignee", "Ivan Petrov"),
            create_test_row("e2", "PROJ-1", "Status", "Closed"),
        ];
        store.save_changelogs(&rows).await.unwrap();

        // When: 同じ(イベント, フィールド)を値を変えて再保存
        let mut updated = rows[0].clone();
        updated.to_display = "Review".to_string();
        store.save_changelogs(&[updated]).await.unwrap();

        // Then: 重複せず、値だけ更新される
        let loaded = store.load_changelogs("PROJ-1").await.unwrap();
        assert_eq!(loaded.len(), 3);
        let status_e1 = loaded
            .iter()
            .find(|r| r.tracker_id == "e1" && r.field_display == "Status")
            .unwrap();
        assert_eq!(status_e1.to_display, "Review");
        assert_eq!(status_e1.updated_at, rows[0].updated_at);
        assert_eq!(status_e1.change_type, "IssueWorkflow");
    }

    #[tokio::test]
    async fn test_save_status_types_upserts() {
        let store = initialized_store().await;
        let mut statuses = vec![
            StatusType {
                id: 1,
                key: "open".to_string(),
                name: Some("Open".to_string()),
                status_type: Some("new".to_string()),
                ..Default::default()
            },
            StatusType {
                id: 2,
                key: "closed".to_string(),
                name: Some("Closed".to_string()),
                status_type: Some("done".to_string()),
                ..Default::default()
            },
        ];
        store.save_status_types(&statuses).await.unwrap();

        statuses[0].name = Some("Opened".to_string());
        store.save_status_types(&statuses).await.unwrap();

        assert_eq!(store.get_stats().await.unwrap().status_types, 2);
        let name = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT status_name FROM status_types WHERE tracker_id = '1' AND status_key = 'open'",
                    params![],
                    |row| row.get::<_, String>(0),
                )
                .map_err(db_error("query failed"))
            })
            .await
            .unwrap();
        assert_eq!(name, "Opened");
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        // Given: ファイルに保存
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("tracker.duckdb");
        {
            let store = DuckDBStore::new(&db_path, "org-1").unwrap();
            store.initialize().await.unwrap();
            store
                .save_issues(&[create_test_issue("a1", "PROJ-1", 10)])
                .await
                .unwrap();
        }

        // When: 開き直す
        let store = DuckDBStore::new(&db_path, "org-1").unwrap();
        store.initialize().await.unwrap();

        // Then: データが残っている
        assert_eq!(store.get_stats().await.unwrap().issues, 1);
        assert!(store.last_update_time("PROJ-1").await.unwrap().is_some());
    }
}
