use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change_value::ChangeValue;
use super::issue::Entity;
use super::time::{empty_as_none, lenient_string, null_as_empty, tracker_time};

/// `GET /issues/{key}/changelog` が返す変更イベント
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: String,
    #[serde(default)]
    pub issue: Option<IssueRef>,
    #[serde(default, with = "tracker_time")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<Entity>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub fields: Vec<FieldChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRef {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub key: Option<String>,
}

/// 1つの変更イベント内の、1フィールド分の変更
#[derive(Debug, Clone, Deserialize)]
pub struct FieldChange {
    pub field: FieldRef,
    #[serde(default)]
    pub from: ChangeValue,
    #[serde(default)]
    pub to: ChangeValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRef {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

/// 永続化する変更履歴の1行（イベント × フィールド）
///
/// 同一性は `(tracker_id, field_display)` の組。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogRow {
    /// 変更イベントのID
    pub tracker_id: String,
    pub issue_key: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by_display: String,
    pub change_type: String,
    pub field_display: String,
    pub from_display: String,
    pub to_display: String,
    pub worklog: String,
}

impl ChangeEvent {
    /// フィールド単位の行に展開
    ///
    /// 表示名のないフィールドはスキップする。イベントに課題キーがなければ
    /// `fallback_issue_key` を使う。
    pub fn into_rows(self, fallback_issue_key: &str) -> Vec<ChangelogRow> {
        let issue_key = self
            .issue
            .and_then(|issue| issue.key)
            .unwrap_or_else(|| fallback_issue_key.to_string());
        let updated_by_display = self
            .updated_by
            .and_then(|user| user.display)
            .unwrap_or_default();
        let change_type = self.event_type.unwrap_or_default();

        self.fields
            .into_iter()
            .filter_map(|change| {
                let field_display = change.field.display.filter(|d| !d.is_empty())?;
                Some(ChangelogRow {
                    tracker_id: self.id.clone(),
                    issue_key: issue_key.clone(),
                    updated_at: self.updated_at,
                    updated_by_display: updated_by_display.clone(),
                    change_type: change_type.clone(),
                    field_display,
                    from_display: change.from.display(),
                    to_display: change.to.display(),
                    worklog: String::new(),
                })
            })
            .collect()
    }
}
