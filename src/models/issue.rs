use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::time::{empty_as_none, lenient_string, null_as_empty, tracker_time};

/// `self` / `id` / `key` / `display` を持つ参照エンティティ
///
/// キュー、ステータス、優先度、ユーザーなど上流のほとんどの参照がこの形。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub display: Option<String>,
}

impl Entity {
    pub fn new(key: &str, display: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            display: Some(display.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// トラッカーの課題
///
/// 上流で省略された値・`null`・空文字列はすべて `None` になり、
/// 数値の 0 とは区別される。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// 上流の課題ID（upsertの衝突キー）
    pub id: String,
    /// 人間向けキー（例：PROJ-123）
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default)]
    pub issue_type: Option<Entity>,
    #[serde(default)]
    pub priority: Option<Entity>,
    #[serde(default)]
    pub status: Option<Entity>,
    #[serde(default)]
    pub previous_status: Option<Entity>,
    #[serde(default)]
    pub status_type: Option<Entity>,
    #[serde(default)]
    pub resolution: Option<Entity>,
    #[serde(default)]
    pub queue: Option<Entity>,
    #[serde(default)]
    pub last_queue: Option<Entity>,
    #[serde(default)]
    pub previous_queue: Option<Entity>,
    #[serde(default)]
    pub project: Option<Entity>,
    #[serde(default)]
    pub parent: Option<Entity>,
    #[serde(default)]
    pub epic: Option<Entity>,

    #[serde(default)]
    pub created_by: Option<Entity>,
    #[serde(default)]
    pub updated_by: Option<Entity>,
    #[serde(default)]
    pub assignee: Option<Entity>,
    #[serde(default)]
    pub resolved_by: Option<Entity>,
    #[serde(default)]
    pub qa_engineer: Option<Entity>,
    #[serde(default)]
    pub voted_by: Option<Entity>,
    #[serde(default)]
    pub previous_status_last_assignee: Option<Entity>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub sprint: Vec<Entity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub components: Vec<Entity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub followers: Vec<Entity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sla: Vec<Entity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub access: Vec<Entity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub boards: Vec<Board>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub aliases: Vec<String>,

    #[serde(default, with = "tracker_time")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "tracker_time")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "tracker_time")]
    pub status_start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "tracker_time")]
    pub last_comment_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "tracker_time")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub votes: Option<i64>,
    #[serde(default)]
    pub comment_with_external_message_count: Option<i64>,
    #[serde(default)]
    pub comment_without_external_message_count: Option<i64>,
    #[serde(default)]
    pub checklist_done: Option<i64>,
    #[serde(default)]
    pub checklist_total: Option<i64>,
    #[serde(default)]
    pub story_points: Option<f64>,
    #[serde(default)]
    pub favorite: Option<bool>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub original_estimation: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub estimation: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub spent: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub team_number: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub start: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub end: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub resolved_at: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub type_of_work: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub email_created_by: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub email_to: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub email_from: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub pending_reply_from: Option<String>,
}

/// 参照の表示名を取り出す
pub fn display_of(entity: &Option<Entity>) -> Option<String> {
    entity.as_ref().and_then(|e| e.display.clone())
}

/// 参照のキーを取り出す
pub fn key_of(entity: &Option<Entity>) -> Option<String> {
    entity.as_ref().and_then(|e| e.key.clone())
}

/// 参照リストの表示名を ", " で連結（空なら `None`）
pub fn join_displays(entities: &[Entity]) -> Option<String> {
    join_non_empty(entities.iter().filter_map(|e| e.display.as_deref()))
}

fn join_non_empty<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = values.collect::<Vec<_>>().join(", ");
    if joined.is_empty() { None } else { Some(joined) }
}

impl Issue {
    /// ボード名を ", " で連結
    pub fn board_names(&self) -> Option<String> {
        join_non_empty(self.boards.iter().filter_map(|b| b.name.as_deref()))
    }

    pub fn joined_tags(&self) -> Option<String> {
        join_non_empty(self.tags.iter().map(String::as_str))
    }

    pub fn joined_aliases(&self) -> Option<String> {
        join_non_empty(self.aliases.iter().map(String::as_str))
    }
}
