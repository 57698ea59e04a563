use serde::{Deserialize, Serialize};

use super::time::empty_as_none;

/// 組織単位のステータス定義（`GET /statuses/`）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusType {
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
    pub id: i64,
    #[serde(default)]
    pub version: Option<i64>,
    pub key: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    /// ステータスの分類（例：`new`、`inProgress`、`done`）
    #[serde(rename = "type", default, deserialize_with = "empty_as_none")]
    pub status_type: Option<String>,
}

impl StatusType {
    /// 永続化時の識別子（数値IDのテキスト表現）
    pub fn tracker_id(&self) -> String {
        self.id.to_string()
    }
}
