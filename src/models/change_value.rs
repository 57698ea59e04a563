use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 変更履歴の参照値（ユーザー、ステータス、スプリントなど）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// 上流ID（数値IDも文字列に正規化）
    pub id: Option<String>,
    /// 表示名
    pub display: String,
}

/// changelogの `from` / `to` に現れる値
///
/// 上流はフィールドごとに形の違う値を返すため、デコード時に一度だけ
/// 構造を判定してこのバリアントに分類する。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChangeValue {
    /// `null` または値なし
    #[default]
    Empty,
    /// 文字列・数値・真偽値
    Scalar(String),
    /// `display` を持つ単一の参照
    Reference(Reference),
    /// 参照の配列（元の順序を保持）
    ReferenceList(Vec<Reference>),
    /// ボードの配列（`{"id": 12}` のように表示名を持たない）
    BoardList(Vec<i64>),
    /// 上記に当てはまらない値
    Other(Value),
}

impl ChangeValue {
    /// JSON値の構造を判定して分類
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Null => ChangeValue::Empty,
            Value::String(s) => ChangeValue::Scalar(s),
            Value::Number(n) => ChangeValue::Scalar(n.to_string()),
            Value::Bool(b) => ChangeValue::Scalar(b.to_string()),
            Value::Object(_) => match reference_of(&value) {
                Some(reference) => ChangeValue::Reference(reference),
                None => ChangeValue::Other(value),
            },
            Value::Array(items) => Self::classify_array(items),
        }
    }

    fn classify_array(items: Vec<Value>) -> Self {
        if items.is_empty() {
            return ChangeValue::ReferenceList(Vec::new());
        }

        let board_ids: Option<Vec<i64>> = items.iter().map(board_id_of).collect();
        if let Some(ids) = board_ids {
            return ChangeValue::BoardList(ids);
        }

        let references: Vec<Reference> = items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(Reference {
                    id: None,
                    display: s.clone(),
                }),
                other => reference_of(other),
            })
            .collect();

        if references.is_empty() {
            ChangeValue::Other(Value::Array(items))
        } else {
            ChangeValue::ReferenceList(references)
        }
    }

    /// 表示用の文字列に正規化
    pub fn display(&self) -> String {
        match self {
            ChangeValue::Empty => String::new(),
            ChangeValue::Scalar(s) => s.clone(),
            ChangeValue::Reference(r) => r.display.clone(),
            ChangeValue::ReferenceList(refs) => refs
                .iter()
                .map(|r| r.display.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            ChangeValue::BoardList(ids) => ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            ChangeValue::Other(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChangeValue::Empty)
    }
}

impl<'de> Deserialize<'de> for ChangeValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(ChangeValue::classify)
    }
}

fn reference_of(value: &Value) -> Option<Reference> {
    let object = value.as_object()?;
    let display = object.get("display")?.as_str()?;
    let id = match object.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Some(Reference {
        id,
        display: display.to_string(),
    })
}

fn board_id_of(value: &Value) -> Option<i64> {
    let object = value.as_object()?;
    if object.contains_key("display") {
        return None;
    }
    object.get("id")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_for_basic_shapes() {
        // Given: 上流が返しうる代表的な形
        let cases = vec![
            (json!(null), ""),
            (json!("x"), "x"),
            (json!({"display": "A"}), "A"),
            (json!([{"display": "A"}, {"display": "B"}]), "A, B"),
        ];

        // When/Then: 表示文字列に正規化される
        for (input, expected) in cases {
            assert_eq!(ChangeValue::classify(input).display(), expected);
        }
    }

    #[test]
    fn test_classify_reference_with_numeric_id() {
        let value = ChangeValue::classify(json!({
            "self": "https://api.tracker.yandex.net/v2/statuses/3",
            "id": 3,
            "key": "inProgress",
            "display": "В работе"
        }));

        assert_eq!(
            value,
            ChangeValue::Reference(Reference {
                id: Some("3".to_string()),
                display: "В работе".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_board_list() {
        let value = ChangeValue::classify(json!([{"id": 12}, {"id": 34}]));

        assert_eq!(value, ChangeValue::BoardList(vec![12, 34]));
        assert_eq!(value.display(), "12, 34");
    }

    #[test]
    fn test_reference_list_keeps_order_and_skips_unnamed_items() {
        let value = ChangeValue::classify(json!([
            {"id": "u2", "display": "Bob"},
            {"id": "u1"},
            {"id": "u3", "display": "Alice"}
        ]));

        assert_eq!(value.display(), "Bob, Alice");
    }

    #[test]
    fn test_string_list_renders_like_reference_list() {
        // タグなどは文字列の配列で届く
        let value = ChangeValue::classify(json!(["backend", "urgent"]));

        assert!(matches!(value, ChangeValue::ReferenceList(_)));
        assert_eq!(value.display(), "backend, urgent");
    }

    #[test]
    fn test_unrecognized_shapes_degrade_to_text() {
        // 数値と真偽値はそのまま文字列化
        assert_eq!(ChangeValue::classify(json!(42)).display(), "42");
        assert_eq!(ChangeValue::classify(json!(true)).display(), "true");

        // displayを持たないオブジェクトはJSONテキスト
        let other = ChangeValue::classify(json!({"unit": "h"}));
        assert!(matches!(other, ChangeValue::Other(_)));
        assert_eq!(other.display(), r#"{"unit":"h"}"#);

        // 空配列は空文字列
        assert_eq!(ChangeValue::classify(json!([])).display(), "");
    }

    #[test]
    fn test_deserialize_missing_and_null() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            from: ChangeValue,
            #[serde(default)]
            to: ChangeValue,
        }

        let holder: Holder = serde_json::from_value(json!({"to": null})).unwrap();
        assert!(holder.from.is_empty());
        assert!(holder.to.is_empty());
    }
}
