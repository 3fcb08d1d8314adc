//! Bitable record search wire types.
//!
//! Responses are modelled with optional fields throughout: anything missing
//! or of an unexpected shape is treated as absent rather than as an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use whitesync_core::config::{FieldMapping, FilterCondition};
use whitesync_core::Record;

/// Body of a `records/search` request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchRequest {
    pub filter: SearchFilter,
    pub page_size: u32,
    pub field_names: Vec<String>,
    /// Ask the store to include `created_time`, used as the dedup tie-break.
    pub automatic_fields: bool,
}

/// Conjunction of conditions, evaluated by the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchFilter {
    pub conjunction: String,
    pub conditions: Vec<FilterCondition>,
}

impl SearchRequest {
    /// All `conditions` must hold.
    pub fn all_of(conditions: Vec<FilterCondition>, fields: &FieldMapping, page_size: u32) -> Self {
        Self {
            filter: SearchFilter {
                conjunction: "and".to_string(),
                conditions,
            },
            page_size,
            field_names: fields.names(),
            automatic_fields: true,
        }
    }

    /// Exact match on the QQ number column.
    pub fn by_qq_number(qq: &str, fields: &FieldMapping, page_size: u32) -> Self {
        Self::all_of(
            vec![FilterCondition {
                field_name: fields.qq_number.clone(),
                operator: "is".to_string(),
                value: vec![Value::from(qq)],
            }],
            fields,
            page_size,
        )
    }
}

/// Common Feishu response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Absent on bodies that did not come from the API.
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

/// `data` of a search response.
#[derive(Debug, Default, Deserialize)]
pub struct SearchData {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// One row as returned by the store.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    #[serde(default)]
    pub created_time: Option<i64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RawItem>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<RawItem>>::deserialize(deserializer)?.unwrap_or_default())
}

impl RawItem {
    /// Convert to a [`Record`] using the configured column names.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_record(&self, fields: &FieldMapping) -> Record {
        let text = |name: &str| {
            self.fields
                .get(name)
                .and_then(cell_text)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        Record {
            external_id: self.record_id.clone().unwrap_or_default(),
            qq_number: text(&fields.qq_number),
            game_id: text(&fields.game_id),
            score: self.fields.get(&fields.score).and_then(cell_number),
            submitted_at: self
                .fields
                .get(&fields.submitted_at)
                .and_then(cell_number)
                .map(|ms| ms as i64),
            created_time: self.created_time.unwrap_or(0),
        }
    }
}

/// Text content of a cell.
///
/// Text cells arrive as arrays of `{"text": ..}` segments, which are
/// concatenated. Plain strings and numbers are accepted as-is.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(segments) => {
            let joined: String = segments
                .iter()
                .filter_map(|seg| match seg {
                    Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                    Value::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            (!joined.is_empty()).then_some(joined)
        }
        Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Numeric content of a cell.
///
/// Formula cells arrive as `{"type": .., "value": [n]}`; plain numbers and
/// numeric strings are accepted too.
pub fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) => items.first().and_then(cell_number),
        Value::Object(obj) => obj
            .get("value")
            .and_then(cell_number)
            .or_else(|| obj.get("text").and_then(cell_number)),
        _ => None,
    }
}
