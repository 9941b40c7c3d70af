//! Reduction of free-form JSON metadata to scalar-or-string values.
//!
//! Extraction pipelines attach whatever they find (page lists, header maps,
//! nulls). Only scalars and strings are stored next to a chunk.
//!
//! The engine stores [`Metadata`] as given. Ingestion attaches raw extractor
//! output through [`VectorRecord::with_json_metadata`](crate::types::VectorRecord::with_json_metadata),
//! which runs it through [`sanitize_json`]; callers building metadata some
//! other way sanitize it before `insert`.

use crate::types::{Metadata, MetadataValue};
use serde_json::Value;

/// Maximum length, in characters, of a flattened list or object.
pub const MAX_FLATTENED_CHARS: usize = 500;

/// Sanitize a JSON object into record metadata.
///
/// Non-object input yields empty metadata. Keys whose value sanitizes to
/// nothing are dropped.
pub fn sanitize_json(value: &Value) -> Metadata {
    let Value::Object(map) = value else {
        return Metadata::new();
    };

    map.iter()
        .filter_map(|(key, value)| sanitize_value(value).map(|v| (key.clone(), v)))
        .collect()
}

/// Sanitize a single JSON value.
pub fn sanitize_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(MetadataValue::Int(i))
            } else {
                n.as_f64().map(MetadataValue::Float)
            }
        }
        Value::String(s) => Some(MetadataValue::Text(s.clone())),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| match item {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string().trim().to_string(),
                })
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            non_empty_truncated(joined)
        }
        Value::Object(_) => {
            // serde_json maps are sorted by key unless preserve_order is enabled
            non_empty_truncated(value.to_string())
        }
    }
}

fn non_empty_truncated(s: String) -> Option<MetadataValue> {
    if s.is_empty() {
        return None;
    }
    Some(MetadataValue::Text(
        s.chars().take(MAX_FLATTENED_CHARS).collect(),
    ))
}
