use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// One event reported by a source, before it becomes a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchItem {
    /// Source-native id. When empty a stable id is derived from the content.
    #[serde(default, deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(alias = "from", default)]
    pub source: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "item id must be a string or number, got {other}"
        ))),
    }
}

/// A pollable event source. `fetch` returns everything currently visible;
/// de-duplication happens in [`super::BaseWatcher`].
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn fetch<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<WatchItem>>> + Send + 'a>>;
}
