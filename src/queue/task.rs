use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const FRONT_MATTER_START: &str = "---\n";
const FRONT_MATTER_END: &str = "\n---\n";

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Task front matter. Unknown keys survive a read/rewrite cycle in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(alias = "from", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Mirror of the containing queue. Never read to decide state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A task file: YAML front matter plus a freeform Markdown body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    pub meta: TaskMeta,
    pub body: String,
}

impl Task {
    pub fn new(meta: TaskMeta, body: impl Into<String>) -> Self {
        Self {
            meta,
            body: body.into(),
        }
    }

    /// Parse a task file. A file without a front matter block, or whose front
    /// matter is not valid YAML for [`TaskMeta`], is an error.
    pub fn parse(input: &str) -> Result<Self, String> {
        let normalized;
        let input = if input.contains("\r\n") {
            normalized = input.replace("\r\n", "\n");
            normalized.as_str()
        } else {
            input
        };

        let rest = input
            .strip_prefix(FRONT_MATTER_START)
            .ok_or_else(|| "missing front matter".to_string())?;
        let (yaml, body) = match rest.split_once(FRONT_MATTER_END) {
            Some(parts) => parts,
            None => rest
                .strip_suffix("\n---")
                .map(|yaml| (yaml, ""))
                .ok_or_else(|| "unterminated front matter".to_string())?,
        };

        let meta = if yaml.trim().is_empty() {
            TaskMeta::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|error| error.to_string())?
        };

        Ok(Self {
            meta,
            body: body.to_string(),
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let yaml = serde_yaml::to_string(&self.meta)?;
        let mut output = String::with_capacity(yaml.len() + self.body.len() + 16);
        output.push_str(FRONT_MATTER_START);
        output.push_str(yaml.trim_end());
        output.push_str(FRONT_MATTER_END);
        output.push_str(&self.body);
        if !self.body.is_empty() && !self.body.ends_with('\n') {
            output.push('\n');
        }
        Ok(output)
    }
}
