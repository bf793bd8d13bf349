//! One-shot operations on a selected row: function invocation, log reads and
//! table item queries. Results are rendered as plain text for the output overlay.

use anyhow::anyhow;
use chrono::{Local, TimeZone};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::loader::compact_error;
use crate::model::LogSource;
use crate::service::ResourceActions;

pub const LOG_FETCH_LIMIT: usize = 100;
pub const LOG_LOOKBACK: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_ITEM_LIMIT: usize = 25;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Invocation {
    pub function: String,
    pub status_code: i64,
    pub executed_version: Option<String>,
    pub function_error: Option<String>,
    pub payload: String,
    pub log_tail: Option<String>,
    pub duration: Duration,
}

impl Invocation {
    pub fn failed(&self) -> bool {
        self.function_error.is_some() || self.status_code >= 300
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("status: {}", self.status_code),
            format!(
                "version: {}",
                self.executed_version.as_deref().unwrap_or("-")
            ),
            format!("duration: {}ms", self.duration.as_millis()),
        ];
        if let Some(error) = &self.function_error {
            lines.push(format!("error: {error}"));
        }
        lines.push(String::new());
        lines.push("payload:".to_string());
        lines.push(pretty_json(&self.payload));
        if let Some(tail) = self.log_tail.as_deref().filter(|tail| !tail.trim().is_empty()) {
            lines.push(String::new());
            lines.push("log tail:".to_string());
            lines.push(tail.trim_end().to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub stream: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LogBatch {
    pub events: Vec<LogEvent>,
}

impl LogBatch {
    pub fn last_timestamp(&self) -> Option<i64> {
        self.events.iter().map(|event| event.timestamp_ms).max()
    }

    pub fn render(&self) -> String {
        self.events
            .iter()
            .map(|event| {
                let at = Local
                    .timestamp_millis_opt(event.timestamp_ms)
                    .single()
                    .map(|time| time.format("%H:%M:%S%.3f").to_string())
                    .unwrap_or_else(|| event.timestamp_ms.to_string());
                match &event.stream {
                    Some(stream) => format!(
                        "{at} [{}] {}",
                        short_stream(stream),
                        event.message.trim_end()
                    ),
                    None => format!("{at} {}", event.message.trim_end()),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ItemFilter {
    Scan,
    /// Equality on a key attribute. Without a name the partition key is used.
    KeyEquals { key: Option<String>, value: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ItemQuery {
    pub table: String,
    pub filter: ItemFilter,
    pub limit: usize,
    pub next_token: Option<String>,
}

impl ItemQuery {
    pub fn scan(table: impl Into<String>, limit: usize) -> Self {
        Self {
            table: table.into(),
            filter: ItemFilter::Scan,
            limit: limit.max(1),
            next_token: None,
        }
    }

    pub fn key_equals(
        table: impl Into<String>,
        key: Option<String>,
        value: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            table: table.into(),
            filter: ItemFilter::KeyEquals {
                key,
                value: value.into(),
            },
            limit: limit.max(1),
            next_token: None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.filter {
            ItemFilter::Scan => format!("scan {}", self.table),
            ItemFilter::KeyEquals { key: Some(key), value } => {
                format!("query {} {key}={value}", self.table)
            }
            ItemFilter::KeyEquals { key: None, value } => {
                format!("query {} {value}", self.table)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

impl ItemPage {
    pub fn has_more(&self) -> bool {
        self.next_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    pub fn render(&self, first_index: usize) -> String {
        self.items
            .iter()
            .enumerate()
            .map(|(offset, item)| {
                let body = serde_json::to_string_pretty(&unmarshal(item))
                    .unwrap_or_else(|_| item.to_string());
                format!("# {}\n{body}", first_index + offset + 1)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Converts a typed attribute map (`{"S": "x"}` style) into plain JSON.
pub fn unmarshal(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    if map.len() == 1
        && let Some((tag, inner)) = map.iter().next()
    {
        match (tag.as_str(), inner) {
            ("S", Value::String(text)) | ("B", Value::String(text)) => {
                return Value::String(text.clone());
            }
            ("N", Value::String(number)) => {
                return serde_json::from_str::<Value>(number)
                    .ok()
                    .filter(Value::is_number)
                    .unwrap_or_else(|| Value::String(number.clone()));
            }
            ("BOOL", Value::Bool(flag)) => return Value::Bool(*flag),
            ("NULL", _) => return Value::Null,
            ("L", Value::Array(items)) => return Value::Array(items.iter().map(unmarshal).collect()),
            ("M", Value::Object(_)) => return unmarshal_map(inner),
            ("SS" | "BS", Value::Array(items)) => return Value::Array(items.clone()),
            ("NS", Value::Array(items)) => {
                return Value::Array(
                    items
                        .iter()
                        .map(|item| unmarshal(&serde_json::json!({ "N": item })))
                        .collect(),
                );
            }
            _ => {}
        }
    }
    unmarshal_map(value)
}

fn unmarshal_map(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    Value::Object(
        map.iter()
            .map(|(key, inner)| (key.clone(), unmarshal(inner)))
            .collect::<Map<_, _>>(),
    )
}

/// Streams are named `prefix/container/task`; the task part is enough to tell them apart.
fn short_stream(stream: &str) -> &str {
    stream.rsplit('/').next().unwrap_or(stream)
}

fn pretty_json(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| raw.to_string())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ActionRequest {
    Invoke {
        function: String,
        payload: Option<String>,
    },
    Logs {
        source: LogSource,
        since_ms: i64,
    },
    Items(ItemQuery),
}

#[derive(Debug)]
pub enum ActionOutcome {
    Invoked {
        function: String,
        result: Result<Invocation, String>,
    },
    Logs {
        source: LogSource,
        result: Result<LogBatch, String>,
    },
    Items {
        query: ItemQuery,
        result: Result<ItemPage, String>,
    },
}

/// Runs one request against the backend, bounded by `call_timeout`.
pub async fn run_action<A: ResourceActions>(
    actions: &A,
    request: ActionRequest,
    call_timeout: Duration,
) -> ActionOutcome {
    let timed_out = || anyhow!("timed out after {}s", call_timeout.as_secs());
    match request {
        ActionRequest::Invoke { function, payload } => {
            debug!("invoking {function}");
            let result = match timeout(
                call_timeout,
                actions.invoke_function(&function, payload.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            };
            ActionOutcome::Invoked {
                result: result.map_err(|error| {
                    warn!("invoke {function} failed: {error:#}");
                    compact_error(&error)
                }),
                function,
            }
        }
        ActionRequest::Logs { source, since_ms } => {
            let result = match timeout(
                call_timeout,
                actions.fetch_logs(&source, since_ms, LOG_FETCH_LIMIT),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            };
            ActionOutcome::Logs {
                result: result.map_err(|error| {
                    warn!("reading logs from {} failed: {error:#}", source.group);
                    compact_error(&error)
                }),
                source,
            }
        }
        ActionRequest::Items(query) => {
            let result = match timeout(call_timeout, actions.query_items(&query)).await {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            };
            ActionOutcome::Items {
                result: result.map_err(|error| {
                    warn!("{} failed: {error:#}", query.describe());
                    compact_error(&error)
                }),
                query,
            }
        }
    }
}
