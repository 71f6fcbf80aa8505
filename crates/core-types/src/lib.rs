//! Shared vocabulary for the deckhand crates.
//!
//! Leaf crate: opaque ids, the wire-level target description, and the
//! normalized log-entry model exchanged between the protocol bridge and the
//! process supervisor.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier for a managed process record. Unique for the lifetime of
/// the registry that minted it; never reused while the record exists.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AppId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a managed process record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopped,
    Crashed,
}

/// A single debuggable surface (page, worker) reported by a process's
/// debugging endpoint. Immutable snapshot; superseded wholesale on each
/// refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Connection address advertised by the endpoint, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
}

/// Category of a normalized log entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Console,
    Network,
    Runtime,
    Security,
}

/// Severity taxonomy remote vocabularies are mapped onto.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// One normalized event. Never mutated after append; buffer order is
/// insertion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub category: LogCategory,
    pub level: LogLevel,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    /// Tag naming where the entry came from (`console`, `stdout`, ...).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl LogEntry {
    pub fn new(
        category: LogCategory,
        level: LogLevel,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            category,
            level,
            message: message.into(),
            ts: now_ms(),
            source: source.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Capability that accepts normalized log entries. Event ingestion depends
/// only on this seam, not on any concrete buffer or record type.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_list_document() {
        let body = r#"[{"id":"A","type":"page","title":"Demo","url":"file:///x"}]"#;
        let targets: Vec<Target> = serde_json::from_str(body).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "A");
        assert_eq!(targets[0].kind, "page");
        assert!(targets[0].web_socket_debugger_url.is_none());
    }

    #[test]
    fn target_keeps_connection_address() {
        let body = r#"{"id":"B","type":"page","title":"","url":"","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/B"}"#;
        let target: Target = serde_json::from_str(body).unwrap();
        assert_eq!(
            target.web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/B")
        );
    }

    #[test]
    fn app_ids_are_unique() {
        let a = AppId::new();
        let b = AppId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Crashed).unwrap(),
            "\"crashed\""
        );
    }
}
