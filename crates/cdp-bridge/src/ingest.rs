//! Event ingestion: normalizes the standard event streams into log entries.
//!
//! Four remote facilities feed the sink: runtime exceptions and console
//! output (`Runtime`), request/response lifecycle (`Network`), and
//! security-state changes (`Security`). Malformed payloads are logged and
//! dropped, never propagated.

use std::sync::Arc;
use std::time::Duration;

use deckhand_core_types::{LogCategory, LogEntry, LogLevel, LogSink};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::client::CdpClient;
use crate::error::CdpError;

const ENABLE_METHODS: [&str; 3] = ["Runtime.enable", "Network.enable", "Security.enable"];

/// Subscribe the standard event categories on `client`, appending normalized
/// entries to `sink`.
///
/// Idempotent per connection: the first caller wires the stream and later
/// callers return immediately, so a single remote event never produces more
/// than one entry. If enabling a facility fails the claim is released and the
/// error propagates, leaving the next caller free to retry.
pub async fn ensure_ingestion(
    client: &Arc<CdpClient>,
    sink: Arc<dyn LogSink>,
    deadline: Duration,
) -> Result<(), CdpError> {
    if !client.try_claim_ingestion() {
        return Ok(());
    }

    // Subscribe before enabling so nothing emitted in between is lost.
    let mut rx = client.subscribe();

    for method in ENABLE_METHODS {
        if let Err(err) = client
            .send(method, Value::Object(Default::default()), deadline)
            .await
        {
            client.release_ingestion_claim();
            return Err(err);
        }
    }

    let target_id = client.target_id().to_string();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(entry) = normalize(&event.method, &event.params) {
                        sink.append(entry);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "cdp-ingest", skipped, "event stream lagged; entries dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(target: "cdp-ingest", target_id, "ingestion stream ended");
    });

    Ok(())
}

/// Map one remote event onto a log entry. Returns `None` for methods outside
/// the four ingested categories and for payloads too malformed to use.
pub fn normalize(method: &str, params: &Value) -> Option<LogEntry> {
    match method {
        "Runtime.consoleAPICalled" => console_entry(params),
        "Runtime.exceptionThrown" => exception_entry(params),
        "Network.requestWillBeSent" => request_entry(params),
        "Network.responseReceived" => response_entry(params),
        "Network.loadingFailed" => loading_failed_entry(params),
        "Security.securityStateChanged" => security_entry(params),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ConsoleCalledParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    args: Vec<Value>,
}

fn console_entry(params: &Value) -> Option<LogEntry> {
    let payload: ConsoleCalledParams = decode("Runtime.consoleAPICalled", params)?;

    let level = match payload.kind.as_str() {
        "warning" => LogLevel::Warn,
        "error" | "assert" => LogLevel::Error,
        "debug" | "verbose" | "log" => LogLevel::Log,
        _ => LogLevel::Info,
    };

    let message = payload
        .args
        .iter()
        .map(render_remote_object)
        .collect::<Vec<_>>()
        .join(" ");

    Some(LogEntry::new(
        LogCategory::Console,
        level,
        message,
        "console",
    ))
}

/// Best-effort text for a Runtime.RemoteObject argument.
fn render_remote_object(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else if let Some(description) = arg.get("description").and_then(Value::as_str) {
        description.to_string()
    } else {
        String::from("<object>")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionThrownParams {
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    #[serde(default)]
    description: Option<String>,
}

fn exception_entry(params: &Value) -> Option<LogEntry> {
    let payload: ExceptionThrownParams = decode("Runtime.exceptionThrown", params)?;

    let message = payload
        .exception_details
        .exception
        .and_then(|ex| ex.description)
        .or(payload.exception_details.text)
        .unwrap_or_else(|| "runtime exception".to_string());

    Some(
        LogEntry::new(LogCategory::Runtime, LogLevel::Error, message, "runtime")
            .with_payload(params.clone()),
    )
}

#[derive(Debug, Deserialize)]
struct RequestWillBeSentParams {
    request: RequestPayload,
}

#[derive(Debug, Deserialize)]
struct RequestPayload {
    #[serde(default)]
    method: String,
    #[serde(default)]
    url: String,
}

fn request_entry(params: &Value) -> Option<LogEntry> {
    let payload: RequestWillBeSentParams = decode("Network.requestWillBeSent", params)?;
    Some(LogEntry::new(
        LogCategory::Network,
        LogLevel::Info,
        format!("{} {}", payload.request.method, payload.request.url),
        "network",
    ))
}

#[derive(Debug, Deserialize)]
struct ResponseReceivedParams {
    response: ResponsePayload,
}

#[derive(Debug, Deserialize)]
struct ResponsePayload {
    status: i64,
    #[serde(default)]
    url: String,
}

fn response_entry(params: &Value) -> Option<LogEntry> {
    let payload: ResponseReceivedParams = decode("Network.responseReceived", params)?;
    let status = payload.response.status;

    let level = if status >= 400 {
        LogLevel::Error
    } else if status >= 300 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    Some(LogEntry::new(
        LogCategory::Network,
        level,
        format!("{} {}", status, payload.response.url),
        "network",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFailedParams {
    #[serde(default)]
    error_text: String,
}

fn loading_failed_entry(params: &Value) -> Option<LogEntry> {
    let payload: LoadingFailedParams = decode("Network.loadingFailed", params)?;
    Some(LogEntry::new(
        LogCategory::Network,
        LogLevel::Error,
        format!("loading failed: {}", payload.error_text),
        "network",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityStateParams {
    security_state: String,
}

fn security_entry(params: &Value) -> Option<LogEntry> {
    let payload: SecurityStateParams = decode("Security.securityStateChanged", params)?;

    let level = if payload.security_state == "insecure" {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    Some(LogEntry::new(
        LogCategory::Security,
        level,
        format!("security state: {}", payload.security_state),
        "security",
    ))
}

fn decode<'de, T: Deserialize<'de>>(method: &str, params: &'de Value) -> Option<T> {
    match T::deserialize(params) {
        Ok(payload) => Some(payload),
        Err(err) => {
            debug!(target: "cdp-ingest", method, %err, "malformed event payload dropped");
            None
        }
    }
}
