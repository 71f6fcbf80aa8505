//! Collaborator-facing operations.
//!
//! The outer dispatch shell validates caller-supplied shapes and then calls
//! these typed entry points; the core assumes required fields are present
//! and well-typed once invoked.

use std::sync::Arc;

use cdp_bridge::DebugEndpoint;
use deckhand_core_types::{LogEntry, ProcessStatus};
use deckhand_supervisor::{
    DiscoverScope, ProcessRecord, StartOptions, Supervisor, SupervisorError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManageAction {
    Start,
    Stop,
    Reload,
    Connect,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageRequest {
    pub action: ManageAction,
    #[serde(default)]
    pub app_path: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub reconnect: Option<bool>,
}

/// Serializable view of a managed process record.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    pub id: String,
    pub status: ProcessStatus,
    pub debug_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_path: Option<String>,
    pub start_time: u64,
    pub adopted: bool,
    pub reconnect_attempts: u32,
}

impl AppSummary {
    pub fn from_record(record: &ProcessRecord) -> Self {
        Self {
            id: record.id.0.clone(),
            status: record.status(),
            debug_port: record.debug_port,
            app_path: record
                .app_path
                .as_ref()
                .map(|p| p.display().to_string()),
            start_time: record.start_time,
            adopted: record.is_adopted(),
            reconnect_attempts: record.reconnect_attempts(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<AppSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverResponse {
    pub managed: Vec<AppSummary>,
    pub network: Vec<DebugEndpoint>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
    /// Entries evicted by the buffer bound since the record was created.
    pub dropped: u64,
}

/// Start, stop, reload or adopt a managed application.
pub async fn manage_app(
    supervisor: &Arc<Supervisor>,
    request: ManageRequest,
) -> Result<ManageResponse, SupervisorError> {
    match request.action {
        ManageAction::Start => {
            let app_path = request.app_path.ok_or_else(|| {
                SupervisorError::Configuration("start requires appPath".into())
            })?;
            let record = supervisor
                .start(
                    app_path,
                    StartOptions {
                        debug_port: request.port,
                        reconnect: request.reconnect.unwrap_or(false),
                    },
                )
                .await?;
            Ok(ManageResponse {
                app: Some(AppSummary::from_record(&record)),
                stopped: None,
            })
        }
        ManageAction::Connect => {
            let port = request.port.ok_or_else(|| {
                SupervisorError::Configuration("connect requires port".into())
            })?;
            let record = supervisor.adopt(port).await?;
            Ok(ManageResponse {
                app: Some(AppSummary::from_record(&record)),
                stopped: None,
            })
        }
        ManageAction::Stop => {
            let app_id = request.app_id.ok_or_else(|| {
                SupervisorError::Configuration("stop requires appId".into())
            })?;
            let stopped = supervisor.stop(&app_id).await;
            Ok(ManageResponse {
                app: None,
                stopped: Some(stopped),
            })
        }
        ManageAction::Reload => {
            let app_id = request.app_id.ok_or_else(|| {
                SupervisorError::Configuration("reload requires appId".into())
            })?;
            let record = supervisor.reload(&app_id).await?;
            Ok(ManageResponse {
                app: Some(AppSummary::from_record(&record)),
                stopped: None,
            })
        }
    }
}

/// Snapshot managed records and/or probe well-known debugging ports.
pub async fn discover_apps(supervisor: &Arc<Supervisor>, scope: DiscoverScope) -> DiscoverResponse {
    let discovery = supervisor.discover(scope).await;
    DiscoverResponse {
        managed: discovery
            .managed
            .iter()
            .map(|record| AppSummary::from_record(record))
            .collect(),
        network: discovery.network,
    }
}

/// Execute one protocol command through the supervisor's funnel.
pub async fn execute_command(
    supervisor: &Arc<Supervisor>,
    app_id: &str,
    target_id: &str,
    domain: &str,
    command: &str,
    params: Value,
) -> Result<Value, SupervisorError> {
    supervisor
        .execute(app_id, target_id, domain, command, params)
        .await
}

/// Buffered log entries for one record, optionally clearing the buffer.
pub fn get_logs(
    supervisor: &Arc<Supervisor>,
    app_id: &str,
    clear_buffer: bool,
) -> Result<LogsResponse, SupervisorError> {
    let snapshot = supervisor.logs(app_id, clear_buffer)?;
    Ok(LogsResponse {
        entries: snapshot.entries,
        dropped: snapshot.dropped,
    })
}
