//! Command execution funnel.
//!
//! Every protocol command flows through here: reuse or establish the record's
//! connection, resolve the target against a fresh-enough list, wire event
//! ingestion exactly once, and tear the connection down on any failure so the
//! next call reconnects instead of reusing a possibly-broken channel. The
//! failed command itself is never retried.

use std::sync::Arc;

use cdp_bridge::{ensure_ingestion, CdpClient};
use deckhand_core_types::LogSink;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SupervisorError;
use crate::record::ProcessRecord;
use crate::supervisor::Supervisor;

impl Supervisor {
    /// Funnel entry for callers already holding a record.
    pub async fn execute_on(
        &self,
        record: &Arc<ProcessRecord>,
        target_id: &str,
        domain: &str,
        command: &str,
        params: Value,
    ) -> Result<Value, SupervisorError> {
        let client = match record.current_client().await {
            Some(client) if client.is_alive() => client,
            _ => self.connect_target(record, target_id).await?,
        };

        let method = format!("{domain}.{command}");
        match client
            .send(&method, params, self.config().command_deadline)
            .await
        {
            Ok(result) => {
                let sink: Arc<dyn LogSink> = Arc::clone(&record.logs) as Arc<dyn LogSink>;
                if let Err(err) =
                    ensure_ingestion(&client, sink, self.config().command_deadline).await
                {
                    warn!(target: "supervisor", id = %record.id, %err, "event ingestion could not be enabled");
                }
                Ok(result)
            }
            Err(err) => {
                // Discard the channel so the next call starts clean.
                record.discard_client().await;
                Err(err.into())
            }
        }
    }

    /// Open a connection to `target_id`, refreshing the target list first
    /// when it is empty or stale. Unknown targets fail without a blind
    /// connect attempt.
    pub async fn connect_target(
        &self,
        record: &Arc<ProcessRecord>,
        target_id: &str,
    ) -> Result<Arc<CdpClient>, SupervisorError> {
        let cfg = self.config();
        let targets = record
            .fresh_targets(cfg.target_freshness, cfg.discovery_timeout)
            .await?;

        let target = targets
            .iter()
            .find(|t| t.id == target_id)
            .ok_or_else(|| SupervisorError::TargetNotFound(target_id.to_string()))?;

        let url = target.web_socket_debugger_url.clone().unwrap_or_else(|| {
            format!(
                "ws://127.0.0.1:{}/devtools/page/{}",
                record.debug_port, target.id
            )
        });

        let client = CdpClient::connect(&target.id, &url).await?;
        record.install_client(Arc::clone(&client)).await;
        debug!(target: "supervisor", id = %record.id, target_id, url = %client.url(), "target connected");
        Ok(client)
    }
}
