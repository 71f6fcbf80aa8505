//! Per-target connection handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use crate::error::CdpError;
use crate::transport::{Channel, ControlMessage, ProtocolEvent};

/// Handle to one persistent channel addressed at a single target.
///
/// Cheap to share behind an `Arc`; the record that created it owns its
/// lifetime and is responsible for calling [`CdpClient::close`] (dropping the
/// last handle also tears the channel down).
pub struct CdpClient {
    target_id: String,
    url: String,
    channel: Channel,
    events_wired: AtomicBool,
}

impl CdpClient {
    /// Open a persistent channel to `url` for `target_id`.
    pub async fn connect(target_id: &str, url: &str) -> Result<Arc<Self>, CdpError> {
        let channel = Channel::open(url).await?;
        Ok(Arc::new(Self {
            target_id: target_id.to_string(),
            url: url.to_string(),
            channel,
            events_wired: AtomicBool::new(false),
        }))
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.channel.alive.load(Ordering::Relaxed)
    }

    /// Request/response primitive. `method` is the fully-qualified
    /// `Domain.command` name; the exchange is bounded by `deadline`.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, CdpError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.channel
            .command_tx
            .send(message)
            .await
            .map_err(|_| CdpError::connection("channel closed"))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::connection("command response channel closed")),
            Err(_) => Err(CdpError::connection(format!(
                "{method} timed out after {deadline:?}"
            ))),
        }
    }

    /// Event-subscription primitive: a live receiver of server-pushed events,
    /// starting from the moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.channel.events.subscribe()
    }

    /// Claim the per-connection ingestion slot. Returns true for the first
    /// caller only; see [`crate::ingest::ensure_ingestion`].
    pub(crate) fn try_claim_ingestion(&self) -> bool {
        !self.events_wired.swap(true, Ordering::SeqCst)
    }

    /// Give the claim back after a failed enable so a later command can retry.
    pub(crate) fn release_ingestion_claim(&self) {
        self.events_wired.store(false, Ordering::SeqCst);
    }

    /// Tear the channel down. Every in-flight call fails with a connection
    /// error; the next command through the funnel forces a reconnect.
    pub fn close(&self) {
        self.channel.close();
    }
}
