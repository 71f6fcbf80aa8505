//! Target discovery over the debugging HTTP endpoint.

use std::time::Duration;

use deckhand_core_types::Target;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::CdpError;

/// A responding debugging endpoint found by [`probe_ports`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEndpoint {
    pub port: u16,
    pub target_count: usize,
}

/// Fetch the list of currently inspectable targets from the debugging
/// endpoint on `port`.
///
/// One GET against the target-listing path, bounded by `timeout`. Non-2xx
/// responses, timeouts and undecodable bodies all surface as
/// [`CdpError::Connection`]; no caching happens here, callers decide
/// staleness policy.
pub async fn fetch_targets(port: u16, timeout: Duration) -> Result<Vec<Target>, CdpError> {
    let url = format!("http://127.0.0.1:{port}/json/list");
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| CdpError::connection(err.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|err| CdpError::connection(format!("{url}: {err}")))?;

    if !response.status().is_success() {
        return Err(CdpError::connection(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    let targets = response
        .json::<Vec<Target>>()
        .await
        .map_err(|err| CdpError::connection(format!("{url}: invalid target list: {err}")))?;

    debug!(target: "cdp-discovery", port, count = targets.len(), "target list fetched");
    Ok(targets)
}

/// Probe a fixed set of well-known debugging ports.
///
/// Liveness first (TCP connect), then a content check that the port actually
/// serves a target-list document. Ports that fail either check are silently
/// skipped; this is a best-effort survey, not an operation that can fail.
pub async fn probe_ports(ports: &[u16], timeout: Duration) -> Vec<DebugEndpoint> {
    let probes = ports.iter().map(|&port| probe_port(port, timeout));
    futures::future::join_all(probes)
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn probe_port(port: u16, timeout: Duration) -> Option<DebugEndpoint> {
    let connect = TcpStream::connect(("127.0.0.1", port));
    tokio::time::timeout(timeout, connect).await.ok()?.ok()?;

    match fetch_targets(port, timeout).await {
        Ok(targets) => Some(DebugEndpoint {
            port,
            target_count: targets.len(),
        }),
        Err(err) => {
            debug!(target: "cdp-discovery", port, %err, "port is live but serves no target list");
            None
        }
    }
}
