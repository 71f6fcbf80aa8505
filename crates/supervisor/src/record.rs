//! Managed process records.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdp_bridge::{discovery, CdpClient};
use deckhand_core_types::{now_ms, AppId, ProcessStatus, Target};
use parking_lot::Mutex as SyncMutex;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SupervisorError;
use crate::logbuf::LogBuffer;

/// One supervised or adopted application instance.
///
/// The registry owns records exclusively; targets, log buffer and the cached
/// protocol connection are owned by the record and never shared across
/// records.
pub struct ProcessRecord {
    pub id: AppId,
    /// Spawn path; `None` marks an adopted record, which is not restartable.
    pub app_path: Option<PathBuf>,
    /// TCP port serving the remote-debugging HTTP endpoint.
    pub debug_port: u16,
    /// Whether abnormal exits trigger automatic reloads.
    pub reconnect: bool,
    /// Milliseconds since the epoch; immutable after creation.
    pub start_time: u64,
    pub logs: Arc<LogBuffer>,

    status: SyncMutex<ProcessStatus>,
    /// Target cache plus its freshness stamp. One async mutex keeps the pair
    /// atomic for observers and serializes concurrent refreshes: a caller
    /// blocked behind an in-flight refresh adopts its result.
    targets: Mutex<TargetCache>,
    client: Mutex<Option<Arc<CdpClient>>>,
    pub(crate) child: Mutex<Option<Child>>,
    /// Set while an explicit stop is tearing the process down so the exit
    /// watcher classifies the exit as `stopped`, not `crashed`.
    pub(crate) stopping: AtomicBool,
    pub(crate) reconnect_attempts: AtomicU32,
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("id", &self.id)
            .field("app_path", &self.app_path)
            .field("debug_port", &self.debug_port)
            .field("reconnect", &self.reconnect)
            .field("start_time", &self.start_time)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TargetCache {
    targets: Vec<Target>,
    fetched_at: Option<Instant>,
}

impl ProcessRecord {
    pub(crate) fn new(
        app_path: Option<PathBuf>,
        debug_port: u16,
        reconnect: bool,
        log_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: AppId::new(),
            app_path,
            debug_port,
            reconnect,
            start_time: now_ms(),
            logs: Arc::new(LogBuffer::new(log_capacity)),
            status: SyncMutex::new(ProcessStatus::Running),
            targets: Mutex::new(TargetCache::default()),
            client: Mutex::new(None),
            child: Mutex::new(None),
            stopping: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        })
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ProcessStatus) {
        *self.status.lock() = status;
    }

    /// Adopted records were connected to, not spawned, and cannot be
    /// restarted by this system.
    pub fn is_adopted(&self) -> bool {
        self.app_path.is_none()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Unconditional refresh: one fetch, cache and stamp replaced wholesale.
    pub async fn refresh_targets(&self, timeout: Duration) -> Result<Vec<Target>, SupervisorError> {
        let mut cache = self.targets.lock().await;
        let targets = discovery::fetch_targets(self.debug_port, timeout).await?;
        cache.targets = targets.clone();
        cache.fetched_at = Some(Instant::now());
        Ok(targets)
    }

    /// Refresh-if-stale: reuse the cache while it is non-empty and younger
    /// than `freshness`, fetch otherwise.
    pub async fn fresh_targets(
        &self,
        freshness: Duration,
        timeout: Duration,
    ) -> Result<Vec<Target>, SupervisorError> {
        let mut cache = self.targets.lock().await;
        let fresh = cache
            .fetched_at
            .map(|at| at.elapsed() < freshness)
            .unwrap_or(false);
        if fresh && !cache.targets.is_empty() {
            return Ok(cache.targets.clone());
        }

        let targets = discovery::fetch_targets(self.debug_port, timeout).await?;
        cache.targets = targets.clone();
        cache.fetched_at = Some(Instant::now());
        Ok(targets)
    }

    /// Most recently fetched targets without touching the network.
    pub async fn cached_targets(&self) -> Vec<Target> {
        self.targets.lock().await.targets.clone()
    }

    /// When the target list was last refreshed, if ever.
    pub async fn last_target_update(&self) -> Option<Instant> {
        self.targets.lock().await.fetched_at
    }

    pub async fn current_client(&self) -> Option<Arc<CdpClient>> {
        self.client.lock().await.clone()
    }

    /// Cache `client` as the record's live connection, closing any prior one.
    pub(crate) async fn install_client(&self, client: Arc<CdpClient>) {
        let mut slot = self.client.lock().await;
        if let Some(previous) = slot.replace(client) {
            previous.close();
        }
    }

    /// Drop and close the cached connection, if any. Close failures are not
    /// observable here; the channel teardown is fire-and-forget.
    pub(crate) async fn discard_client(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close();
            debug!(target: "supervisor", id = %self.id, "protocol connection discarded");
        }
    }
}
