//! Process lifecycle supervision and crash recovery.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cdp_bridge::discovery::{self, DebugEndpoint};
use deckhand_core_types::{LogCategory, LogEntry, LogLevel, ProcessStatus};
use rand::Rng;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::logbuf::LogBuffer;
use crate::record::ProcessRecord;
use crate::registry::Registry;

/// Options accepted by [`Supervisor::start`].
#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    /// Caller-chosen debug port; one is drawn from the configured range when
    /// absent.
    pub debug_port: Option<u16>,
    /// Enable automatic reloads after abnormal exits.
    pub reconnect: bool,
}

/// Scope selector for [`Supervisor::discover`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoverScope {
    Managed,
    Network,
    All,
}

/// Discovery result: registry snapshot and/or responding network ports.
#[derive(Default)]
pub struct Discovery {
    pub managed: Vec<Arc<ProcessRecord>>,
    pub network: Vec<DebugEndpoint>,
}

/// Log entries handed to a caller, with the eviction count so truncation is
/// detectable.
#[derive(Clone, Debug)]
pub struct LogsSnapshot {
    pub entries: Vec<LogEntry>,
    pub dropped: u64,
}

/// Owns the registry of managed processes, the spawn path and the
/// crash-recovery policy.
pub struct Supervisor {
    registry: Registry,
    cfg: SupervisorConfig,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(cfg: SupervisorConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            cfg,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawn `app_path` with remote debugging enabled and register the
    /// record.
    ///
    /// The record is registered before the child finishes initializing. After
    /// the settle delay an initial target fetch runs opportunistically; its
    /// failure only means targets populate lazily on first protocol use.
    pub async fn start(
        self: &Arc<Self>,
        app_path: impl Into<PathBuf>,
        opts: StartOptions,
    ) -> Result<Arc<ProcessRecord>, SupervisorError> {
        self.start_inner(app_path.into(), opts, 0).await
    }

    async fn start_inner(
        self: &Arc<Self>,
        app_path: PathBuf,
        opts: StartOptions,
        inherited_attempts: u32,
    ) -> Result<Arc<ProcessRecord>, SupervisorError> {
        if app_path.as_os_str().is_empty() {
            return Err(SupervisorError::Configuration(
                "app path must not be empty".into(),
            ));
        }
        if opts.debug_port == Some(0) {
            return Err(SupervisorError::Configuration(
                "debug port 0 is reserved".into(),
            ));
        }

        let debug_port = opts.debug_port.unwrap_or_else(|| self.pick_port());
        let path_display = app_path.display().to_string();

        let mut command = Command::new(&app_path);
        command
            .arg(format!("--remote-debugging-port={debug_port}"))
            .env("ELECTRON_ENABLE_LOGGING", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            path: path_display.clone(),
            source,
        })?;

        let record = ProcessRecord::new(
            Some(app_path),
            debug_port,
            opts.reconnect,
            self.cfg.log_buffer_capacity,
        );
        record
            .reconnect_attempts
            .store(inherited_attempts, Ordering::SeqCst);

        if let Some(stdout) = child.stdout.take() {
            pump_stdio(stdout, LogLevel::Info, "stdout", Arc::clone(&record.logs));
        }
        if let Some(stderr) = child.stderr.take() {
            pump_stdio(stderr, LogLevel::Warn, "stderr", Arc::clone(&record.logs));
        }

        *record.child.lock().await = Some(child);

        self.registry.insert(Arc::clone(&record));
        self.spawn_exit_watcher(Arc::clone(&record));

        info!(
            target: "supervisor",
            id = %record.id,
            port = debug_port,
            path = %path_display,
            "process started"
        );

        // Settle, then try to populate the target list once.
        sleep(self.cfg.spawn_settle).await;
        match record.refresh_targets(self.cfg.discovery_timeout).await {
            Ok(targets) => {
                debug!(target: "supervisor", id = %record.id, count = targets.len(), "initial target list")
            }
            Err(err) => {
                debug!(target: "supervisor", id = %record.id, %err, "initial target fetch failed; targets will populate lazily")
            }
        }

        Ok(record)
    }

    /// Adopt an already-running process by its debug port. Discovery failure
    /// here is fatal, unlike the opportunistic fetch in `start`; adopted
    /// records own no child process and cannot be restarted.
    pub async fn adopt(&self, port: u16) -> Result<Arc<ProcessRecord>, SupervisorError> {
        if port == 0 {
            return Err(SupervisorError::Configuration(
                "debug port 0 is reserved".into(),
            ));
        }

        let record = ProcessRecord::new(None, port, false, self.cfg.log_buffer_capacity);

        let targets = record
            .refresh_targets(self.cfg.discovery_timeout)
            .await
            .map_err(|err| SupervisorError::Discovery {
                port,
                reason: err.to_string(),
            })?;
        if targets.is_empty() {
            return Err(SupervisorError::Discovery {
                port,
                reason: "no debuggable targets".into(),
            });
        }

        self.registry.insert(Arc::clone(&record));
        info!(target: "supervisor", id = %record.id, port, targets = targets.len(), "external process adopted");
        Ok(record)
    }

    /// Stop a managed process. Returns false (without failing) for unknown
    /// ids; otherwise the record ends up `stopped` with no live connection.
    pub async fn stop(&self, id: &str) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        self.stop_record(&record).await;
        true
    }

    async fn stop_record(&self, record: &Arc<ProcessRecord>) {
        record.stopping.store(true, Ordering::SeqCst);
        // Best effort; connection teardown failures are logged, never
        // propagated.
        record.discard_client().await;

        let mut child = record.child.lock().await;
        if let Some(active) = child.as_mut() {
            if let Err(err) = active.kill().await {
                warn!(target: "supervisor", id = %record.id, %err, "kill failed");
            }
            let _ = active.wait().await;
            child.take();
        }
        drop(child);

        record.set_status(ProcessStatus::Stopped);
        info!(target: "supervisor", id = %record.id, "process stopped");
    }

    /// Kill-then-respawn under a fresh identity, reusing the record's
    /// appPath/debugPort/reconnect. Adopted records fail with
    /// `NotRestartable` and keep their status.
    pub async fn reload(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<Arc<ProcessRecord>, SupervisorError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownProcess(id.to_string()))?;
        if record.is_adopted() {
            return Err(SupervisorError::NotRestartable(record.id.0.clone()));
        }
        self.reload_record(&record, 0).await
    }

    async fn reload_record(
        self: &Arc<Self>,
        record: &Arc<ProcessRecord>,
        inherited_attempts: u32,
    ) -> Result<Arc<ProcessRecord>, SupervisorError> {
        let Some(app_path) = record.app_path.clone() else {
            return Err(SupervisorError::NotRestartable(record.id.0.clone()));
        };

        self.stop_record(record).await;
        self.registry.remove(record.id.as_str());

        // Let the OS release the debug port before binding it again.
        sleep(self.cfg.stop_settle).await;

        self.start_inner(
            app_path,
            StartOptions {
                debug_port: Some(record.debug_port),
                reconnect: record.reconnect,
            },
            inherited_attempts,
        )
        .await
    }

    /// Registry snapshot, responding well-known network ports, or both.
    pub async fn discover(&self, scope: DiscoverScope) -> Discovery {
        let mut result = Discovery::default();
        if matches!(scope, DiscoverScope::Managed | DiscoverScope::All) {
            result.managed = self.registry.snapshot();
        }
        if matches!(scope, DiscoverScope::Network | DiscoverScope::All) {
            result.network =
                discovery::probe_ports(&self.cfg.probe_ports, self.cfg.discovery_timeout).await;
        }
        result
    }

    /// Buffered log entries for `id`, optionally clearing the buffer.
    pub fn logs(&self, id: &str, clear: bool) -> Result<LogsSnapshot, SupervisorError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownProcess(id.to_string()))?;
        let entries = if clear {
            record.logs.drain()
        } else {
            record.logs.snapshot()
        };
        Ok(LogsSnapshot {
            entries,
            dropped: record.logs.dropped(),
        })
    }

    /// Execute `domain.command` against `target_id` on the record `id`.
    pub async fn execute(
        &self,
        id: &str,
        target_id: &str,
        domain: &str,
        command: &str,
        params: Value,
    ) -> Result<Value, SupervisorError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownProcess(id.to_string()))?;
        self.execute_on(&record, target_id, domain, command, params)
            .await
    }

    /// Stop every watcher and owned child. The supervisor is unusable for
    /// lifecycle work afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for record in self.registry.snapshot() {
            self.stop_record(&record).await;
        }
    }

    fn pick_port(&self) -> u16 {
        let (lo, hi) = (*self.cfg.port_range.start(), *self.cfg.port_range.end());
        let in_use: Vec<u16> = self
            .registry
            .snapshot()
            .iter()
            .map(|record| record.debug_port)
            .collect();

        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let candidate = rng.gen_range(lo..=hi);
            if !in_use.contains(&candidate) {
                return candidate;
            }
        }
        rng.gen_range(lo..=hi)
    }

    fn spawn_exit_watcher(self: &Arc<Self>, record: Arc<ProcessRecord>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(supervisor.cfg.exit_poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = supervisor.shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let exit = {
                    let mut child = record.child.lock().await;
                    let Some(active) = child.as_mut() else {
                        // Explicit stop already reaped the child.
                        return;
                    };
                    match active.try_wait() {
                        Ok(None) => continue,
                        Ok(Some(status)) => {
                            child.take();
                            Some(status)
                        }
                        Err(err) => {
                            warn!(target: "supervisor", id = %record.id, %err, "exit status unavailable");
                            child.take();
                            None
                        }
                    }
                };

                supervisor.on_exit(&record, exit).await;
                return;
            }
        });
    }

    async fn on_exit(self: &Arc<Self>, record: &Arc<ProcessRecord>, status: Option<ExitStatus>) {
        record.discard_client().await;

        let explicit = record.stopping.load(Ordering::SeqCst);
        let clean = status.map(|s| s.success()).unwrap_or(false);
        let code = status.and_then(|s| s.code());

        if explicit || clean {
            record.set_status(ProcessStatus::Stopped);
            info!(target: "supervisor", id = %record.id, code = ?code, "process exited");
            return;
        }

        // Abnormal exit: non-zero code, or none at all (killed by signal).
        record.set_status(ProcessStatus::Crashed);
        warn!(target: "supervisor", id = %record.id, code = ?code, "process crashed");

        if !record.reconnect {
            return;
        }

        let attempt = record.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.cfg.max_reconnect_attempts {
            warn!(
                target: "supervisor",
                id = %record.id,
                attempts = attempt - 1,
                "reconnect budget exhausted; leaving record crashed"
            );
            return;
        }

        let delay = self.cfg.backoff_delay(attempt);
        info!(target: "supervisor", id = %record.id, attempt, ?delay, "scheduling automatic reload");

        let supervisor = Arc::clone(self);
        let crashed = Arc::clone(record);
        tokio::spawn(async move {
            tokio::select! {
                _ = supervisor.shutdown.cancelled() => return,
                _ = sleep(delay) => {}
            }
            match supervisor.reload_record(&crashed, attempt).await {
                Ok(next) => {
                    debug!(target: "supervisor", from = %crashed.id, to = %next.id, "automatic reload complete")
                }
                Err(err) => {
                    warn!(target: "supervisor", id = %crashed.id, %err, "automatic reload failed")
                }
            }
        });
    }
}

/// Decode a child stdio stream line by line into console-category entries.
fn pump_stdio<R>(stream: R, level: LogLevel, source: &'static str, logs: Arc<LogBuffer>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push(LogEntry::new(LogCategory::Console, level, line, source));
        }
    });
}
