//! Tunables for the supervisor and the bridge calls it makes.

use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Range debug ports are drawn from when the caller does not supply one.
    pub port_range: RangeInclusive<u16>,
    /// Well-known ports probed by network-scope discovery.
    pub probe_ports: Vec<u16>,
    /// Bound on the target-listing HTTP fetch.
    pub discovery_timeout: Duration,
    /// Bound on a single protocol command exchange.
    pub command_deadline: Duration,
    /// Target lists older than this are refreshed before use.
    pub target_freshness: Duration,
    /// Wait after spawn before the first opportunistic target fetch.
    pub spawn_settle: Duration,
    /// Wait after stop before a reload respawns, letting the OS release the
    /// debug port.
    pub stop_settle: Duration,
    /// Crash-recovery backoff base; the delay grows linearly with the attempt
    /// number.
    pub backoff_base: Duration,
    pub max_reconnect_attempts: u32,
    pub log_buffer_capacity: usize,
    /// How often the exit watcher polls a child for termination.
    pub exit_poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port_range: 9222..=9999,
            probe_ports: vec![9222, 9223, 9224, 9225, 9229],
            discovery_timeout: Duration::from_secs(3),
            command_deadline: Duration::from_secs(5),
            target_freshness: Duration::from_secs(5),
            spawn_settle: Duration::from_secs(2),
            stop_settle: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            log_buffer_capacity: 5_000,
            exit_poll_interval: Duration::from_millis(100),
        }
    }
}

impl SupervisorConfig {
    /// Defaults with `DECKHAND_*` environment overrides applied for the knobs
    /// exposed to operators.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(value) = env_duration_ms("DECKHAND_COMMAND_DEADLINE_MS") {
            cfg.command_deadline = value;
        }
        if let Some(value) = env_duration_ms("DECKHAND_DISCOVERY_TIMEOUT_MS") {
            cfg.discovery_timeout = value;
        }
        if let Some(value) = env_duration_ms("DECKHAND_SPAWN_SETTLE_MS") {
            cfg.spawn_settle = value;
        }
        if let Some(value) = env_usize("DECKHAND_LOG_CAPACITY") {
            cfg.log_buffer_capacity = value;
        }
        cfg
    }

    /// Delay before automatic reload attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok()?.trim().parse::<usize>().ok()
}
