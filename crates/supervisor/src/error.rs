use cdp_bridge::CdpError;
use thiserror::Error;

/// Failures surfaced by supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Missing or invalid required input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Target listing unavailable while adopting an external process.
    #[error("discovery failed on port {port}: {reason}")]
    Discovery { port: u16, reason: String },

    /// Requested target absent from the last-known list.
    #[error("target {0} not found")]
    TargetNotFound(String),

    /// Reload attempted on an adopted record.
    #[error("process {0} was adopted and cannot be restarted")]
    NotRestartable(String),

    /// No record registered under the given id.
    #[error("unknown process {0}")]
    UnknownProcess(String),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport or protocol failure bubbled up from the bridge.
    #[error(transparent)]
    Cdp(#[from] CdpError),
}
