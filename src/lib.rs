//! Deckhand library surface.
//!
//! The core lives in the workspace crates (`deckhand-supervisor`,
//! `cdp-bridge`, `deckhand-core-types`); this crate is the thin
//! collaborator-facing shell: the typed operations in [`ops`] and the small
//! CLI binary built on top of them.

pub mod ops;

pub use cdp_bridge::{CdpClient, CdpError, DebugEndpoint, ProtocolEvent};
pub use deckhand_core_types::{
    AppId, LogCategory, LogEntry, LogLevel, LogSink, ProcessStatus, Target,
};
pub use deckhand_supervisor::{
    DiscoverScope, Discovery, StartOptions, Supervisor, SupervisorConfig, SupervisorError,
};
