//! Remote-debugging protocol bridge.
//!
//! Discovers debuggable targets over a process's debugging HTTP endpoint,
//! keeps one persistent duplex channel per target with command/response
//! multiplexing, and ingests the standard asynchronous event streams
//! (console, network, runtime exceptions, security state) into a
//! [`deckhand_core_types::LogSink`].
//!
//! The bridge deliberately knows nothing about process lifecycles; the
//! supervisor owns records and decides when channels are (re)opened.

pub mod client;
pub mod discovery;
pub mod error;
pub mod ingest;
mod transport;

pub use client::CdpClient;
pub use discovery::{fetch_targets, probe_ports, DebugEndpoint};
pub use error::CdpError;
pub use ingest::ensure_ingestion;
pub use transport::ProtocolEvent;
