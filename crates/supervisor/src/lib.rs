//! Process-lifecycle supervision for debuggable GUI applications.
//!
//! The supervisor owns the registry of managed process records, spawns
//! children with remote debugging enabled, classifies their exits, runs the
//! crash-recovery policy, and funnels every protocol command through a single
//! path that transparently reconnects after failures.

pub mod config;
pub mod error;
mod exec;
pub mod logbuf;
pub mod record;
pub mod registry;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use logbuf::LogBuffer;
pub use record::ProcessRecord;
pub use registry::Registry;
pub use supervisor::{DiscoverScope, Discovery, LogsSnapshot, StartOptions, Supervisor};
