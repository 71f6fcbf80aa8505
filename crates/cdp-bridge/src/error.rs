use serde_json::Value;
use thiserror::Error;

/// Failures surfaced by the protocol bridge.
///
/// `Connection` covers every transport-level failure: refused or dropped
/// sockets, undecodable target-list documents, and deadline expiry.
/// `Protocol` means the remote side answered a command with a structured
/// error; the channel itself is still usable.
#[derive(Clone, Debug, Error)]
pub enum CdpError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl CdpError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
