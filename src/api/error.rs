use crate::api::transport::ReplyError;

/// Every way a single panel request can end without a display update.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum RequestError {
    /// Pre-flight check failed; nothing was sent.
    #[display("Not connected to any device")]
    NotConnected,
    /// The transport did not hand back a reply.
    #[display("Failed to send request: {_0}")]
    Refused(#[error(not(source))] String),
    /// The reply settled with a transport-level error.
    #[display("Request failed: {_0}")]
    Transport(#[error(not(source))] ReplyError),
    /// The reply settled but its payload does not match the request.
    #[display("Invalid data received from device: {_0}")]
    MalformedPayload(#[error(not(source))] String),
    /// Form input rejected before anything was sent.
    #[display("Invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
}

impl RequestError {
    /// Warnings leave nothing half-done; criticals mean a request was lost.
    pub fn severity(&self) -> Severity {
        match self {
            RequestError::NotConnected
            | RequestError::MalformedPayload(_)
            | RequestError::InvalidInput(_) => Severity::Warning,
            RequestError::Refused(_) | RequestError::Transport(_) => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}
