use std::fmt;

/// Errors that can occur while supervising bridge processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The bridge process could not be started
    SpawnFailed(String),
    /// No loopback port left to hand out
    PortsExhausted,
    /// Bridge not found
    NotFound(u64),
    /// Failed to signal the bridge process
    KillFailed(String),
    /// Channel communication error
    ChannelError(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::SpawnFailed(msg) => write!(f, "Failed to spawn bridge: {}", msg),
            SupervisorError::PortsExhausted => write!(f, "No loopback ports left to allocate"),
            SupervisorError::NotFound(id) => write!(f, "Bridge not found: {}", id),
            SupervisorError::KillFailed(msg) => write!(f, "Failed to kill bridge: {}", msg),
            SupervisorError::ChannelError(msg) => write!(f, "Channel error: {}", msg),
        }
    }
}

impl std::error::Error for SupervisorError {}
