use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a serial session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No device held; the initial state
    Closed,
    /// Device held, read worker running
    Open,
    /// Device lost or failed; handle already released, needs close or reopen
    Faulted,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Faulted => write!(f, "Faulted"),
        }
    }
}

/// Why a session left the Open state on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The read stream reported an error
    StreamError(String),
    /// The read stream ended, usually because the device was removed
    EndOfStream,
    /// A write failed or exceeded its time bound
    WriteFailed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::StreamError(msg) => write!(f, "Read error: {}", msg),
            DisconnectReason::EndOfStream => write!(f, "Device disconnected"),
            DisconnectReason::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_closed() {
        assert_eq!(SessionState::default(), SessionState::Closed);
        assert!(!SessionState::default().is_open());
        assert!(SessionState::Open.is_open());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Closed.to_string(), "Closed");
        assert_eq!(SessionState::Open.to_string(), "Open");
        assert_eq!(SessionState::Faulted.to_string(), "Faulted");
    }

    #[test]
    fn test_disconnect_reasons_are_distinct() {
        let stream = DisconnectReason::StreamError("Input/output error".to_string());
        let eof = DisconnectReason::EndOfStream;

        assert_eq!(stream.to_string(), "Read error: Input/output error");
        assert_eq!(eof.to_string(), "Device disconnected");
        assert_ne!(stream.to_string(), eof.to_string());
    }
}
