use thiserror::Error;

use crate::types::RoomId;

#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Room {room} is full ({limit} participants)")]
    RoomFull { room: RoomId, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of a single signaling operation. None of these end the session.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Malformed signal: {0}")]
    Malformed(serde_json::Error),

    #[error("Unknown signal type: {0}")]
    UnknownType(String),

    #[error("No active {expected} role for this participant")]
    NoActiveRole { expected: &'static str },

    #[error("{role} cannot handle this signal in state {state}")]
    InvalidState { role: &'static str, state: String },

    #[error("Negotiation failed: {0}")]
    Negotiation(String),
}

/// Outcome of a failed inbound RTP read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaReadError {
    /// The inbound stream is gone; the relay task stops
    #[error("End of stream")]
    EndOfStream,

    /// Anything else; the relay task logs and keeps reading
    #[error("Transient read error: {0}")]
    Transient(String),
}

impl MediaReadError {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl SfuError {
    /// Whether this error ends the participant's session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RoomFull { .. })
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_capacity_errors_are_fatal() {
        assert!(SfuError::Transport("closed".into()).is_fatal());
        assert!(SfuError::RoomFull {
            room: RoomId::from("news"),
            limit: 2
        }
        .is_fatal());
        assert!(!SfuError::Signaling(SignalingError::UnknownType("x".into())).is_fatal());
        assert!(!SfuError::WebRtc(webrtc::Error::new("boom".to_string())).is_fatal());
    }

    #[test]
    fn media_read_error_classification() {
        assert!(MediaReadError::EndOfStream.is_terminal());
        assert!(!MediaReadError::Transient("srtp".into()).is_terminal());
    }
}
