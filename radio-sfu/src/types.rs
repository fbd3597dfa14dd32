//! Common identifiers used throughout the relay

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a participant connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random id for a newly connected participant
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Room identifier, taken verbatim from the `topic` query parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source side of a fan-out pairing.
///
/// Every listener subscribes to the reserved `Server` slot in addition to the
/// real speakers, so its first offer always carries an audio and a video
/// section even in an empty room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpeakerSlot {
    Server,
    Speaker(ParticipantId),
}

impl SpeakerSlot {
    pub const SERVER_LABEL: &'static str = "server";

    #[must_use]
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Self::Server => None,
            Self::Speaker(id) => Some(id),
        }
    }
}

impl fmt::Display for SpeakerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str(Self::SERVER_LABEL),
            Self::Speaker(id) => write!(f, "{id}"),
        }
    }
}

impl From<ParticipantId> for SpeakerSlot {
    fn from(id: ParticipantId) -> Self {
        Self::Speaker(id)
    }
}

/// Which endpoint a connection came in on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Speaker,
    Listener,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speaker => f.write_str("speaker"),
            Self::Listener => f.write_str("listener"),
        }
    }
}
