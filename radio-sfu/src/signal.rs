//! Signal envelope exchanged over a participant's transport
//!
//! Every message on the wire is `{"type": "...", "data": ...}`. Inbound
//! envelopes are parsed into [`ClientSignal`], outbound ones are built from
//! [`ServerSignal`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::SignalingError;
use crate::track::TrackKind;
use crate::types::ParticipantId;

/// Raw wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Signal {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Signals a client may send
#[derive(Debug, Clone)]
pub enum ClientSignal {
    BroadcastStarted,
    BroadcastStopped,
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    Ice(RTCIceCandidateInit),
    ListeningStarted,
    ListeningStopped,
    /// Sent by the web client on open; carries nothing
    ParticipantConnected,
}

impl ClientSignal {
    /// Parse a text frame into a typed signal
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let envelope: Signal = serde_json::from_str(text).map_err(SignalingError::Malformed)?;
        Self::try_from(envelope)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BroadcastStarted => "broadcast-started",
            Self::BroadcastStopped => "broadcast-stopped",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Ice(_) => "ice",
            Self::ListeningStarted => "listening-started",
            Self::ListeningStopped => "listening-stopped",
            Self::ParticipantConnected => "participant-connected",
        }
    }
}

impl TryFrom<Signal> for ClientSignal {
    type Error = SignalingError;

    fn try_from(signal: Signal) -> Result<Self, Self::Error> {
        let data = signal.data;
        match signal.kind.as_str() {
            "broadcast-started" => Ok(Self::BroadcastStarted),
            "broadcast-stopped" => Ok(Self::BroadcastStopped),
            "offer" => serde_json::from_value(data)
                .map(Self::Offer)
                .map_err(SignalingError::Malformed),
            "answer" => serde_json::from_value(data)
                .map(Self::Answer)
                .map_err(SignalingError::Malformed),
            "ice" => serde_json::from_value(data)
                .map(Self::Ice)
                .map_err(SignalingError::Malformed),
            "listener-connected" | "listening-started" => Ok(Self::ListeningStarted),
            "listener-disconnected" | "listening-stopped" => Ok(Self::ListeningStopped),
            "participant-connected" => Ok(Self::ParticipantConnected),
            other => Err(SignalingError::UnknownType(other.to_string())),
        }
    }
}

/// Signals the server sends
#[derive(Debug, Clone)]
pub enum ServerSignal {
    Ice(RTCIceCandidateInit),
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    SpeakerConnected(ParticipantId),
    SpeakerDisconnected(ParticipantId),
    ListenerConnected(ParticipantId),
    ListenerDisconnected(ParticipantId),
    ParticipantCount(usize),
    /// `"<rtp timestamp>:<embedded timestamp>"`
    Timestamp(String),
    TrackDisconnected {
        speaker_id: ParticipantId,
        kind: TrackKind,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackDisconnectedData<'a> {
    speaker_id: &'a ParticipantId,
    kind: TrackKind,
}

impl ServerSignal {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ice(_) => "ice",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::SpeakerConnected(_) => "speaker-connected",
            Self::SpeakerDisconnected(_) => "speaker-disconnected",
            Self::ListenerConnected(_) => "listener-connected",
            Self::ListenerDisconnected(_) => "listener-disconnected",
            Self::ParticipantCount(_) => "participant-count",
            Self::Timestamp(_) => "timestamp",
            Self::TrackDisconnected { .. } => "track-disconnected",
        }
    }

    /// Build the wire envelope
    pub fn to_signal(&self) -> Result<Signal, serde_json::Error> {
        let data = match self {
            Self::Ice(candidate) => serde_json::to_value(candidate)?,
            Self::Offer(desc) | Self::Answer(desc) => serde_json::to_value(desc)?,
            Self::SpeakerConnected(id)
            | Self::SpeakerDisconnected(id)
            | Self::ListenerConnected(id)
            | Self::ListenerDisconnected(id) => serde_json::to_value(id)?,
            Self::ParticipantCount(count) => Value::from(*count),
            Self::Timestamp(value) => Value::from(value.as_str()),
            Self::TrackDisconnected { speaker_id, kind } => {
                serde_json::to_value(TrackDisconnectedData {
                    speaker_id,
                    kind: *kind,
                })?
            }
        };
        Ok(Signal::new(self.name(), data))
    }
}
