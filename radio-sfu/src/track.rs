//! Media track abstractions for the relay
//!
//! - [`InboundTrack`]: media arriving from a speaker
//! - [`ForwardTrack`]: a server-originated track attached as a sender on a
//!   listener's peer connection

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::error::{MediaReadError, Result};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub const ALL: [Self; 2] = [Self::Audio, Self::Video];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Informational labels handed to the peer connection for a forwarded track.
/// Clients may display them; the server never parses them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLabel {
    pub id: String,
    pub stream_id: String,
}

impl TrackLabel {
    #[must_use]
    pub fn new(kind: TrackKind, speaker: impl fmt::Display, listener: impl fmt::Display) -> Self {
        Self {
            id: kind.as_str().to_string(),
            stream_id: format!("{speaker}:{listener}"),
        }
    }
}

/// Media arriving from a speaker's peer connection
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Read the next RTP packet
    async fn read_rtp(&self) -> std::result::Result<Packet, MediaReadError>;
}

/// Write handle for a server-originated outbound track
#[async_trait]
pub trait ForwardTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    async fn write_rtp(&self, packet: &Packet) -> Result<()>;

    /// Stop the sender on the owning peer connection. Safe to call on a
    /// connection that is already closed.
    async fn detach(&self) -> Result<()>;
}
