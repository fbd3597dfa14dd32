//! Radio SFU (Selective Forwarding Unit)
//!
//! Relays live audio/video from speakers to listeners grouped into rooms by
//! topic. Each speaker publishes one WebRTC connection to the server; the
//! server forwards every RTP packet, unmodified apart from optional in-band
//! latency metadata, to one dedicated outbound track per listener.
//!
//! ## Architecture
//!
//! - **`RoomRegistry`**: topic → room map, rooms created on first use
//! - **`Room`**: participants, speakers, listeners and the fan-out table
//!   behind one lock
//! - **`Session`**: per-connection signal dispatcher
//! - **`Speaker`** / **`Listener`**: per-role signaling state machines
//! - **`FanoutTable`**: `(speaker, listener, kind)` → outbound track
//! - **`PeerConnection`**: seam over the WebRTC stack ([`rtc`] in production)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use radio_sfu::{Endpoint, RoomRegistry, RtcPeerFactory, SfuConfig, Session, SignalSender};
//!
//! let config = SfuConfig::default();
//! let factory = Arc::new(RtcPeerFactory::new(&config)?);
//! let registry = RoomRegistry::new(config, factory);
//!
//! let (sender, outbound) = SignalSender::channel(256);
//! let mut session = Session::join(registry.get_or_create("news"), Endpoint::Speaker, sender).await?;
//! session.handle_text(r#"{"type":"broadcast-started"}"#).await?;
//! ```

mod config;
mod error;
mod fanout;
mod listener;
pub mod metadata;
mod negotiation;
mod participant;
mod peer;
mod registry;
mod relay;
mod room;
pub mod rtc;
mod session;
mod signal;
mod speaker;
mod track;
mod transport;
mod types;

pub use config::SfuConfig;
pub use error::{MediaReadError, Result, SfuError, SignalingError};
pub use fanout::{FanoutEntry, FanoutKey, FanoutPair, FanoutTable};
pub use listener::{Listener, ListenerState};
pub use negotiation::CandidateBuffer;
pub use participant::{Participant, Role, RoleKind};
pub use peer::{IceCandidateHandler, PeerConnection, PeerConnectionFactory, TrackHandler};
pub use registry::{RegistryStats, RoomRegistry};
pub use room::{Audience, Room, RoomStats};
pub use rtc::RtcPeerFactory;
pub use session::Session;
pub use signal::{ClientSignal, ServerSignal, Signal};
pub use speaker::{Speaker, SpeakerState};
pub use track::{ForwardTrack, InboundTrack, TrackKind, TrackLabel};
pub use transport::SignalSender;
pub use types::{Endpoint, ParticipantId, RoomId, SpeakerSlot};

/// RTP packet type carried through the relay
pub use webrtc::rtp::packet::Packet;
