//! Peer connection seam
//!
//! The relay drives peer connections through this trait only. Production uses
//! the `webrtc` adapter in [`crate::rtc`]; tests plug in an in-memory fake.

use async_trait::async_trait;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::Result;
use crate::track::{ForwardTrack, InboundTrack, TrackKind, TrackLabel};

/// Called for every locally discovered ICE candidate
pub type IceCandidateHandler = Box<dyn Fn(RTCIceCandidateInit) + Send + Sync>;

/// Called when a remote track starts arriving
pub type TrackHandler = Box<dyn Fn(Arc<dyn InboundTrack>) + Send + Sync>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<RTCSessionDescription>;

    async fn create_answer(&self) -> Result<RTCSessionDescription>;

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<RTCSessionDescription>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    fn on_ice_candidate(&self, handler: IceCandidateHandler);

    fn on_track(&self, handler: TrackHandler);

    /// Attach a new outbound track as a sender on this connection
    async fn add_forward_track(
        &self,
        kind: TrackKind,
        label: TrackLabel,
    ) -> Result<Arc<dyn ForwardTrack>>;

    /// Resolves once ICE gathering has completed
    async fn gathering_complete(&self);

    /// Idempotent
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>>;
}
