//! Speaker role: a participant publishing media into the room

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Result, SignalingError};
use crate::negotiation::{self, CandidateBuffer};
use crate::participant::Participant;
use crate::peer::PeerConnection;
use crate::relay;
use crate::room::Room;
use crate::track::{InboundTrack, TrackKind};
use crate::types::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    /// Role created, peer connection not yet handed to the client
    Idle,
    /// Waiting for (or processing) the client's offer
    Negotiating,
    /// Answer sent; media may flow
    Connected,
    Closed,
    /// A negotiation step failed; the role stays until the client stops it
    Failed,
}

pub struct Speaker {
    participant: Arc<Participant>,
    pc: Arc<dyn PeerConnection>,
    state: Mutex<SpeakerState>,
    candidates: CandidateBuffer,
    relays: Mutex<HashMap<TrackKind, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Speaker {
    pub(crate) fn new(
        participant: Arc<Participant>,
        pc: Arc<dyn PeerConnection>,
        early_candidates: Vec<RTCIceCandidateInit>,
    ) -> Self {
        Self {
            participant,
            pc,
            state: Mutex::new(SpeakerState::Idle),
            candidates: CandidateBuffer::with_pending(early_candidates),
            relays: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ParticipantId {
        self.participant.id()
    }

    #[must_use]
    pub const fn participant(&self) -> &Arc<Participant> {
        &self.participant
    }

    #[must_use]
    pub fn peer_connection(&self) -> &Arc<dyn PeerConnection> {
        &self.pc
    }

    #[must_use]
    pub fn state(&self) -> SpeakerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SpeakerState) {
        let mut current = self.state.lock();
        if *current == SpeakerState::Closed {
            return;
        }
        debug!(speaker_id = %self.id(), from = ?*current, to = ?state, "Speaker state change");
        *current = state;
    }

    /// Kinds for which a relay task has been started
    #[must_use]
    pub fn relay_kinds(&self) -> Vec<TrackKind> {
        let mut kinds: Vec<TrackKind> = self.relays.lock().keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// Apply the client's offer and produce the answer to send back.
    ///
    /// A later offer on a connected speaker is treated as a renegotiation.
    pub(crate) async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
        gathering_timeout: Duration,
    ) -> Result<RTCSessionDescription> {
        let state = self.state();
        if !matches!(state, SpeakerState::Negotiating | SpeakerState::Connected) {
            return Err(SignalingError::InvalidState {
                role: "speaker",
                state: format!("{state:?}"),
            }
            .into());
        }

        match self.negotiate(offer, gathering_timeout).await {
            Ok(answer) => {
                self.set_state(SpeakerState::Connected);
                Ok(answer)
            }
            Err(e) => {
                warn!(speaker_id = %self.id(), error = %e, "Speaker negotiation failed");
                self.set_state(SpeakerState::Failed);
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        offer: RTCSessionDescription,
        gathering_timeout: Duration,
    ) -> Result<RTCSessionDescription> {
        negotiation::set_remote_and_flush(self.pc.as_ref(), &self.candidates, offer).await?;
        let answer = self.pc.create_answer().await?;
        self.pc.set_local_description(answer).await?;
        negotiation::gathered_local_description(self.pc.as_ref(), gathering_timeout).await
    }

    pub(crate) async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        negotiation::apply_candidate(self.pc.as_ref(), &self.candidates, candidate).await
    }

    /// Start the relay for an inbound track. One task per kind, started once.
    pub(crate) fn start_relay(&self, room: Arc<Room>, track: Arc<dyn InboundTrack>) {
        let kind = track.kind();
        let mut relays = self.relays.lock();
        if self.cancel.is_cancelled() {
            debug!(speaker_id = %self.id(), kind = %kind, "Speaker closed, ignoring inbound track");
            return;
        }
        if relays.contains_key(&kind) {
            debug!(speaker_id = %self.id(), kind = %kind, "Relay already running for this kind");
            return;
        }

        info!(speaker_id = %self.id(), kind = %kind, "Inbound track received, starting relay");
        let handle = relay::spawn(room, self.id().clone(), track, self.cancel.child_token());
        relays.insert(kind, handle);
    }

    /// Stop relays and close the peer connection. Safe to call twice.
    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        {
            let mut state = self.state.lock();
            if *state == SpeakerState::Closed {
                return;
            }
            *state = SpeakerState::Closed;
        }

        if let Err(e) = self.pc.close().await {
            warn!(speaker_id = %self.id(), error = %e, "Failed to close speaker peer connection");
        }
        debug!(speaker_id = %self.id(), "Speaker closed");
    }
}
