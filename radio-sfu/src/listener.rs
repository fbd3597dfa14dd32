//! Listener role: a participant receiving every speaker's media.
//!
//! The server is always the offerer here. The first offer moves the listener
//! from `Idle` to `Subscribing`; each later offer (sent when a new speaker's
//! tracks are attached) goes through `Renegotiating`. Only one offer is
//! outstanding at a time; a request that arrives while one is in flight is
//! remembered and served once the answer lands.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Result, SignalingError};
use crate::negotiation::{self, CandidateBuffer};
use crate::participant::Participant;
use crate::peer::PeerConnection;
use crate::signal::ServerSignal;
use crate::types::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    /// Initial offer sent, waiting for the answer
    Subscribing,
    Connected,
    /// Follow-up offer sent, waiting for the answer
    Renegotiating,
    Closed,
    Failed,
}

/// What the room has to do after an answer was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnswerOutcome {
    /// First answer for this listener; speakers get `listener-connected`
    pub first_connect: bool,
    /// Tracks were attached while the offer was in flight
    pub renegotiate: bool,
}

/// State plus the deferred-renegotiation flag, always changed together
#[derive(Debug)]
struct Progress {
    state: ListenerState,
    renegotiation_pending: bool,
}

pub struct Listener {
    participant: Arc<Participant>,
    pc: Arc<dyn PeerConnection>,
    progress: Mutex<Progress>,
    candidates: CandidateBuffer,
    negotiation: tokio::sync::Mutex<()>,
}

impl Listener {
    pub(crate) fn new(
        participant: Arc<Participant>,
        pc: Arc<dyn PeerConnection>,
        early_candidates: Vec<RTCIceCandidateInit>,
    ) -> Self {
        Self {
            participant,
            pc,
            progress: Mutex::new(Progress {
                state: ListenerState::Idle,
                renegotiation_pending: false,
            }),
            candidates: CandidateBuffer::with_pending(early_candidates),
            negotiation: tokio::sync::Mutex::new(()),
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
    pub fn state(&self) -> ListenerState {
        self.progress.lock().state
    }

    fn set_state(&self, state: ListenerState) {
        let mut progress = self.progress.lock();
        self.transition(&mut progress, state);
    }

    fn transition(&self, progress: &mut Progress, state: ListenerState) {
        if progress.state == ListenerState::Closed {
            return;
        }
        debug!(listener_id = %self.id(), from = ?progress.state, to = ?state, "Listener state change");
        progress.state = state;
    }

    fn invalid_state(&self) -> SignalingError {
        SignalingError::InvalidState {
            role: "listener",
            state: format!("{:?}", self.state()),
        }
    }

    /// Build and send the initial offer
    pub(crate) async fn subscribe(&self, gathering_timeout: Duration) -> Result<()> {
        let _guard = self.negotiation.lock().await;
        if self.state() != ListenerState::Idle {
            return Err(self.invalid_state().into());
        }
        self.set_state(ListenerState::Subscribing);
        self.send_offer(gathering_timeout).await
    }

    /// Send a follow-up offer so the client picks up newly attached tracks.
    /// Skipped unless the listener is connected.
    pub(crate) async fn renegotiate(&self, gathering_timeout: Duration) -> Result<()> {
        let _guard = self.negotiation.lock().await;
        {
            let mut progress = self.progress.lock();
            if progress.state != ListenerState::Connected {
                debug!(listener_id = %self.id(), state = ?progress.state, "Skipping renegotiation");
                return Ok(());
            }
            progress.renegotiation_pending = false;
            self.transition(&mut progress, ListenerState::Renegotiating);
        }
        info!(listener_id = %self.id(), "Renegotiating listener");
        self.send_offer(gathering_timeout).await
    }

    /// Ask for a renegotiation. Returns true when the caller should start
    /// one now; otherwise it is deferred until the pending answer arrives.
    pub(crate) fn request_renegotiation(&self) -> bool {
        let mut progress = self.progress.lock();
        match progress.state {
            ListenerState::Connected => true,
            ListenerState::Subscribing | ListenerState::Renegotiating => {
                progress.renegotiation_pending = true;
                false
            }
            ListenerState::Idle | ListenerState::Closed | ListenerState::Failed => false,
        }
    }

    async fn send_offer(&self, gathering_timeout: Duration) -> Result<()> {
        let result: Result<()> = async {
            let offer = self.pc.create_offer().await?;
            self.pc.set_local_description(offer).await?;
            let local =
                negotiation::gathered_local_description(self.pc.as_ref(), gathering_timeout)
                    .await?;
            self.participant.send(&ServerSignal::Offer(local))
        }
        .await;

        if let Err(e) = &result {
            warn!(listener_id = %self.id(), error = %e, "Failed to send offer to listener");
            self.set_state(ListenerState::Failed);
        }
        result
    }

    /// Apply the client's answer to the outstanding offer
    pub(crate) async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<AnswerOutcome> {
        let _guard = self.negotiation.lock().await;
        let first_connect = match self.state() {
            ListenerState::Subscribing => true,
            ListenerState::Renegotiating => false,
            _ => return Err(self.invalid_state().into()),
        };

        if let Err(e) =
            negotiation::set_remote_and_flush(self.pc.as_ref(), &self.candidates, answer).await
        {
            warn!(listener_id = %self.id(), error = %e, "Failed to apply listener answer");
            self.set_state(ListenerState::Failed);
            return Err(e);
        }

        let mut progress = self.progress.lock();
        self.transition(&mut progress, ListenerState::Connected);
        let renegotiate = std::mem::take(&mut progress.renegotiation_pending);
        Ok(AnswerOutcome {
            first_connect,
            renegotiate,
        })
    }

    pub(crate) async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        negotiation::apply_candidate(self.pc.as_ref(), &self.candidates, candidate).await
    }

    /// Close the peer connection. Safe to call twice.
    pub(crate) async fn close(&self) {
        {
            let mut progress = self.progress.lock();
            if progress.state == ListenerState::Closed {
                return;
            }
            progress.state = ListenerState::Closed;
            progress.renegotiation_pending = false;
        }

        if let Err(e) = self.pc.close().await {
            warn!(listener_id = %self.id(), error = %e, "Failed to close listener peer connection");
        }
        debug!(listener_id = %self.id(), "Listener closed");
    }
}
