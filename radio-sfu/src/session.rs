//! Per-connection signaling dispatcher
//!
//! A session owns one participant for the lifetime of its transport. Signals
//! are handled strictly in arrival order; the transport layer calls
//! [`Session::handle_text`] from its single reader task and
//! [`Session::leave`] once the socket is gone.

use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::error::Result;
use crate::participant::Participant;
use crate::room::Room;
use crate::signal::ClientSignal;
use crate::transport::SignalSender;
use crate::types::{Endpoint, ParticipantId};

pub struct Session {
    room: Arc<Room>,
    participant: Arc<Participant>,
    /// Candidates received while no role exists, handed to the next role.
    /// Bounded by the signal queue capacity.
    early_candidates: Vec<RTCIceCandidateInit>,
}

impl Session {
    /// Join `room` as a new participant
    pub async fn join(room: Arc<Room>, endpoint: Endpoint, sender: SignalSender) -> Result<Self> {
        let participant = room.add_participant(endpoint, sender).await?;
        Ok(Self {
            room,
            participant,
            early_candidates: Vec::new(),
        })
    }

    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        self.participant.id()
    }

    #[must_use]
    pub const fn room(&self) -> &Arc<Room> {
        &self.room
    }

    #[must_use]
    pub fn early_candidate_count(&self) -> usize {
        self.early_candidates.len()
    }

    /// Parse and dispatch one text frame
    pub async fn handle_text(&mut self, text: &str) -> Result<()> {
        let signal = ClientSignal::parse(text)?;
        self.handle(signal).await
    }

    pub async fn handle(&mut self, signal: ClientSignal) -> Result<()> {
        let id = self.participant.id().clone();
        debug!(participant_id = %id, signal = signal.name(), "Handling signal");

        match signal {
            ClientSignal::BroadcastStarted => {
                let early = std::mem::take(&mut self.early_candidates);
                self.room.start_broadcast(&self.participant, early).await?;
            }
            ClientSignal::BroadcastStopped => {
                self.room.remove_speaker(&id).await;
            }
            ClientSignal::Offer(offer) => {
                self.room.accept_offer(&id, offer).await?;
            }
            ClientSignal::Answer(answer) => {
                self.room.accept_answer(&id, answer).await?;
            }
            ClientSignal::Ice(candidate) => {
                if let Some(candidate) = self.room.add_ice_candidate(&id, candidate).await? {
                    let limit = self.room.config().signal_queue_capacity;
                    if self.early_candidates.len() >= limit {
                        warn!(
                            participant_id = %id,
                            limit,
                            "Too many ICE candidates before a role was started, dropping"
                        );
                    } else {
                        debug!(participant_id = %id, "No active role yet, keeping ICE candidate");
                        self.early_candidates.push(candidate);
                    }
                }
            }
            ClientSignal::ListeningStarted => {
                let early = std::mem::take(&mut self.early_candidates);
                self.room.start_listening(&self.participant, early).await?;
            }
            ClientSignal::ListeningStopped => {
                self.room.remove_listener(&id).await;
            }
            ClientSignal::ParticipantConnected => {}
        }
        Ok(())
    }

    /// Release the role, then the participant
    pub async fn leave(self) {
        let id = self.participant.id().clone();
        self.room.remove_speaker(&id).await;
        self.room.remove_listener(&id).await;
        self.room.remove_participant(&id).await;
        info!(room_id = %self.room.id(), participant_id = %id, "Session ended");
    }
}
