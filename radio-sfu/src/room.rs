//! A room: the set of participants sharing one topic.
//!
//! All membership and fan-out state sits behind a single `RwLock`. Every
//! mutation takes the write lock; relay tasks only take the read lock to
//! clone their destination list. The lock is never held across peer
//! connection work: tracks are allocated before registration and closed or
//! detached after removal.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::SfuConfig;
use crate::error::{Result, SfuError, SignalingError};
use crate::fanout::{self, FanoutEntry, FanoutTable};
use crate::listener::Listener;
use crate::participant::{Participant, Role, RoleKind};
use crate::peer::{PeerConnection, PeerConnectionFactory};
use crate::signal::ServerSignal;
use crate::speaker::{Speaker, SpeakerState};
use crate::track::{ForwardTrack, TrackKind};
use crate::transport::SignalSender;
use crate::types::{Endpoint, ParticipantId, RoomId, SpeakerSlot};

/// Who receives a room notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Speakers,
    Listeners,
    Only(ParticipantId),
}

struct Member {
    participant: Arc<Participant>,
    role: Role,
}

#[derive(Default)]
struct RoomState {
    members: Vec<Member>,
    speakers: Vec<Arc<Speaker>>,
    listeners: Vec<Arc<Listener>>,
    fanout: FanoutTable,
}

impl RoomState {
    fn member(&self, id: &ParticipantId) -> Option<&Member> {
        self.members.iter().find(|m| m.participant.id() == id)
    }

    fn member_mut(&mut self, id: &ParticipantId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.participant.id() == id)
    }

    fn has_slot(&self, slot: &SpeakerSlot) -> bool {
        match slot {
            SpeakerSlot::Server => true,
            SpeakerSlot::Speaker(id) => self.speakers.iter().any(|s| s.id() == id),
        }
    }

    fn has_listener(&self, listener: &Arc<Listener>) -> bool {
        self.listeners.iter().any(|l| Arc::ptr_eq(l, listener))
    }

    fn notify(&self, signal: &ServerSignal, audience: &Audience) {
        match audience {
            Audience::All => {
                for member in &self.members {
                    member.participant.notify(signal);
                }
            }
            Audience::Speakers => {
                for speaker in &self.speakers {
                    speaker.participant().notify(signal);
                }
            }
            Audience::Listeners => {
                for listener in &self.listeners {
                    listener.participant().notify(signal);
                }
            }
            Audience::Only(id) => {
                if let Some(member) = self.member(id) {
                    member.participant.notify(signal);
                }
            }
        }
    }
}

/// Relay counters, updated by the relay tasks without taking the room lock
#[derive(Debug, Default)]
pub(crate) struct RelayCounters {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    pub write_failures: AtomicU64,
    pub timestamps: AtomicU64,
}

/// Room statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub room_id: String,
    pub participants: usize,
    pub speakers: usize,
    pub listeners: usize,
    pub fanout_tracks: usize,
    pub packets_relayed: u64,
    pub bytes_relayed: u64,
    pub write_failures: u64,
    pub timestamps_extracted: u64,
}

pub struct Room {
    id: RoomId,
    config: Arc<SfuConfig>,
    factory: Arc<dyn PeerConnectionFactory>,
    state: RwLock<RoomState>,
    pub(crate) counters: RelayCounters,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Room {
    #[must_use]
    pub fn new(
        id: RoomId,
        config: Arc<SfuConfig>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        Self {
            id,
            config,
            factory,
            state: RwLock::new(RoomState::default()),
            counters: RelayCounters::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }

    /// Register a newly connected client and tell everyone the new headcount
    pub async fn add_participant(
        &self,
        endpoint: Endpoint,
        sender: SignalSender,
    ) -> Result<Arc<Participant>> {
        let participant = Arc::new(Participant::new(
            ParticipantId::generate(),
            endpoint,
            sender,
        ));

        {
            let mut state = self.state.write().await;
            let limit = self.config.max_participants_per_room;
            if limit > 0 && state.members.len() >= limit {
                warn!(room_id = %self.id, limit, "Room is full, rejecting participant");
                return Err(SfuError::RoomFull {
                    room: self.id.clone(),
                    limit,
                });
            }

            state.members.push(Member {
                participant: Arc::clone(&participant),
                role: Role::None,
            });
            let count = state.members.len();
            state.notify(&ServerSignal::ParticipantCount(count), &Audience::All);
        }

        info!(
            room_id = %self.id,
            participant_id = %participant.id(),
            endpoint = %participant.endpoint(),
            "Participant joined room"
        );
        self.log_stats().await;
        Ok(participant)
    }

    /// Drop a participant. Its role must already be released. Absent id is a no-op.
    pub async fn remove_participant(&self, id: &ParticipantId) -> bool {
        {
            let mut state = self.state.write().await;
            let Some(pos) = state.members.iter().position(|m| m.participant.id() == id) else {
                return false;
            };
            let member = state.members.remove(pos);
            if member.role.kind() != RoleKind::None {
                warn!(
                    room_id = %self.id,
                    participant_id = %id,
                    role = %member.role.kind(),
                    "Participant removed while still holding a role"
                );
            }
            let count = state.members.len();
            state.notify(&ServerSignal::ParticipantCount(count), &Audience::All);
        }

        info!(room_id = %self.id, participant_id = %id, "Participant left room");
        self.log_stats().await;
        true
    }

    /// Make `participant` a speaker. Any previous role is released first.
    pub async fn start_broadcast(
        self: &Arc<Self>,
        participant: &Arc<Participant>,
        early_candidates: Vec<RTCIceCandidateInit>,
    ) -> Result<Arc<Speaker>> {
        let id = participant.id().clone();
        self.remove_listener(&id).await;
        self.remove_speaker(&id).await;

        let pc = self.factory.create().await?;
        let speaker = Arc::new(Speaker::new(
            Arc::clone(participant),
            Arc::clone(&pc),
            early_candidates,
        ));
        register_ice_forwarding(pc.as_ref(), participant.sender().clone(), &id);

        let weak_room = Arc::downgrade(self);
        let weak_speaker = Arc::downgrade(&speaker);
        pc.on_track(Box::new(move |track| {
            if let (Some(room), Some(speaker)) = (weak_room.upgrade(), weak_speaker.upgrade()) {
                speaker.start_relay(room, track);
            }
        }));

        let listeners = {
            let mut state = self.state.write().await;
            match state.member_mut(&id) {
                Some(member) => member.role = Role::Speaker(Arc::clone(&speaker)),
                None => {
                    drop(state);
                    speaker.close().await;
                    return Err(SfuError::Transport(format!(
                        "participant {id} left before broadcasting started"
                    )));
                }
            }
            state.speakers.push(Arc::clone(&speaker));
            state.listeners.clone()
        };

        let slot = SpeakerSlot::Speaker(id.clone());
        let renegotiate = self
            .attach_pairs(
                listeners
                    .into_iter()
                    .map(|listener| (slot.clone(), listener))
                    .collect(),
            )
            .await;

        speaker.set_state(SpeakerState::Negotiating);
        info!(room_id = %self.id, speaker_id = %id, "Speaker started broadcasting");

        for listener in renegotiate {
            self.spawn_renegotiation(listener);
        }
        self.log_stats().await;
        Ok(speaker)
    }

    /// Apply a speaker's offer, answer it and announce the speaker
    pub async fn accept_offer(&self, id: &ParticipantId, offer: RTCSessionDescription) -> Result<()> {
        let Role::Speaker(speaker) = self.role(id).await else {
            return Err(SignalingError::NoActiveRole {
                expected: "speaker",
            }
            .into());
        };

        let answer = speaker
            .accept_offer(offer, self.config.ice_gathering_timeout())
            .await?;
        speaker.participant().send(&ServerSignal::Answer(answer))?;
        self.notify(&ServerSignal::SpeakerConnected(id.clone()), Audience::All)
            .await;

        info!(room_id = %self.id, speaker_id = %id, "Speaker connected");
        Ok(())
    }

    /// Make `participant` a listener subscribed to the server slot and every speaker
    pub async fn start_listening(
        self: &Arc<Self>,
        participant: &Arc<Participant>,
        early_candidates: Vec<RTCIceCandidateInit>,
    ) -> Result<Arc<Listener>> {
        let id = participant.id().clone();
        self.remove_speaker(&id).await;
        self.remove_listener(&id).await;

        let pc = self.factory.create().await?;
        let listener = Arc::new(Listener::new(
            Arc::clone(participant),
            Arc::clone(&pc),
            early_candidates,
        ));
        register_ice_forwarding(pc.as_ref(), participant.sender().clone(), &id);

        let slots: Vec<SpeakerSlot> = {
            let mut state = self.state.write().await;
            match state.member_mut(&id) {
                Some(member) => member.role = Role::Listener(Arc::clone(&listener)),
                None => {
                    drop(state);
                    listener.close().await;
                    return Err(SfuError::Transport(format!(
                        "participant {id} left before listening started"
                    )));
                }
            }
            state.listeners.push(Arc::clone(&listener));
            std::iter::once(SpeakerSlot::Server)
                .chain(state.speakers.iter().map(|s| SpeakerSlot::Speaker(s.id().clone())))
                .collect()
        };

        // Still Idle here, so nothing is queued for renegotiation
        self.attach_pairs(
            slots
                .into_iter()
                .map(|slot| (slot, Arc::clone(&listener)))
                .collect(),
        )
        .await;

        info!(room_id = %self.id, listener_id = %id, "Listener subscribing");
        listener
            .subscribe(self.config.ice_gathering_timeout())
            .await?;
        self.log_stats().await;
        Ok(listener)
    }

    /// Apply a listener's answer to the outstanding server offer
    pub async fn accept_answer(
        self: &Arc<Self>,
        id: &ParticipantId,
        answer: RTCSessionDescription,
    ) -> Result<()> {
        let Role::Listener(listener) = self.role(id).await else {
            return Err(SignalingError::NoActiveRole {
                expected: "listener",
            }
            .into());
        };

        let outcome = listener.accept_answer(answer).await?;
        if outcome.first_connect {
            info!(room_id = %self.id, listener_id = %id, "Listener connected");
            self.notify(&ServerSignal::ListenerConnected(id.clone()), Audience::Speakers)
                .await;
        }
        if outcome.renegotiate {
            self.spawn_renegotiation(listener);
        }
        Ok(())
    }

    /// Route a trickled candidate to the participant's role. Hands the
    /// candidate back when no role exists yet.
    pub async fn add_ice_candidate(
        &self,
        id: &ParticipantId,
        candidate: RTCIceCandidateInit,
    ) -> Result<Option<RTCIceCandidateInit>> {
        match self.role(id).await {
            Role::Speaker(speaker) => speaker.add_ice_candidate(candidate).await.map(|()| None),
            Role::Listener(listener) => listener.add_ice_candidate(candidate).await.map(|()| None),
            Role::None => Ok(Some(candidate)),
        }
    }

    /// Tear down a speaker. Absent id is a no-op.
    pub async fn remove_speaker(&self, id: &ParticipantId) -> bool {
        let (speaker, removed) = {
            let mut state = self.state.write().await;
            let Some(pos) = state.speakers.iter().position(|s| s.id() == id) else {
                return false;
            };
            let speaker = state.speakers.remove(pos);
            if let Some(member) = state.member_mut(id) {
                member.role = Role::None;
            }
            let removed = state
                .fanout
                .remove_for_speaker(&SpeakerSlot::Speaker(id.clone()));
            (speaker, removed)
        };

        speaker.close().await;
        detach_all(&removed).await;

        {
            let state = self.state.read().await;
            for entry in &removed {
                state.notify(
                    &ServerSignal::TrackDisconnected {
                        speaker_id: id.clone(),
                        kind: entry.key.kind,
                    },
                    &Audience::Only(entry.key.listener.clone()),
                );
            }
            state.notify(&ServerSignal::SpeakerDisconnected(id.clone()), &Audience::Listeners);
        }

        info!(
            room_id = %self.id,
            speaker_id = %id,
            fanout_removed = removed.len(),
            "Speaker removed"
        );
        self.log_stats().await;
        true
    }

    /// Tear down a listener. Absent id is a no-op.
    pub async fn remove_listener(&self, id: &ParticipantId) -> bool {
        let (listener, removed) = {
            let mut state = self.state.write().await;
            let Some(pos) = state.listeners.iter().position(|l| l.id() == id) else {
                return false;
            };
            let listener = state.listeners.remove(pos);
            if let Some(member) = state.member_mut(id) {
                member.role = Role::None;
            }
            let removed = state.fanout.remove_for_listener(id);
            (listener, removed)
        };

        // Senders go before the connection; removing a track from a closed
        // connection fails
        detach_all(&removed).await;
        listener.close().await;

        self.notify(&ServerSignal::ListenerDisconnected(id.clone()), Audience::Speakers)
            .await;

        info!(
            room_id = %self.id,
            listener_id = %id,
            fanout_removed = removed.len(),
            "Listener removed"
        );
        self.log_stats().await;
        true
    }

    /// Release every role in the room. Participants stay until their
    /// connections close.
    pub async fn close_all(&self) {
        let (speakers, listeners): (Vec<ParticipantId>, Vec<ParticipantId>) = {
            let state = self.state.read().await;
            (
                state.speakers.iter().map(|s| s.id().clone()).collect(),
                state.listeners.iter().map(|l| l.id().clone()).collect(),
            )
        };
        for id in &speakers {
            self.remove_speaker(id).await;
        }
        for id in &listeners {
            self.remove_listener(id).await;
        }
    }

    pub async fn notify(&self, signal: &ServerSignal, audience: Audience) {
        self.state.read().await.notify(signal, &audience);
    }

    /// Forward tracks currently fed by `speaker` for one kind
    pub async fn destinations(
        &self,
        speaker: &SpeakerSlot,
        kind: TrackKind,
    ) -> Vec<Arc<dyn ForwardTrack>> {
        self.state.read().await.fanout.lookup(speaker, kind)
    }

    /// The role a participant currently holds
    pub async fn role(&self, id: &ParticipantId) -> Role {
        self.state
            .read()
            .await
            .member(id)
            .map(|m| m.role.clone())
            .unwrap_or_default()
    }

    pub async fn role_kind(&self, id: &ParticipantId) -> Option<RoleKind> {
        self.state.read().await.member(id).map(|m| m.role.kind())
    }

    pub async fn participant_ids(&self) -> Vec<ParticipantId> {
        let state = self.state.read().await;
        state.members.iter().map(|m| m.participant.id().clone()).collect()
    }

    pub async fn speaker_ids(&self) -> Vec<ParticipantId> {
        let state = self.state.read().await;
        state.speakers.iter().map(|s| s.id().clone()).collect()
    }

    pub async fn listener_ids(&self) -> Vec<ParticipantId> {
        let state = self.state.read().await;
        state.listeners.iter().map(|l| l.id().clone()).collect()
    }

    pub async fn participant_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    /// Fan-out tracks between one speaker slot and one listener
    pub async fn fanout_count(&self, speaker: &SpeakerSlot, listener: &ParticipantId) -> usize {
        self.state
            .read()
            .await
            .fanout
            .count_for_pair(speaker, listener)
    }

    pub async fn stats(&self) -> RoomStats {
        let state = self.state.read().await;
        RoomStats {
            room_id: self.id.to_string(),
            participants: state.members.len(),
            speakers: state.speakers.len(),
            listeners: state.listeners.len(),
            fanout_tracks: state.fanout.len(),
            packets_relayed: self.counters.packets.load(Ordering::Relaxed),
            bytes_relayed: self.counters.bytes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            timestamps_extracted: self.counters.timestamps.load(Ordering::Relaxed),
        }
    }

    async fn log_stats(&self) {
        let stats = self.stats().await;
        debug!(
            room_id = %stats.room_id,
            participants = stats.participants,
            speakers = stats.speakers,
            listeners = stats.listeners,
            fanout_tracks = stats.fanout_tracks,
            "Room stats"
        );
    }

    /// Allocate the requested pairs without holding the room lock, then
    /// register those whose speaker slot and listener are both still present.
    /// Pairs that lost a race are detached. Returns the listeners that need a
    /// fresh offer now.
    async fn attach_pairs(&self, wanted: Vec<(SpeakerSlot, Arc<Listener>)>) -> Vec<Arc<Listener>> {
        let mut allocated = Vec::with_capacity(wanted.len());
        for (slot, listener) in wanted {
            let pc = Arc::clone(listener.peer_connection());
            match fanout::create_pair(&slot, listener.id(), pc.as_ref()).await {
                Ok(pair) => allocated.push((slot, listener, pair)),
                Err(e) => warn!(
                    room_id = %self.id,
                    speaker = %slot,
                    listener_id = %listener.id(),
                    error = %e,
                    "Failed to attach speaker tracks to listener"
                ),
            }
        }

        let mut renegotiate = Vec::new();
        let mut unused = Vec::new();
        {
            let mut state = self.state.write().await;
            for (slot, listener, pair) in allocated {
                let live = state.has_slot(&slot) && state.has_listener(&listener);
                if live && state.fanout.insert_pair(&slot, listener.id(), &pair) {
                    if listener.request_renegotiation() {
                        renegotiate.push(listener);
                    }
                } else {
                    debug!(
                        room_id = %self.id,
                        speaker = %slot,
                        listener_id = %listener.id(),
                        "Discarding fan-out pair for departed or already paired participant"
                    );
                    unused.push(pair);
                }
            }
        }

        for pair in unused {
            pair.detach().await;
        }
        renegotiate
    }

    fn spawn_renegotiation(self: &Arc<Self>, listener: Arc<Listener>) {
        let timeout = self.config.ice_gathering_timeout();
        let room_id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = listener.renegotiate(timeout).await {
                warn!(
                    room_id = %room_id,
                    listener_id = %listener.id(),
                    error = %e,
                    "Listener renegotiation failed"
                );
            }
        });
    }
}

/// Forward every local ICE candidate to the participant's own transport
fn register_ice_forwarding(pc: &dyn PeerConnection, sender: SignalSender, id: &ParticipantId) {
    let id = id.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Err(e) = sender.send(&ServerSignal::Ice(candidate)) {
            debug!(participant_id = %id, error = %e, "Failed to forward local ICE candidate");
        }
    }));
}

async fn detach_all(entries: &[FanoutEntry]) {
    for entry in entries {
        if let Err(e) = entry.track.detach().await {
            warn!(
                speaker = %entry.key.speaker,
                listener_id = %entry.key.listener,
                kind = %entry.key.kind,
                error = %e,
                "Failed to detach forward track"
            );
        }
    }
}
