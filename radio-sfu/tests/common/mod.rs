//! In-memory peer connections and clients for driving rooms without a network

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use radio_sfu::{
    Endpoint, ForwardTrack, IceCandidateHandler, InboundTrack, MediaReadError, Packet,
    ParticipantId, PeerConnection, PeerConnectionFactory, Result, Room, RoomRegistry, SfuConfig,
    Session, Signal, SignalSender, TrackHandler, TrackKind, TrackLabel,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub fn description(kind: &str, sdp: &str) -> RTCSessionDescription {
    serde_json::from_value(json!({ "type": kind, "sdp": sdp })).unwrap()
}

pub fn candidate(n: u16) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn packet(timestamp: u32, payload: &[u8]) -> Packet {
    let mut packet = Packet::default();
    packet.header.timestamp = timestamp;
    packet.header.sequence_number = 1;
    packet.payload = bytes::Bytes::copy_from_slice(payload);
    packet
}

#[derive(Default)]
pub struct FakeForwardTrack {
    pub kind: Option<TrackKind>,
    pub label: Option<TrackLabel>,
    pub written: Mutex<Vec<Packet>>,
    pub detached: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Closed flag of the owning peer; detaching from a closed peer fails
    pub peer_closed: Arc<AtomicBool>,
}

impl FakeForwardTrack {
    pub fn packets(&self) -> Vec<Packet> {
        self.written.lock().clone()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn stream_id(&self) -> String {
        self.label.as_ref().map(|l| l.stream_id.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ForwardTrack for FakeForwardTrack {
    fn kind(&self) -> TrackKind {
        self.kind.unwrap_or(TrackKind::Audio)
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(webrtc::Error::new("write failed".to_string()).into());
        }
        self.written.lock().push(packet.clone());
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        if self.peer_closed.load(Ordering::SeqCst) {
            return Err(webrtc::Error::new("connection closed".to_string()).into());
        }
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Inbound track fed from the test through a channel. Dropping the feeder
/// ends the stream.
pub struct FakeInboundTrack {
    kind: TrackKind,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<std::result::Result<Packet, MediaReadError>>>,
}

pub type TrackFeeder = mpsc::UnboundedSender<std::result::Result<Packet, MediaReadError>>;

impl FakeInboundTrack {
    pub fn new(kind: TrackKind) -> (Arc<Self>, TrackFeeder) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                kind,
                rx: tokio::sync::Mutex::new(rx),
            }),
            tx,
        )
    }
}

#[async_trait]
impl InboundTrack for FakeInboundTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn read_rtp(&self) -> std::result::Result<Packet, MediaReadError> {
        match self.rx.lock().await.recv().await {
            Some(result) => result,
            None => Err(MediaReadError::EndOfStream),
        }
    }
}

#[derive(Default)]
pub struct FakePeer {
    ice_handler: Mutex<Option<IceCandidateHandler>>,
    track_handler: Mutex<Option<TrackHandler>>,
    local: Mutex<Option<RTCSessionDescription>>,
    remote: Mutex<Option<RTCSessionDescription>>,
    pub applied_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    pub forward_tracks: Mutex<Vec<Arc<FakeForwardTrack>>>,
    pub offers_created: AtomicUsize,
    pub closed: Arc<AtomicBool>,
    pub close_delay: Mutex<Option<Duration>>,
    pub fail_remote: AtomicBool,
    pub fail_video_tracks: AtomicBool,
    pub stall_gathering: AtomicBool,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.remote.lock().as_ref().map(|d| d.sdp.clone())
    }

    pub fn candidates(&self) -> Vec<RTCIceCandidateInit> {
        self.applied_candidates.lock().clone()
    }

    pub fn tracks(&self) -> Vec<Arc<FakeForwardTrack>> {
        self.forward_tracks.lock().clone()
    }

    /// Forward tracks attached for one speaker slot label
    pub fn tracks_from(&self, speaker: &str) -> Vec<Arc<FakeForwardTrack>> {
        let prefix = format!("{speaker}:");
        self.tracks()
            .into_iter()
            .filter(|t| t.stream_id().starts_with(&prefix))
            .collect()
    }

    pub fn track_from(&self, speaker: &str, kind: TrackKind) -> Arc<FakeForwardTrack> {
        self.tracks_from(speaker)
            .into_iter()
            .find(|t| t.kind == Some(kind))
            .unwrap()
    }

    /// Simulate a locally gathered candidate
    pub fn emit_candidate(&self, candidate: RTCIceCandidateInit) {
        if let Some(handler) = self.ice_handler.lock().as_ref() {
            handler(candidate);
        }
    }

    /// Simulate remote media arriving
    pub fn emit_track(&self, track: Arc<dyn InboundTrack>) {
        if let Some(handler) = self.track_handler.lock().as_ref() {
            handler(track);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(description("offer", &format!("server-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        if self.remote.lock().is_none() {
            return Err(webrtc::Error::new("no remote description".to_string()).into());
        }
        Ok(description("answer", "server-answer"))
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(webrtc::Error::new("bad sdp".to_string()).into());
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.local.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if self.remote.lock().is_none() {
            return Err(webrtc::Error::new("remote description not set".to_string()).into());
        }
        self.applied_candidates.lock().push(candidate);
        Ok(())
    }

    fn on_ice_candidate(&self, handler: IceCandidateHandler) {
        *self.ice_handler.lock() = Some(handler);
    }

    fn on_track(&self, handler: TrackHandler) {
        *self.track_handler.lock() = Some(handler);
    }

    async fn add_forward_track(
        &self,
        kind: TrackKind,
        label: TrackLabel,
    ) -> Result<Arc<dyn ForwardTrack>> {
        if kind == TrackKind::Video && self.fail_video_tracks.load(Ordering::SeqCst) {
            return Err(webrtc::Error::new("no video sender".to_string()).into());
        }
        let track = Arc::new(FakeForwardTrack {
            kind: Some(kind),
            label: Some(label),
            peer_closed: Arc::clone(&self.closed),
            ..FakeForwardTrack::default()
        });
        self.forward_tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }

    async fn gathering_complete(&self) {
        if self.stall_gathering.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    async fn close(&self) -> Result<()> {
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    /// Applied to the next created peer
    pub stall_next_gathering: AtomicBool,
    /// Applied to the next created peer
    pub slow_close_next: Mutex<Option<Duration>>,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().unwrap()
    }

    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(FakePeer::default());
        if self.stall_next_gathering.swap(false, Ordering::SeqCst) {
            peer.stall_gathering.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.slow_close_next.lock().take() {
            *peer.close_delay.lock() = Some(delay);
        }
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

pub fn registry_with(config: SfuConfig) -> (RoomRegistry, Arc<FakePeerFactory>) {
    let factory = FakePeerFactory::new();
    let registry = RoomRegistry::new(config, factory.clone());
    (registry, factory)
}

pub fn registry() -> (RoomRegistry, Arc<FakePeerFactory>) {
    registry_with(SfuConfig::default())
}

/// A session plus the receiving end of its outbound queue
pub struct TestClient {
    pub session: Session,
    pub outbound: mpsc::Receiver<Signal>,
}

impl TestClient {
    pub async fn join(room: &Arc<Room>, endpoint: Endpoint) -> Self {
        Self::try_join(room, endpoint).await.unwrap()
    }

    pub async fn try_join(room: &Arc<Room>, endpoint: Endpoint) -> Result<Self> {
        let (sender, outbound) = SignalSender::channel(256);
        let session = Session::join(Arc::clone(room), endpoint, sender).await?;
        Ok(Self { session, outbound })
    }

    pub fn id(&self) -> ParticipantId {
        self.session.participant_id().clone()
    }

    pub async fn send(&mut self, signal: Value) -> Result<()> {
        self.session.handle_text(&signal.to_string()).await
    }

    pub async fn start_broadcast(&mut self) {
        self.send(json!({ "type": "broadcast-started" })).await.unwrap();
    }

    pub async fn offer(&mut self, sdp: &str) {
        self.send(json!({ "type": "offer", "data": { "type": "offer", "sdp": sdp } }))
            .await
            .unwrap();
    }

    pub async fn start_listening(&mut self) {
        self.send(json!({ "type": "listening-started" })).await.unwrap();
    }

    pub async fn answer(&mut self, sdp: &str) {
        self.send(json!({ "type": "answer", "data": { "type": "answer", "sdp": sdp } }))
            .await
            .unwrap();
    }

    pub async fn ice(&mut self, candidate: &RTCIceCandidateInit) -> Result<()> {
        self.send(json!({ "type": "ice", "data": candidate })).await
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<Signal> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.outbound.try_recv() {
            signals.push(signal);
        }
        signals
    }

    /// Wait for the next signal of `kind`, skipping others
    pub async fn expect(&mut self, kind: &str) -> Signal {
        let wait = async {
            loop {
                let signal = self.outbound.recv().await.unwrap();
                if signal.kind == kind {
                    return signal;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
    }

    pub async fn leave(self) {
        self.session.leave().await;
    }
}

pub fn kinds(signals: &[Signal]) -> Vec<&str> {
    signals.iter().map(|s| s.kind.as_str()).collect()
}

pub fn of_kind<'a>(signals: &'a [Signal], kind: &str) -> Vec<&'a Signal> {
    signals.iter().filter(|s| s.kind == kind).collect()
}

/// Poll until `check` holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
