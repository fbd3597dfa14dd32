//! `webrtc` crate adapter for the [`PeerConnection`] seam

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use crate::config::SfuConfig;
use crate::error::{MediaReadError, Result};
use crate::peer::{IceCandidateHandler, PeerConnection, PeerConnectionFactory, TrackHandler};
use crate::track::{ForwardTrack, InboundTrack, TrackKind, TrackLabel};

/// Builds peer connections sharing one media engine and interceptor setup
pub struct RtcPeerFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcPeerFactory {
    pub fn new(config: &SfuConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        if config.udp_port_min > 0 && config.udp_port_max > 0 {
            let ephemeral = EphemeralUDP::new(config.udp_port_min, config.udp_port_max)
                .map_err(|e| webrtc::Error::new(format!("invalid UDP port range: {e}")))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
            info!(
                udp_port_min = config.udp_port_min,
                udp_port_max = config.udp_port_max,
                "WebRTC UDP port range configured"
            );
        }
        if !config.public_ips.is_empty() {
            setting_engine
                .set_nat_1to1_ips(config.public_ips.clone(), RTCIceCandidateType::Host);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerFactory {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>> {
        let rtc_config = RTCConfiguration {
            ice_servers: if self.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await?);

        // A failed connection is closed so its relay reads end promptly
        let weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            info!(state = %state, "ICE connection state changed");
            let weak = weak.clone();
            Box::pin(async move {
                if state == RTCIceConnectionState::Failed {
                    if let Some(pc) = weak.upgrade() {
                        if let Err(e) = pc.close().await {
                            warn!(error = %e, "Failed to close peer connection after ICE failure");
                        }
                    }
                }
            })
        }));

        Ok(Arc::new(RtcPeerConnection { pc }))
    }
}

pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        Ok(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_local_description(desc).await?)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_remote_description(desc).await?)
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.pc.local_description().await
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        Ok(self.pc.add_ice_candidate(candidate).await?)
    }

    fn on_ice_candidate(&self, handler: IceCandidateHandler) {
        let handler = Arc::new(handler);
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => handler(init),
                    Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                }
            })
        }));
    }

    fn on_track(&self, handler: TrackHandler) {
        let handler = Arc::new(handler);
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                info!(
                    kind = %track.kind(),
                    ssrc = track.ssrc(),
                    codec = %track.codec().capability.mime_type,
                    "Remote track received"
                );
                handler(Arc::new(RtcInboundTrack { track }));
            })
        }));
    }

    async fn add_forward_track(
        &self,
        kind: TrackKind,
        label: TrackLabel,
    ) -> Result<Arc<dyn ForwardTrack>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            codec_capability(kind),
            label.id,
            label.stream_id,
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain RTCP so the interceptors (NACK, reports) keep running
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
            trace!("RTCP reader for forward track stopped");
        });

        Ok(Arc::new(RtcForwardTrack {
            kind,
            track,
            sender,
            pc: Arc::downgrade(&self.pc),
        }))
    }

    async fn gathering_complete(&self) {
        let mut done = self.pc.gathering_complete_promise().await;
        let _ = done.recv().await;
    }

    async fn close(&self) -> Result<()> {
        Ok(self.pc.close().await?)
    }
}

fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

struct RtcForwardTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticRTP>,
    sender: Arc<RTCRtpSender>,
    pc: Weak<RTCPeerConnection>,
}

#[async_trait]
impl ForwardTrack for RtcForwardTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        self.track.write_rtp(packet).await?;
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        match self.pc.upgrade() {
            Some(pc) => Ok(pc.remove_track(&self.sender).await?),
            None => {
                debug!("Peer connection already dropped, stopping sender directly");
                Ok(self.sender.stop().await?)
            }
        }
    }
}

struct RtcInboundTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for RtcInboundTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::from(self.track.kind())
    }

    async fn read_rtp(&self) -> std::result::Result<Packet, MediaReadError> {
        self.track
            .read_rtp()
            .await
            .map(|(packet, _attributes)| packet)
            .map_err(classify_read_error)
    }
}

/// Split inbound read failures into end-of-stream and everything else
fn classify_read_error(err: webrtc::Error) -> MediaReadError {
    match err {
        webrtc::Error::ErrClosedPipe | webrtc::Error::ErrRTPReceiverNil => {
            MediaReadError::EndOfStream
        }
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("eof") || lower.contains("closed") {
                MediaReadError::EndOfStream
            } else {
                MediaReadError::Transient(message)
            }
        }
    }
}
