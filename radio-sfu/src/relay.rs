//! Per-(speaker, kind) RTP relay task

use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;

use crate::metadata;
use crate::room::{Audience, Room};
use crate::signal::ServerSignal;
use crate::track::{ForwardTrack, InboundTrack, TrackKind};
use crate::types::{ParticipantId, SpeakerSlot};

pub(crate) fn spawn(
    room: Arc<Room>,
    speaker_id: ParticipantId,
    track: Arc<dyn InboundTrack>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(room, speaker_id, track, cancel))
}

async fn run(
    room: Arc<Room>,
    speaker_id: ParticipantId,
    track: Arc<dyn InboundTrack>,
    cancel: CancellationToken,
) {
    let kind = track.kind();
    let slot = SpeakerSlot::Speaker(speaker_id.clone());
    debug!(room_id = %room.id(), speaker_id = %speaker_id, kind = %kind, "Relay started");

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => {
                debug!(speaker_id = %speaker_id, kind = %kind, "Relay cancelled");
                break;
            }
            read = track.read_rtp() => read,
        };

        let mut packet = match read {
            Ok(packet) => packet,
            Err(e) if e.is_terminal() => {
                info!(speaker_id = %speaker_id, kind = %kind, "Inbound stream ended, relay stopping");
                break;
            }
            Err(e) => {
                warn!(speaker_id = %speaker_id, kind = %kind, error = %e, "RTP read failed");
                continue;
            }
        };

        if kind == TrackKind::Video {
            if let Some(extracted) = metadata::extract(&packet.payload) {
                packet.payload = extracted.payload;
                room.counters.timestamps.fetch_add(1, Ordering::Relaxed);
                let data =
                    metadata::timestamp_signal_data(packet.header.timestamp, extracted.timestamp);
                room.notify(&ServerSignal::Timestamp(data), Audience::All).await;
            }
        }

        let destinations = room.destinations(&slot, kind).await;
        forward(&room, &speaker_id, kind, &destinations, &packet).await;
    }
}

/// Write one packet to every destination concurrently
async fn forward(
    room: &Room,
    speaker_id: &ParticipantId,
    kind: TrackKind,
    destinations: &[Arc<dyn ForwardTrack>],
    packet: &Packet,
) {
    room.counters.packets.fetch_add(1, Ordering::Relaxed);
    if destinations.is_empty() {
        return;
    }

    let results = join_all(destinations.iter().map(|track| track.write_rtp(packet))).await;
    let mut delivered = 0u64;
    for result in results {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => {
                room.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                debug!(speaker_id = %speaker_id, kind = %kind, error = %e, "Forward write failed");
            }
        }
    }

    let bytes = (packet.payload.len() as u64).saturating_mul(delivered);
    room.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
}
