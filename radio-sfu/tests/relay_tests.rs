mod common;

use common::*;
use radio_sfu::metadata::MAGIC;
use radio_sfu::{Endpoint, MediaReadError, Role, TrackKind};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct Stage {
    speaker: TestClient,
    listeners: Vec<TestClient>,
    speaker_pc: Arc<FakePeer>,
    listener_pcs: Vec<Arc<FakePeer>>,
    room: Arc<radio_sfu::Room>,
}

/// One connected speaker and `n` connected listeners
async fn stage(n: usize) -> Stage {
    let (registry, factory) = registry();
    let room = registry.get_or_create("news");

    let mut speaker = TestClient::join(&room, Endpoint::Speaker).await;
    speaker.start_broadcast().await;
    speaker.offer("X").await;
    let speaker_pc = factory.last();

    let mut listeners = Vec::new();
    let mut listener_pcs = Vec::new();
    for _ in 0..n {
        let mut listener = TestClient::join(&room, Endpoint::Listener).await;
        listener.start_listening().await;
        listener.answer("ok").await;
        listener_pcs.push(factory.last());
        listeners.push(listener);
    }
    speaker.drain();
    for listener in &mut listeners {
        listener.drain();
    }

    Stage {
        speaker,
        listeners,
        speaker_pc,
        listener_pcs,
        room,
    }
}

fn tagged(header: [u8; 4], timestamp: u64, rest: &[u8]) -> Vec<u8> {
    let mut payload = header.to_vec();
    payload.extend_from_slice(&MAGIC);
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload.extend_from_slice(rest);
    payload
}

#[tokio::test]
async fn audio_is_forwarded_unchanged_to_every_listener() {
    let stage = stage(2).await;
    let speaker_id = stage.speaker.id();

    let (track, feeder) = FakeInboundTrack::new(TrackKind::Audio);
    stage.speaker_pc.emit_track(track);
    let payload = tagged([1, 2, 3, 4], 99, b"opus-frame");
    feeder.send(Ok(packet(42, &payload))).unwrap();

    for pc in &stage.listener_pcs {
        let forward = pc.track_from(speaker_id.as_str(), TrackKind::Audio);
        eventually(|| forward.packets().len() == 1).await;
        assert_eq!(&forward.packets()[0].payload[..], &payload[..]);
        assert!(pc.track_from(speaker_id.as_str(), TrackKind::Video).packets().is_empty());
        assert!(pc.tracks_from("server").iter().all(|t| t.packets().is_empty()));
    }
}

#[tokio::test]
async fn video_metadata_is_stripped_and_announced() {
    let mut stage = stage(1).await;
    let speaker_id = stage.speaker.id();

    let (track, feeder) = FakeInboundTrack::new(TrackKind::Video);
    stage.speaker_pc.emit_track(track);
    feeder
        .send(Ok(packet(90_000, &tagged([9, 8, 7, 6], 1_700_000_000_123, b"vp8"))))
        .unwrap();

    let forward = stage.listener_pcs[0].track_from(speaker_id.as_str(), TrackKind::Video);
    eventually(|| forward.packets().len() == 1).await;
    assert_eq!(&forward.packets()[0].payload[..], &[9, 8, 7, 6, b'v', b'p', b'8'][..]);
    assert_eq!(forward.packets()[0].header.timestamp, 90_000);

    let expected = json!("90000:1700000000123");
    assert_eq!(stage.speaker.expect("timestamp").await.data, expected);
    assert_eq!(stage.listeners[0].expect("timestamp").await.data, expected);
    assert_eq!(stage.room.stats().await.timestamps_extracted, 1);
}

#[tokio::test]
async fn untagged_video_passes_through() {
    let mut stage = stage(1).await;
    let speaker_id = stage.speaker.id();

    let (track, feeder) = FakeInboundTrack::new(TrackKind::Video);
    stage.speaker_pc.emit_track(track);
    let payload = b"0123456789abcdefXYZ".to_vec();
    feeder.send(Ok(packet(1, &payload))).unwrap();

    let forward = stage.listener_pcs[0].track_from(speaker_id.as_str(), TrackKind::Video);
    eventually(|| forward.packets().len() == 1).await;
    assert_eq!(&forward.packets()[0].payload[..], &payload[..]);
    assert!(of_kind(&stage.listeners[0].drain(), "timestamp").is_empty());
}

#[tokio::test]
async fn one_failing_destination_does_not_block_the_rest() {
    let stage = stage(2).await;
    let speaker_id = stage.speaker.id();
    let broken = stage.listener_pcs[0].track_from(speaker_id.as_str(), TrackKind::Audio);
    broken.fail_writes.store(true, Ordering::SeqCst);

    let (track, feeder) = FakeInboundTrack::new(TrackKind::Audio);
    stage.speaker_pc.emit_track(track);
    for ts in 0..3 {
        feeder.send(Ok(packet(ts, b"frame"))).unwrap();
    }

    let healthy = stage.listener_pcs[1].track_from(speaker_id.as_str(), TrackKind::Audio);
    eventually(|| healthy.packets().len() == 3).await;
    assert!(broken.packets().is_empty());

    let stats = stage.room.stats().await;
    assert_eq!(stats.packets_relayed, 3);
    assert_eq!(stats.write_failures, 3);
}

#[tokio::test]
async fn transient_read_errors_do_not_stop_the_relay() {
    let stage = stage(1).await;
    let speaker_id = stage.speaker.id();

    let (track, feeder) = FakeInboundTrack::new(TrackKind::Audio);
    stage.speaker_pc.emit_track(track);
    feeder
        .send(Err(MediaReadError::Transient("srtp replay".into())))
        .unwrap();
    feeder.send(Ok(packet(5, b"after"))).unwrap();

    let forward = stage.listener_pcs[0].track_from(speaker_id.as_str(), TrackKind::Audio);
    eventually(|| forward.packets().len() == 1).await;
}

#[tokio::test]
async fn relay_starts_once_per_kind() {
    let stage = stage(1).await;
    let speaker_id = stage.speaker.id();
    let Role::Speaker(speaker) = stage.room.role(&speaker_id).await else {
        panic!("expected speaker role");
    };

    let (first, first_feeder) = FakeInboundTrack::new(TrackKind::Audio);
    let (second, second_feeder) = FakeInboundTrack::new(TrackKind::Audio);
    stage.speaker_pc.emit_track(first);
    // Held here so the rejected track's feeder stays connected
    stage.speaker_pc.emit_track(second.clone());
    assert_eq!(speaker.relay_kinds(), vec![TrackKind::Audio]);

    second_feeder.send(Ok(packet(1, b"ignored"))).unwrap();
    first_feeder.send(Ok(packet(2, b"relayed"))).unwrap();
    first_feeder.send(Ok(packet(3, b"relayed"))).unwrap();

    let forward = stage.listener_pcs[0].track_from(speaker_id.as_str(), TrackKind::Audio);
    eventually(|| forward.packets().len() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let payloads: Vec<Vec<u8>> = forward.packets().iter().map(|p| p.payload.to_vec()).collect();
    assert_eq!(payloads, vec![b"relayed".to_vec(), b"relayed".to_vec()]);
    drop(second);

    let (video, _video_feeder) = FakeInboundTrack::new(TrackKind::Video);
    stage.speaker_pc.emit_track(video);
    assert_eq!(speaker.relay_kinds(), vec![TrackKind::Audio, TrackKind::Video]);
}

#[tokio::test]
async fn stopped_speaker_ignores_late_tracks() {
    let stage = stage(1).await;
    let speaker_id = stage.speaker.id();
    let Role::Speaker(speaker) = stage.room.role(&speaker_id).await else {
        panic!("expected speaker role");
    };

    stage.room.remove_speaker(&speaker_id).await;
    let (track, _feeder) = FakeInboundTrack::new(TrackKind::Audio);
    stage.speaker_pc.emit_track(track);
    assert!(speaker.relay_kinds().is_empty());
}
