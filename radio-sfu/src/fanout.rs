//! Track fan-out table
//!
//! Maps `(speaker slot, listener, kind)` to the server-originated track that
//! carries that speaker's media to that listener. The table itself is plain
//! data guarded by the room lock. Attaching senders ([`create_pair`]) and
//! detaching them happen outside that lock, so relay lookups never wait on a
//! peer connection.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::peer::PeerConnection;
use crate::track::{ForwardTrack, TrackKind, TrackLabel};
use crate::types::{ParticipantId, SpeakerSlot};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FanoutKey {
    pub speaker: SpeakerSlot,
    pub listener: ParticipantId,
    pub kind: TrackKind,
}

impl FanoutKey {
    #[must_use]
    pub const fn new(speaker: SpeakerSlot, listener: ParticipantId, kind: TrackKind) -> Self {
        Self {
            speaker,
            listener,
            kind,
        }
    }
}

/// A removed entry, still holding its track so the caller can detach it
pub struct FanoutEntry {
    pub key: FanoutKey,
    pub track: Arc<dyn ForwardTrack>,
}

/// Write handles returned for a freshly created pairing
pub struct FanoutPair {
    pub audio: Arc<dyn ForwardTrack>,
    pub video: Arc<dyn ForwardTrack>,
}

impl FanoutPair {
    /// Remove both senders from the listener's peer connection
    pub async fn detach(&self) {
        for track in [&self.audio, &self.video] {
            if let Err(e) = track.detach().await {
                warn!(kind = %track.kind(), error = %e, "Failed to detach unused forward track");
            }
        }
    }
}

#[derive(Default)]
pub struct FanoutTable {
    entries: IndexMap<FanoutKey, Arc<dyn ForwardTrack>>,
}

impl FanoutTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair allocated by [`create_pair`]. Returns false, leaving
    /// the table untouched, when the pairing already exists.
    pub fn insert_pair(
        &mut self,
        speaker: &SpeakerSlot,
        listener: &ParticipantId,
        pair: &FanoutPair,
    ) -> bool {
        if self.count_for_pair(speaker, listener) > 0 {
            return false;
        }
        self.insert(
            FanoutKey::new(speaker.clone(), listener.clone(), TrackKind::Audio),
            Arc::clone(&pair.audio),
        );
        self.insert(
            FanoutKey::new(speaker.clone(), listener.clone(), TrackKind::Video),
            Arc::clone(&pair.video),
        );
        true
    }

    /// Register a single track, returning the one it replaced
    pub fn insert(
        &mut self,
        key: FanoutKey,
        track: Arc<dyn ForwardTrack>,
    ) -> Option<Arc<dyn ForwardTrack>> {
        self.entries.insert(key, track)
    }

    /// Remove every entry fed by `speaker`
    pub fn remove_for_speaker(&mut self, speaker: &SpeakerSlot) -> Vec<FanoutEntry> {
        self.remove_where(|key| &key.speaker == speaker)
    }

    /// Remove every entry delivering to `listener`
    pub fn remove_for_listener(&mut self, listener: &ParticipantId) -> Vec<FanoutEntry> {
        self.remove_where(|key| &key.listener == listener)
    }

    fn remove_where(&mut self, matches: impl Fn(&FanoutKey) -> bool) -> Vec<FanoutEntry> {
        let keys: Vec<FanoutKey> = self.entries.keys().filter(|k| matches(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|key| {
                self.entries
                    .shift_remove(&key)
                    .map(|track| FanoutEntry { key, track })
            })
            .collect()
    }

    /// Destinations for one speaker's media of one kind, in registration order
    #[must_use]
    pub fn lookup(&self, speaker: &SpeakerSlot, kind: TrackKind) -> Vec<Arc<dyn ForwardTrack>> {
        self.entries
            .iter()
            .filter(|(key, _)| &key.speaker == speaker && key.kind == kind)
            .map(|(_, track)| Arc::clone(track))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, key: &FanoutKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of tracks registered between one speaker slot and one listener
    #[must_use]
    pub fn count_for_pair(&self, speaker: &SpeakerSlot, listener: &ParticipantId) -> usize {
        self.entries
            .keys()
            .filter(|key| &key.speaker == speaker && &key.listener == listener)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Allocate an audio and a video track on the listener's peer connection.
/// Either both are allocated or neither is. Nothing is registered; the
/// caller inserts the pair with [`FanoutTable::insert_pair`].
pub async fn create_pair(
    speaker: &SpeakerSlot,
    listener: &ParticipantId,
    pc: &dyn PeerConnection,
) -> Result<FanoutPair> {
    let audio = pc
        .add_forward_track(
            TrackKind::Audio,
            TrackLabel::new(TrackKind::Audio, speaker, listener),
        )
        .await?;

    let video = match pc
        .add_forward_track(
            TrackKind::Video,
            TrackLabel::new(TrackKind::Video, speaker, listener),
        )
        .await
    {
        Ok(video) => video,
        Err(e) => {
            if let Err(detach_err) = audio.detach().await {
                warn!(
                    speaker = %speaker,
                    listener = %listener,
                    error = %detach_err,
                    "Failed to detach audio track after video allocation failed"
                );
            }
            return Err(e);
        }
    };

    Ok(FanoutPair { audio, video })
}
