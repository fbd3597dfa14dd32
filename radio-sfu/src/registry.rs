//! Room registry: process-wide map from topic to room

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SfuConfig;
use crate::peer::PeerConnectionFactory;
use crate::room::{Room, RoomStats};
use crate::types::RoomId;

/// Aggregated statistics across all rooms
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Number of rooms ever created (rooms are never removed)
    pub rooms: usize,
    pub participants: usize,
    pub speakers: usize,
    pub listeners: usize,
    pub fanout_tracks: usize,
    pub packets_relayed: u64,
    pub bytes_relayed: u64,
    pub room_stats: Vec<RoomStats>,
}

pub struct RoomRegistry {
    config: Arc<SfuConfig>,
    factory: Arc<dyn PeerConnectionFactory>,
    /// Rooms by topic (`DashMap` for lock-free concurrent access)
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: SfuConfig, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        info!(
            ice_servers = config.ice_servers.len(),
            max_participants_per_room = config.max_participants_per_room,
            ice_gathering_timeout_secs = config.ice_gathering_timeout_secs,
            "Room registry initialized"
        );
        Self {
            config: Arc::new(config),
            factory,
            rooms: DashMap::new(),
        }
    }

    /// Return the room for `topic`, creating it on first use.
    /// Concurrent callers for the same topic always get the same room.
    pub fn get_or_create(&self, topic: impl Into<RoomId>) -> Arc<Room> {
        let room_id = topic.into();
        let entry = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!(room_id = %room_id, "Created new room");
            Arc::new(Room::new(
                room_id.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.factory),
            ))
        });
        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| Arc::clone(room.value()))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }

    /// Snapshot of every room
    pub async fn stats(&self) -> RegistryStats {
        // Collect handles first so no map shard guard is held across an await
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();

        let mut stats = RegistryStats {
            rooms: rooms.len(),
            ..RegistryStats::default()
        };
        for room in rooms {
            let room_stats = room.stats().await;
            stats.participants += room_stats.participants;
            stats.speakers += room_stats.speakers;
            stats.listeners += room_stats.listeners;
            stats.fanout_tracks += room_stats.fanout_tracks;
            stats.packets_relayed += room_stats.packets_relayed;
            stats.bytes_relayed += room_stats.bytes_relayed;
            stats.room_stats.push(room_stats);
        }
        stats.room_stats.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        stats
    }

    /// Release every speaker and listener in every room
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        info!(rooms = rooms.len(), "Shutting down room registry");
        for room in rooms {
            room.close_all().await;
            debug!(room_id = %room.id(), "Room roles released");
        }
    }
}
