//! In-band latency metadata carried in video payloads
//!
//! A publisher may splice 12 bytes into a video RTP payload right after its
//! 4-byte payload header:
//!
//! ```text
//! [4-byte header][DE AD BE EF][8-byte big-endian timestamp][rest...]
//! ```
//!
//! The relay strips them before forwarding and reports the timestamp to the
//! room.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 4;
pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
pub const TIMESTAMP_LEN: usize = 8;

/// Bytes spliced in by the publisher
pub const INJECTED_LEN: usize = MAGIC.len() + TIMESTAMP_LEN;

const MAGIC_START: usize = HEADER_LEN;
const TIMESTAMP_START: usize = MAGIC_START + MAGIC.len();
const REST_START: usize = TIMESTAMP_START + TIMESTAMP_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub timestamp: u64,
    /// Payload with the injected bytes removed
    pub payload: Bytes,
}

/// Extract embedded metadata, or `None` when the payload carries none.
///
/// Only payloads strictly longer than header + magic + timestamp are
/// inspected.
#[must_use]
pub fn extract(payload: &[u8]) -> Option<Extracted> {
    if payload.len() <= REST_START || payload[MAGIC_START..TIMESTAMP_START] != MAGIC {
        return None;
    }

    let timestamp = BigEndian::read_u64(&payload[TIMESTAMP_START..REST_START]);

    let mut rebuilt = BytesMut::with_capacity(payload.len() - INJECTED_LEN);
    rebuilt.put_slice(&payload[..HEADER_LEN]);
    rebuilt.put_slice(&payload[REST_START..]);

    Some(Extracted {
        timestamp,
        payload: rebuilt.freeze(),
    })
}

/// Data string of the room-wide `timestamp` signal
#[must_use]
pub fn timestamp_signal_data(rtp_timestamp: u32, extracted: u64) -> String {
    format!("{rtp_timestamp}:{extracted}")
}
