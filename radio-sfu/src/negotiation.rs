//! Offer/answer helpers shared by the speaker and listener state machines

use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Result, SignalingError};
use crate::peer::PeerConnection;

/// Holds remote ICE candidates until a remote description exists.
///
/// Candidates may reach the server before the offer/answer they belong to;
/// applying them early fails, so they wait here and are flushed right after
/// the remote description is set.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    inner: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    remote_set: bool,
    pending: Vec<RTCIceCandidateInit>,
}

impl CandidateBuffer {
    /// Start with candidates that arrived before the role existed
    #[must_use]
    pub fn with_pending(pending: Vec<RTCIceCandidateInit>) -> Self {
        Self {
            inner: Mutex::new(BufferState {
                remote_set: false,
                pending,
            }),
        }
    }

    /// Returns the candidate back when it can be applied right away,
    /// otherwise keeps it.
    pub fn admit(&self, candidate: RTCIceCandidateInit) -> Option<RTCIceCandidateInit> {
        let mut state = self.inner.lock();
        if state.remote_set {
            Some(candidate)
        } else {
            state.pending.push(candidate);
            None
        }
    }

    /// Record that a remote description is now set and take everything held
    pub fn mark_remote_set(&self) -> Vec<RTCIceCandidateInit> {
        let mut state = self.inner.lock();
        state.remote_set = true;
        std::mem::take(&mut state.pending)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[must_use]
    pub fn is_remote_set(&self) -> bool {
        self.inner.lock().remote_set
    }
}

/// Apply a trickled candidate now, or buffer it until the remote description lands
pub async fn apply_candidate(
    pc: &dyn PeerConnection,
    buffer: &CandidateBuffer,
    candidate: RTCIceCandidateInit,
) -> Result<()> {
    match buffer.admit(candidate) {
        Some(candidate) => pc.add_ice_candidate(candidate).await,
        None => {
            debug!(pending = buffer.pending_len(), "Buffered ICE candidate until remote description is set");
            Ok(())
        }
    }
}

/// Set the remote description, then flush every buffered candidate
pub async fn set_remote_and_flush(
    pc: &dyn PeerConnection,
    buffer: &CandidateBuffer,
    desc: RTCSessionDescription,
) -> Result<()> {
    pc.set_remote_description(desc).await?;
    for candidate in buffer.mark_remote_set() {
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            warn!(error = %e, "Failed to apply buffered ICE candidate");
        }
    }
    Ok(())
}

/// Wait (bounded) for ICE gathering, then read back the local description.
///
/// On timeout the description gathered so far is used; later candidates
/// still reach the client through the ICE callback.
pub async fn gathered_local_description(
    pc: &dyn PeerConnection,
    timeout: Duration,
) -> Result<RTCSessionDescription> {
    if tokio::time::timeout(timeout, pc.gathering_complete())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = timeout.as_secs(),
            "ICE gathering did not complete in time, sending partial description"
        );
    }

    pc.local_description().await.ok_or_else(|| {
        SignalingError::Negotiation("local description unavailable after ICE gathering".to_string())
            .into()
    })
}
