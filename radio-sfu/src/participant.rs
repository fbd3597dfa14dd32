//! A connected client and the role it currently holds

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::listener::Listener;
use crate::signal::ServerSignal;
use crate::speaker::Speaker;
use crate::transport::SignalSender;
use crate::types::{Endpoint, ParticipantId};

/// One WebSocket connection inside a room. The room owns every participant.
#[derive(Debug)]
pub struct Participant {
    id: ParticipantId,
    endpoint: Endpoint,
    sender: SignalSender,
}

impl Participant {
    pub(crate) fn new(id: ParticipantId, endpoint: Endpoint, sender: SignalSender) -> Self {
        Self {
            id,
            endpoint,
            sender,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.id
    }

    #[must_use]
    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    #[must_use]
    pub const fn sender(&self) -> &SignalSender {
        &self.sender
    }

    /// Queue a signal for this participant
    pub fn send(&self, signal: &ServerSignal) -> Result<()> {
        self.sender.send(signal)
    }

    /// Queue a notification; failures are logged, never propagated
    pub(crate) fn notify(&self, signal: &ServerSignal) {
        if let Err(e) = self.sender.send(signal) {
            debug!(
                participant_id = %self.id,
                signal = signal.name(),
                error = %e,
                "Dropped notification"
            );
        }
    }
}

/// Role currently held by a participant. At most one at a time.
#[derive(Clone, Default)]
pub enum Role {
    #[default]
    None,
    Speaker(Arc<Speaker>),
    Listener(Arc<Listener>),
}

impl Role {
    #[must_use]
    pub const fn kind(&self) -> RoleKind {
        match self {
            Self::None => RoleKind::None,
            Self::Speaker(_) => RoleKind::Speaker,
            Self::Listener(_) => RoleKind::Listener,
        }
    }
}

/// Role tag without the role state, for inspection and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    None,
    Speaker,
    Listener,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Speaker => f.write_str("speaker"),
            Self::Listener => f.write_str("listener"),
        }
    }
}
