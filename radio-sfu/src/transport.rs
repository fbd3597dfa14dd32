//! Outbound half of a participant's transport
//!
//! The socket itself is owned by the connection task. Everything else (room
//! notifications, ICE callbacks, relay timestamps) pushes onto this bounded
//! queue, so writes to one socket are serialized by its single writer task.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SfuError};
use crate::signal::{ServerSignal, Signal};

#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<Signal>,
}

impl SignalSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Signal>) -> Self {
        Self { tx }
    }

    /// Create a sender together with the receiving end drained by the writer task
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queue a signal without waiting. A slow client loses the message rather
    /// than stalling the room.
    pub fn send(&self, signal: &ServerSignal) -> Result<()> {
        let envelope = signal.to_signal()?;
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(signal = signal.name(), "Signal queue full, dropping message");
                SfuError::Transport("signal queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                debug!(signal = signal.name(), "Signal queue closed");
                SfuError::Transport("signal queue closed".to_string())
            }
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    #[tokio::test]
    async fn delivers_encoded_envelope() {
        let (sender, mut rx) = SignalSender::channel(4);
        sender
            .send(&ServerSignal::ListenerConnected(ParticipantId::from("B")))
            .unwrap();
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.kind, "listener-connected");
        assert_eq!(signal.data, serde_json::json!("B"));
    }

    #[tokio::test]
    async fn full_and_closed_queues_report_transport_errors() {
        let (sender, rx) = SignalSender::channel(1);
        sender.send(&ServerSignal::ParticipantCount(1)).unwrap();
        assert!(matches!(
            sender.send(&ServerSignal::ParticipantCount(2)),
            Err(SfuError::Transport(_))
        ));
        drop(rx);
        assert!(sender.is_closed());
        assert!(sender.send(&ServerSignal::ParticipantCount(3)).is_err());
    }
}
