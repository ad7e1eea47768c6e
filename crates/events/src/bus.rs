//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Every event is addressed to a named group (`user-<id>` for owners,
//! `staff` for alerts). Transports subscribe once and forward each
//! [`GroupEvent`] to the connections belonging to its group; tests use
//! [`EventBus::subscribe_group`] to see a single group.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::event::SessionEvent;

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification transport unavailable: {0}")]
    Unavailable(String),
}

/// Delivery seam for session notifications.
///
/// Implementations must not block: publishing happens inside the render
/// loop.
pub trait Notifier: Send + Sync {
    fn publish(&self, group: &str, event: SessionEvent) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// An event together with the group it is addressed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupEvent {
    pub group: String,
    pub event: SessionEvent,
}

/// In-process fan-out event bus.
///
/// Designed to be shared via `Arc<EventBus>`.
pub struct EventBus {
    sender: broadcast::Sender<GroupEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events of every group.
    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of one group.
    pub fn subscribe_group(&self, group: impl Into<String>) -> GroupReceiver {
        GroupReceiver {
            group: group.into(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for EventBus {
    fn publish(&self, group: &str, event: SessionEvent) -> Result<(), NotifyError> {
        // A send error only means nobody is listening right now.
        if self
            .sender
            .send(GroupEvent {
                group: group.to_string(),
                event,
            })
            .is_err()
        {
            tracing::trace!(group, "No subscribers; event dropped");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GroupReceiver
// ---------------------------------------------------------------------------

/// Receiver filtered to a single group.
pub struct GroupReceiver {
    group: String,
    receiver: broadcast::Receiver<GroupEvent>,
}

impl GroupReceiver {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Next event for this group, or `None` once the bus is dropped.
    /// Lagged gaps are logged and skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.group == self.group => return Some(message.event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(group = %self.group, skipped, "Group receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything already buffered for this group without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(message) if message.group == self.group => events.push(message.event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return events,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
