//! Broadcast fan-out to downstream consumers.
//!
//! Every inbound event is forwarded to the broadcast channel after its
//! handler runs, and mutating handlers additionally publish the full
//! race-control snapshot. The snapshot masquerades as a transport event
//! with code [`STATUS_EVENT_CODE`] so the fan-out can treat all messages
//! uniformly.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::events::Event;
use crate::race_control::RaceControlSnapshot;

/// Event code under which the race-control snapshot is broadcast.
pub const STATUS_EVENT_CODE: u8 = 200;

/// A message published to downstream consumers.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// Full race-control snapshot, sent after a state change.
    Status(Box<RaceControlSnapshot>),
    /// An inbound event forwarded verbatim.
    Event(Event),
}

impl BroadcastMessage {
    /// Event code for consumers that route on numeric ids.
    pub fn event_code(&self) -> Option<u8> {
        match self {
            BroadcastMessage::Status(_) => Some(STATUS_EVENT_CODE),
            BroadcastMessage::Event(_) => None,
        }
    }
}

/// Errors publishing to the broadcast channel.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast channel closed")]
    Closed,
}

/// Sink for messages to downstream consumers.
pub trait Broadcaster: Send + Sync {
    fn send(&self, message: BroadcastMessage) -> Result<(), BroadcastError>;
}

/// Broadcaster backed by a [`tokio::sync::broadcast`] channel.
///
/// Sending when no receiver is subscribed is not an error; the message is
/// simply dropped, matching fan-out semantics where consumers come and go.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes a new consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn send(&self, message: BroadcastMessage) -> Result<(), BroadcastError> {
        // No subscribers is OK
        let _ = self.tx.send(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CarId, Event};

    #[test]
    fn send_without_subscribers_is_ok() {
        let broadcaster = ChannelBroadcaster::new(16);
        let message = BroadcastMessage::Event(Event::ClientLoaded(CarId(3)));
        assert!(broadcaster.send(message).is_ok());
    }

    #[tokio::test]
    async fn subscriber_receives_forwarded_event() {
        let broadcaster = ChannelBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();

        broadcaster
            .send(BroadcastMessage::Event(Event::ClientLoaded(CarId(7))))
            .unwrap();

        match rx.recv().await.unwrap() {
            BroadcastMessage::Event(Event::ClientLoaded(car_id)) => assert_eq!(car_id, CarId(7)),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn status_carries_event_code_200() {
        let snapshot = RaceControlSnapshot::default();
        let message = BroadcastMessage::Status(Box::new(snapshot));
        assert_eq!(message.event_code(), Some(STATUS_EVENT_CODE));
    }
}
