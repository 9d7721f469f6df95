//! Events emitted by the background loops.
//!
//! The request loop and the insert loop broadcast what they decided through an
//! [`EventBus`]; the transport layer subscribes to turn requests into wire messages and
//! penalties into peer scores, later stages subscribe to learn about new headers and
//! unwinds. Late subscribers do not receive past events.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{HeaderRequest, PenaltyItem};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEvent {
    /// A range of headers should be requested from peers.
    Request(HeaderRequest),

    /// A peer misbehaved.
    Penalize(PenaltyItem),

    /// A flush wrote headers to storage.
    HeadersInserted {
        inserted: usize,
        highest_in_db: u64,
    },

    /// A heavier chain replaced stored canonical history above `unwind_point`.
    Unwind {
        unwind_point: u64,
    },
}

impl HeaderEvent {
    pub fn description(&self) -> String {
        match self {
            HeaderEvent::Request(request) => format!("Request({})", request),
            HeaderEvent::Penalize(item) => format!("Penalize({})", item.penalty),
            HeaderEvent::HeadersInserted {
                inserted,
                highest_in_db,
            } => format!("HeadersInserted(inserted={}, highest_in_db={})", inserted, highest_in_db),
            HeaderEvent::Unwind {
                unwind_point,
            } => format!("Unwind(unwind_point={})", unwind_point),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("receiver lagged behind by {0} events")]
    Lagged(u64),

    #[error("event bus closed")]
    Closed,
}

/// Broadcast channel shared by emitters and subscribers.
#[derive(Debug, Clone)]
pub struct EventBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// `capacity` events are buffered before slow receivers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
        }
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Send to all current subscribers. Having none is not an error.
    pub fn emit(&self, event: T) {
        let _ = self.sender.send(event);
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[derive(Debug)]
pub struct EventReceiver<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> EventReceiver<T> {
    pub async fn recv(&mut self) -> Result<T, EventError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => EventError::Lagged(n),
            broadcast::error::RecvError::Closed => EventError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Penalty;

    #[test]
    fn test_event_description() {
        let event = HeaderEvent::HeadersInserted {
            inserted: 12,
            highest_in_db: 200,
        };
        assert!(event.description().contains("HeadersInserted"));
        assert!(event.description().contains("200"));

        let event = HeaderEvent::Penalize(PenaltyItem {
            peer: [0u8; 64],
            penalty: Penalty::AbandonedAnchor,
        });
        assert_eq!(event.description(), "Penalize(anchor ancestors never delivered)");
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(HeaderEvent::Unwind {
            unwind_point: 7,
        });

        let expected = HeaderEvent::Unwind {
            unwind_point: 7,
        };
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_lagging_receiver() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for unwind_point in 0..4 {
            bus.emit(HeaderEvent::Unwind {
                unwind_point,
            });
        }
        assert_eq!(rx.recv().await, Err(EventError::Lagged(2)));
    }

    #[test]
    fn test_emit_without_receivers() {
        let bus: EventBus<HeaderEvent> = EventBus::default();
        bus.emit(HeaderEvent::Unwind {
            unwind_point: 0,
        });
    }
}
