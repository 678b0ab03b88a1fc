//! Progress events for observers of a bot run
//!
//! The event bus uses `tokio::sync::broadcast`, so any number of observers
//! (a dashboard, a JSON log tail) can follow a run. Emitting never blocks:
//! with no subscribers the event is dropped, and a lagging subscriber misses
//! the oldest events instead of slowing the run down.
//!
//! # Example
//!
//! ```
//! use libautopost::events::{Event, EventBus};
//! use libautopost::types::CyclePhase;
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::PhaseChanged { phase: CyclePhase::Acquiring });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{CyclePhase, LogEntry, PublishRecord, RunStatus};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is how many events a subscriber may fall behind by
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PhaseChanged {
        phase: CyclePhase,
    },

    /// An activity log entry was appended
    Log {
        entry: LogEntry,
    },

    /// One tick of the between-cycle wait
    Countdown {
        remaining: u64,
        total: u64,
    },

    RecordCreated {
        record: PublishRecord,
    },

    /// The run loop exited
    RunFinished {
        status: RunStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;

    #[tokio::test]
    async fn test_multiple_subscribers_see_each_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(Event::Countdown {
            remaining: 4,
            total: 9,
        });

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                Event::Countdown { remaining, total } => {
                    assert_eq!(remaining, 4);
                    assert_eq!(total, 9);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        bus.emit(Event::PhaseChanged {
            phase: CyclePhase::Waiting,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();
        for remaining in 0..5 {
            bus.emit(Event::Countdown {
                remaining,
                total: 5,
            });
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::Countdown { remaining: 3, .. }
        ));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::Log {
            entry: LogEntry::new(LogLevel::Warning, "Waiting 7 seconds"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"log""#));
        assert!(json.contains(r#""level":"warning""#));

        let finished = serde_json::to_string(&Event::RunFinished {
            status: RunStatus::Stopped,
        })
        .unwrap();
        assert_eq!(finished, r#"{"type":"run_finished","status":"stopped"}"#);

        match serde_json::from_str::<Event>(&json).unwrap() {
            Event::Log { entry } => assert_eq!(entry.message, "Waiting 7 seconds"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
