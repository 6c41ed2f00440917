use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::state::WorkflowStep;
use crate::perception::location::Location;
use crate::perception::types::Point;

/// Structured progress reported by the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started,
    CycleStarted {
        cycle: u64,
    },
    Step {
        cycle: u64,
        step: WorkflowStep,
    },
    LocationResolved {
        location: Option<Location>,
        confidence: f32,
    },
    Click {
        target: String,
        at: Point,
    },
    PathExecuted {
        mode: crate::planner::PathMode,
        points: usize,
        completed: bool,
    },
    PlantingAttempt {
        attempt: u32,
        coverage_before: f32,
        coverage_after: f32,
    },
    MarketVisit {
        collected: u32,
        slots_filled: u32,
        wheat_sold: bool,
    },
    Warning {
        message: String,
    },
    Stopped {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Fan-out of engine events to any number of subscribers. Emitting with no
/// subscriber is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    session_id: Uuid,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let envelope = EventEnvelope {
            session_id: self.session_id,
            timestamp: Utc::now(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!("engine event dropped: no subscribers");
        }
    }
}

/// Forwards every event as JSON at debug level until the bus closes.
pub async fn log_events(mut rx: broadcast::Receiver<EventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => tracing::debug!(target: "haybot::events", "{json}"),
                Err(e) => tracing::warn!(error = %e, "event serialization failed"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_stamped_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::Step {
            cycle: 3,
            step: WorkflowStep::EnsureMainPage,
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.session_id, bus.session_id());
        assert_eq!(
            got.event,
            EngineEvent::Step {
                cycle: 3,
                step: WorkflowStep::EnsureMainPage
            }
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let envelope = EventEnvelope {
            session_id: Uuid::nil(),
            timestamp: Utc::now(),
            event: EngineEvent::MarketVisit {
                collected: 2,
                slots_filled: 1,
                wheat_sold: true,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "market_visit");
        assert_eq!(json["slots_filled"], 1);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        EventBus::default().emit(EngineEvent::Started);
    }
}
