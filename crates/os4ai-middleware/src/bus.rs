//! Topic-partitioned broadcast bus for system events.
//!
//! Every [`Event`] is routed to exactly one [`Topic`] lane, chosen from its
//! payload, so a component interested in entity lifecycle never wakes up for
//! circuit transitions.
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Health`] | Circuit transitions and sensor faults |
//! | [`Topic::Entities`] | Entity spawn / terminate / revoke |
//! | [`Topic::Control`] | Operating-mode changes |
//!
//! Publishing never blocks: a subscriber that falls behind loses the oldest
//! events and observes `Lagged`.

use os4ai_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (buffered events before slow subscribers lag).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Health,
    Entities,
    Control,
}

impl Topic {
    /// The lane an event payload belongs to.
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::CircuitTransition { .. } | EventPayload::SensorFault { .. } => {
                Topic::Health
            }
            EventPayload::EntityLifecycle { .. } => Topic::Entities,
            EventPayload::ModeChanged { .. } => Topic::Control,
        }
    }
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    health: broadcast::Sender<Event>,
    entities: broadcast::Sender<Event>,
    control: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (health, _) = broadcast::channel(capacity);
        let (entities, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity);
        Self {
            all,
            health,
            entities,
            control,
        }
    }

    /// Publish `event` on its topic lane and on the firehose.
    ///
    /// Returns the number of receivers handed the event.  Zero listeners is a
    /// normal condition, not an error.
    pub fn publish(&self, event: Event) -> usize {
        let topic = Topic::of(&event.payload);
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_all = self.all.send(event).unwrap_or(0);
        trace!(?topic, receivers = on_topic + on_all, "event published");
        on_topic + on_all
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Receive every event regardless of topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.all.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Health => &self.health,
            Topic::Entities => &self.entities,
            Topic::Control => &self.control,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to one lane, or to the firehose.
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event, skipping over any lag.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use os4ai_types::{CircuitState, EntityId, LifecycleState};
    use std::time::Duration;

    fn circuit_event() -> Event {
        Event::new(
            "os4ai-hal::circuit",
            EventPayload::CircuitTransition {
                sensor: "wifi".into(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            },
        )
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(circuit_event()), 0);
    }

    #[tokio::test]
    async fn event_reaches_its_topic_and_the_firehose() {
        let bus = EventBus::default();
        let mut health = bus.subscribe_to(Topic::Health);
        let mut all = bus.subscribe_all();

        let event = circuit_event();
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(health.recv().await.unwrap().id, event.id);
        assert_eq!(all.recv().await.unwrap().id, event.id);
    }

    #[tokio::test]
    async fn other_topics_stay_quiet() {
        let bus = EventBus::default();
        let mut entities = bus.subscribe_to(Topic::Entities);
        bus.publish(circuit_event());

        let result = tokio::time::timeout(Duration::from_millis(50), entities.recv()).await;
        assert!(result.is_err(), "entities lane must not see health traffic");
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Entities);
        let id = EntityId::new();
        for _ in 0..20 {
            bus.publish(Event::new(
                "test",
                EventPayload::EntityLifecycle {
                    entity: id,
                    name: "mapper".into(),
                    state: LifecycleState::Running,
                },
            ));
        }
        // Still yields an event rather than an error.
        assert!(slow.recv().await.is_some());
    }

    #[test]
    fn mode_changes_route_to_control() {
        assert_eq!(
            Topic::of(&EventPayload::ModeChanged { simulated: true }),
            Topic::Control
        );
    }
}
