//! Topic fan-out
//!
//! Bridges the service's `EventSink` to live connections. Each topic owns a
//! bounded broadcast channel; a slow subscriber loses old events instead of
//! holding up the publisher. A topic lives exactly as long as its last
//! `Subscription`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::trace;

use focusroom_core::{EventSink, SessionEvent, Topic};

/// Events buffered per topic before slow receivers start lagging
pub const TOPIC_CAPACITY: usize = 64;

/// Registry of topic channels
#[derive(Debug, Default)]
pub struct Hub {
    topics: RwLock<HashMap<Topic, broadcast::Sender<SessionEvent>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published to `topic` from now on
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> Subscription {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let rx = topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        Subscription {
            topic,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Drop `topic` if the caller holds its last receiver
    fn release(&self, topic: Topic) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        // Receivers are only created under this lock, so the count cannot grow here
        if topics.get(&topic).is_some_and(|tx| tx.receiver_count() <= 1) {
            topics.remove(&topic);
            trace!(%topic, "Topic dropped");
        }
    }

    /// Current number of receivers on `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics with a live channel
    pub fn topic_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A live receiver on one topic; dropping it releases the topic
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<SessionEvent>,
    hub: Arc<Hub>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub async fn recv(&mut self) -> Result<SessionEvent, RecvError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<SessionEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(self.topic);
    }
}

impl EventSink for Hub {
    fn publish(&self, topic: Topic, event: SessionEvent) {
        let delivered = {
            let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(&topic) {
                Some(tx) => tx.send(event).ok(),
                None => return,
            }
        };

        match delivered {
            Some(receivers) => trace!(%topic, receivers, "Event published"),
            None => {
                // Every receiver is gone
                let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
                if topics.get(&topic).is_some_and(|tx| tx.receiver_count() == 0) {
                    topics.remove(&topic);
                    trace!(%topic, "Topic dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use focusroom_core::SessionEventKind;
    use uuid::Uuid;

    fn event(session_id: Uuid, enabled: bool) -> SessionEvent {
        SessionEvent::new(session_id, Utc::now(), SessionEventKind::ChatToggled { enabled })
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let hub = Arc::new(Hub::new());
        let id = Uuid::new_v4();
        let mut session_rx = hub.subscribe(Topic::Session(id));
        let mut chat_rx = hub.subscribe(Topic::Chat(id));

        hub.publish(Topic::Session(id), event(id, false));

        let got = session_rx.recv().await.unwrap();
        assert_eq!(got.kind, SessionEventKind::ChatToggled { enabled: false });
        assert!(chat_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = Hub::new();
        let id = Uuid::new_v4();
        hub.publish(Topic::Session(id), event(id, true));
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_dropped_subscription_releases_topic() {
        let hub = Arc::new(Hub::new());
        let id = Uuid::new_v4();
        let rx = hub.subscribe(Topic::Chat(id));
        assert_eq!(hub.subscriber_count(Topic::Chat(id)), 1);
        assert_eq!(rx.topic(), Topic::Chat(id));

        drop(rx);
        assert_eq!(hub.topic_count(), 0);
        hub.publish(Topic::Chat(id), event(id, true));
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_unpublished_topics_do_not_accumulate() {
        let hub = Arc::new(Hub::new());
        for _ in 0..1000 {
            drop(hub.subscribe(Topic::Session(Uuid::new_v4())));
        }
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_topic_kept_while_another_subscriber_remains() {
        let hub = Arc::new(Hub::new());
        let topic = Topic::Session(Uuid::new_v4());
        let first = hub.subscribe(topic);
        let second = hub.subscribe(topic);

        drop(first);
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(hub.subscriber_count(topic), 1);
        drop(second);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let hub = Arc::new(Hub::new());
        let id = Uuid::new_v4();
        let mut rx = hub.subscribe(Topic::Session(id));

        for i in 0..(TOPIC_CAPACITY + 3) {
            hub.publish(Topic::Session(id), event(id, i % 2 == 0));
        }

        assert!(matches!(
            rx.recv().await,
            Err(RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
