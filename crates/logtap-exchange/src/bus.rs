use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use logtap_types::{DeliveryStatus, Message};

use crate::ExchangeError;

static NEXT_PRODUCER_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a producer, passed along with every notification
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProducerInfo {
    pub id: u64,
    pub name: Arc<str>,
}

impl fmt::Display for ProducerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Recipient of message events
///
/// `message_received` must fail with [`ExchangeError::Stopped`] once the
/// consumer has been stopped. Producers skip stopped consumers.
pub trait Consumer: Send + Sync {
    fn is_stopped(&self) -> bool;

    /// Stop receiving events; true only for the call that performed the transition
    fn stop(&self) -> bool;

    fn message_received(
        &self,
        message: &Message,
        status: DeliveryStatus,
        producer: &ProducerInfo,
    ) -> Result<(), ExchangeError>;

    /// Human-readable name (for logs)
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handle returned by [`Producer::register`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

/// Source of message events with a mutable set of consumers
///
/// Registration and fan-out share one lock: a consumer registered while a
/// fan-out is running waits for it and does not see that event.
pub struct Producer {
    info: ProducerInfo,
    consumers: Mutex<Vec<(ConsumerId, Arc<dyn Consumer>)>>,
    next_consumer: AtomicU64,
}

impl Producer {
    pub fn new(name: &str) -> Self {
        Self {
            info: ProducerInfo {
                id: NEXT_PRODUCER_ID.fetch_add(1, Ordering::Relaxed),
                name: Arc::from(name),
            },
            consumers: Mutex::new(Vec::new()),
            next_consumer: AtomicU64::new(0),
        }
    }

    pub fn info(&self) -> &ProducerInfo {
        &self.info
    }

    /// Register a consumer; the same consumer may be registered more than once
    pub fn register(&self, consumer: Arc<dyn Consumer>) -> ConsumerId {
        let id = ConsumerId(self.next_consumer.fetch_add(1, Ordering::Relaxed));
        debug!(producer = %self.info, consumer = consumer.name(), "consumer registered");
        self.consumers.lock().push((id, consumer));
        id
    }

    /// Remove a registration, returning the consumer it referred to
    pub fn unregister(&self, id: ConsumerId) -> Option<Arc<dyn Consumer>> {
        let mut consumers = self.consumers.lock();
        let index = consumers.iter().position(|(cid, _)| *cid == id)?;
        Some(consumers.remove(index).1)
    }

    /// Number of registered, non-stopped consumers
    pub fn consumer_count(&self) -> usize {
        self.consumers
            .lock()
            .iter()
            .filter(|(_, c)| !c.is_stopped())
            .count()
    }

    /// Deliver one message transition to every live consumer, in registration order
    ///
    /// Returns how many consumers accepted the event. Stopped consumers are
    /// dropped from the set.
    pub fn notify(&self, message: &Message, status: DeliveryStatus) -> usize {
        let mut consumers = self.consumers.lock();
        consumers.retain(|(_, c)| !c.is_stopped());

        let mut delivered = 0;
        for (_, consumer) in consumers.iter() {
            match consumer.message_received(message, status, &self.info) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    producer = %self.info,
                    consumer = consumer.name(),
                    entry = %message.id(),
                    error = e.as_label(),
                    "consumer rejected notification"
                ),
            }
        }
        delivered
    }

    /// Stop and drop every registered consumer
    pub fn stop_all(&self) {
        for (_, consumer) in self.consumers.lock().drain(..) {
            consumer.stop();
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("info", &self.info)
            .field("consumers", &self.consumers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtap_types::MessageIds;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, DeliveryStatus)>>,
        stopped: AtomicBool,
    }

    impl Consumer for Recorder {
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn stop(&self) -> bool {
            !self.stopped.swap(true, Ordering::SeqCst)
        }

        fn message_received(
            &self,
            message: &Message,
            status: DeliveryStatus,
            _producer: &ProducerInfo,
        ) -> Result<(), ExchangeError> {
            if self.is_stopped() {
                return Err(ExchangeError::Stopped { what: "recorder" });
            }
            self.seen.lock().push((message.id().0, status));
            Ok(())
        }
    }

    fn message(ids: &MessageIds) -> Message {
        Message::new(vec!["line".to_string()], ids).unwrap()
    }

    #[test]
    fn test_notify_reaches_every_registration() {
        let producer = Producer::new("test");
        let recorder = Arc::new(Recorder::default());
        producer.register(recorder.clone());
        producer.register(recorder.clone());

        let ids = MessageIds::new();
        assert_eq!(producer.notify(&message(&ids), DeliveryStatus::Incoming), 2);
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let producer = Producer::new("test");
        let recorder = Arc::new(Recorder::default());
        let id = producer.register(recorder.clone());

        assert!(producer.unregister(id).is_some());
        assert!(producer.unregister(id).is_none());

        let ids = MessageIds::new();
        assert_eq!(producer.notify(&message(&ids), DeliveryStatus::Accepted), 0);
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_stopped_consumers_are_skipped_and_pruned() {
        let producer = Producer::new("test");
        let live = Arc::new(Recorder::default());
        let stopped = Arc::new(Recorder::default());
        producer.register(live.clone());
        producer.register(stopped.clone());

        assert!(stopped.stop());
        assert!(!stopped.stop());
        assert_eq!(producer.consumer_count(), 1);

        let ids = MessageIds::new();
        producer.notify(&message(&ids), DeliveryStatus::Incoming);
        assert_eq!(live.seen.lock().len(), 1);
        assert!(stopped.seen.lock().is_empty());
    }

    #[test]
    fn test_stopped_consumer_rejects_direct_calls() {
        let recorder = Recorder::default();
        recorder.stop();
        let ids = MessageIds::new();
        let producer = Producer::new("direct");
        assert_eq!(
            recorder.message_received(&message(&ids), DeliveryStatus::Incoming, producer.info()),
            Err(ExchangeError::Stopped { what: "recorder" })
        );
    }

    #[test]
    fn test_stop_all_stops_consumers() {
        let producer = Producer::new("test");
        let recorder = Arc::new(Recorder::default());
        producer.register(recorder.clone());
        producer.stop_all();
        assert!(recorder.is_stopped());
        assert_eq!(producer.consumer_count(), 0);
    }
}
