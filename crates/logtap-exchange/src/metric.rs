use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use logtap_types::{DeliveryStatus, Message};

use crate::{Consumer, ExchangeError, ProducerInfo};

/// Named numeric aggregate over a message stream
///
/// Reads never take a lock and may run concurrently with fan-out.
pub trait Metric: Consumer {
    fn value(&self) -> i64;
}

type UpdateFn = dyn Fn(i64, &Message, DeliveryStatus) -> i64 + Send + Sync;

/// Metric whose value is derived from (previous value, message, status)
pub struct AtomicMetric {
    name: String,
    value: AtomicI64,
    stopped: AtomicBool,
    update: Box<UpdateFn>,
}

impl AtomicMetric {
    pub fn new<F>(name: impl Into<String>, initial: i64, update: F) -> Self
    where
        F: Fn(i64, &Message, DeliveryStatus) -> i64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            value: AtomicI64::new(initial),
            stopped: AtomicBool::new(false),
            update: Box::new(update),
        }
    }

    /// Running count of notifications matching `predicate`
    pub fn counter<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&Message, DeliveryStatus) -> bool + Send + Sync + 'static,
    {
        Self::new(name, 0, move |count, message, status| {
            if predicate(message, status) {
                count.saturating_add(1)
            } else {
                count
            }
        })
    }

    /// Reset the value, e.g. between test phases
    pub fn reset(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl Metric for AtomicMetric {
    fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Consumer for AtomicMetric {
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
            return Err(ExchangeError::Stopped { what: "metric" });
        }
        // The closure may run more than once under contention; updates are pure
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some((self.update)(prev, message, status))
            });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for AtomicMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicMetric")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Producer;
    use logtap_types::MessageIds;
    use std::sync::Arc;

    #[test]
    fn test_counter_counts_matching_statuses() {
        let producer = Producer::new("test");
        let accepted = Arc::new(AtomicMetric::counter("accepted", |_, status| {
            status == DeliveryStatus::Accepted
        }));
        producer.register(accepted.clone());

        let ids = MessageIds::new();
        for _ in 0..3 {
            let incoming = Message::new(vec!["x".to_string()], &ids).unwrap();
            producer.notify(&incoming, DeliveryStatus::Incoming);
            let done = incoming.finalize(DeliveryStatus::Accepted, &ids).unwrap();
            producer.notify(&done, DeliveryStatus::Accepted);
        }

        assert_eq!(accepted.value(), 3);
        assert_eq!(Consumer::name(&*accepted), "accepted");
    }

    #[test]
    fn test_custom_update_uses_previous_value() {
        let lines = AtomicMetric::new("lines", 10, |prev, message, _| {
            prev + message.lines().len() as i64
        });
        let ids = MessageIds::new();
        let message = Message::new(vec!["a".into(), "b".into()], &ids).unwrap();
        let producer = Producer::new("test");

        lines
            .message_received(&message, DeliveryStatus::Incoming, producer.info())
            .unwrap();
        assert_eq!(lines.value(), 12);

        lines.reset(0);
        assert_eq!(lines.value(), 0);
    }

    #[test]
    fn test_stopped_metric_rejects_notifications() {
        let metric = AtomicMetric::counter("all", |_, _| true);
        assert!(metric.stop());
        assert!(!metric.stop());

        let ids = MessageIds::new();
        let message = Message::new(vec!["a".into()], &ids).unwrap();
        let producer = Producer::new("test");
        assert!(
            metric
                .message_received(&message, DeliveryStatus::Accepted, producer.info())
                .is_err()
        );
        assert_eq!(metric.value(), 0);
    }
}
