//! One-shot rendezvous between a waiting caller and a qualifying message
//!
//! ```text
//! notifier                      waiter (worker thread)
//!    │ claim: evaluate predicate      │ wait(): mark present, park
//!    │ hand_off: park until present ──┤
//!    │ put message, wake  ───────────►│ take message, return Some
//! ```
//!
//! An exchange resolves at most once. `stop()` wakes both sides; the waiter
//! then returns `None` unless a message was already handed over.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use logtap_types::{DeliveryStatus, Message};

use crate::{Consumer, ExchangeError, ProducerInfo};

/// Predicate an exchange evaluates on every notification
pub type Predicate = Box<dyn Fn(&Message, DeliveryStatus, &ProducerInfo) -> bool + Send + Sync>;

#[derive(Default)]
struct Slot {
    /// A waiter has entered `wait()`
    waiting: bool,
    /// A notifier claimed the exchange; set at most once
    resolved: bool,
    /// Terminal for both sides
    stopped: bool,
    /// Message in transit from notifier to waiter
    message: Option<Message>,
}

/// Single-use rendezvous guarded by a predicate
///
/// One waiter blocks in [`Exchange::wait`] until a notification satisfying
/// the predicate is handed over. As a [`Consumer`] it can be registered with
/// a producer directly; managers drive it through claim and handoff instead.
pub struct Exchange {
    predicate: Predicate,
    slot: Mutex<Slot>,
    /// Signalled on waiter arrival, handoff and stop
    ready: Condvar,
}

impl Exchange {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Message, DeliveryStatus, &ProducerInfo) -> bool + Send + Sync + 'static,
    {
        Self::from_predicate(Box::new(predicate))
    }

    pub fn from_predicate(predicate: Predicate) -> Self {
        Self {
            predicate,
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
        }
    }

    /// Block until a message is handed over, or until the exchange is stopped
    pub fn wait(&self) -> Option<Message> {
        let mut slot = self.slot.lock();
        slot.waiting = true;
        self.ready.notify_all();

        loop {
            if let Some(message) = slot.message.take() {
                slot.stopped = true;
                return Some(message);
            }
            if slot.stopped {
                return None;
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Evaluate the predicate and, on success, reserve this exchange for the handoff
    pub(crate) fn claim(
        &self,
        message: &Message,
        status: DeliveryStatus,
        producer: &ProducerInfo,
    ) -> Result<bool, ExchangeError> {
        let mut slot = self.slot.lock();
        if slot.resolved {
            return Err(ExchangeError::AlreadyResolved);
        }
        if slot.stopped {
            return Err(ExchangeError::Stopped { what: "exchange" });
        }
        if !(self.predicate)(message, status, producer) {
            return Ok(false);
        }
        slot.resolved = true;
        Ok(true)
    }

    /// Give a claimed message to the waiter, parking until one is present
    ///
    /// Returns false when the exchange was stopped before a waiter showed up.
    pub(crate) fn hand_off(&self, message: Message) -> bool {
        let mut slot = self.slot.lock();
        while !slot.waiting && !slot.stopped {
            self.ready.wait(&mut slot);
        }
        if slot.stopped {
            debug!(entry = %message.id(), "exchange stopped before handoff");
            return false;
        }
        debug!(entry = %message.id(), "exchange resolved");
        slot.message = Some(message);
        self.ready.notify_all();
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.lock().resolved
    }
}

impl Consumer for Exchange {
    fn is_stopped(&self) -> bool {
        let slot = self.slot.lock();
        slot.stopped || slot.resolved
    }

    fn stop(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.stopped {
            return false;
        }
        slot.stopped = true;
        self.ready.notify_all();
        true
    }

    /// Evaluates the predicate and, when it holds, blocks until the waiter takes the message
    fn message_received(
        &self,
        message: &Message,
        status: DeliveryStatus,
        producer: &ProducerInfo,
    ) -> Result<(), ExchangeError> {
        if self.claim(message, status, producer)? {
            self.hand_off(message.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Exchange")
            .field("waiting", &slot.waiting)
            .field("resolved", &slot.resolved)
            .field("stopped", &slot.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Producer;
    use logtap_types::MessageIds;
    use std::sync::Arc;
    use std::thread;

    fn message(ids: &MessageIds, line: &str) -> Message {
        Message::new(vec![line.to_string()], ids).unwrap()
    }

    #[test]
    fn test_handoff_reaches_waiter() {
        let exchange = Arc::new(Exchange::new(|m, _, _| m.lines()[0] == "yes"));
        let waiter = {
            let exchange = Arc::clone(&exchange);
            thread::spawn(move || exchange.wait())
        };

        let ids = MessageIds::new();
        let producer = Producer::new("test");
        exchange
            .message_received(&message(&ids, "no"), DeliveryStatus::Incoming, producer.info())
            .unwrap();
        assert!(!exchange.is_resolved());

        exchange
            .message_received(&message(&ids, "yes"), DeliveryStatus::Incoming, producer.info())
            .unwrap();

        let received = waiter.join().unwrap().unwrap();
        assert_eq!(received.lines()[0], "yes");
        assert!(exchange.is_stopped());
    }

    #[test]
    fn test_concurrent_notifications_resolve_once() {
        let exchange = Arc::new(Exchange::new(|_, _, _| true));
        let waiter = {
            let exchange = Arc::clone(&exchange);
            thread::spawn(move || exchange.wait())
        };

        let ids = MessageIds::new();
        let producer = Arc::new(Producer::new("test"));
        let notifiers: Vec<_> = (0..8)
            .map(|i| {
                let exchange = Arc::clone(&exchange);
                let producer = Arc::clone(&producer);
                let message = message(&ids, &format!("m{i}"));
                thread::spawn(move || {
                    exchange.message_received(&message, DeliveryStatus::Accepted, producer.info())
                })
            })
            .collect();

        let results: Vec<_> = notifiers.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == ExchangeError::AlreadyResolved)
        );
        assert!(waiter.join().unwrap().is_some());

        let late = exchange.message_received(
            &message(&ids, "late"),
            DeliveryStatus::Accepted,
            producer.info(),
        );
        assert_eq!(late, Err(ExchangeError::AlreadyResolved));
    }

    #[test]
    fn test_stop_releases_waiter_empty() {
        let exchange = Arc::new(Exchange::new(|_, _, _| false));
        let waiter = {
            let exchange = Arc::clone(&exchange);
            thread::spawn(move || exchange.wait())
        };

        assert!(exchange.stop());
        assert!(!exchange.stop());
        assert!(waiter.join().unwrap().is_none());

        let ids = MessageIds::new();
        let producer = Producer::new("test");
        assert_eq!(
            exchange.message_received(&message(&ids, "x"), DeliveryStatus::Incoming, producer.info()),
            Err(ExchangeError::Stopped { what: "exchange" })
        );
    }

    #[test]
    fn test_stop_before_waiter_releases_notifier() {
        let exchange = Arc::new(Exchange::new(|_, _, _| true));
        let ids = MessageIds::new();
        let producer = Arc::new(Producer::new("test"));

        let notifier = {
            let exchange = Arc::clone(&exchange);
            let producer = Arc::clone(&producer);
            let message = message(&ids, "x");
            thread::spawn(move || {
                exchange.message_received(&message, DeliveryStatus::Accepted, producer.info())
            })
        };

        // The notifier parks until a waiter appears; stopping must release it
        while !exchange.is_resolved() {
            thread::yield_now();
        }
        exchange.stop();
        assert!(notifier.join().unwrap().is_ok());
        assert!(exchange.wait().is_none());
    }
}
