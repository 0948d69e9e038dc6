//! Exchange managers
//!
//! A manager owns every pending [`Exchange`] for one producer and one
//! condition flavor. Conditions are evaluated and exchanges claimed under the
//! manager lock; the blocking handoff runs after the lock is released, so a
//! slow waiter only holds up the notifying call, not `set_expectation` or
//! `stop` on the same manager.
//!
//! The producer calling `message_received` still waits for that handoff, so
//! its fan-out pauses until the claimed waiter is parked.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use logtap_types::{DeliveryStatus, Message};

use crate::{
    Consumer, Exchange, ExchangeError, MessageCondition, Metric, MetricCondition, Predicate,
    ProducerInfo, WorkerPool,
};

/// Turns a condition of one flavor into an exchange predicate
pub trait Evaluator: Send + Sync + 'static {
    type Condition: Send + Sync + 'static;

    fn bind(&self, condition: Self::Condition) -> Predicate;
}

/// Evaluates a shared metric's current value on every notification
///
/// Register the metric with the producer before the manager so it has seen
/// the message by the time the manager evaluates.
pub struct MetricEvaluator {
    metric: Arc<dyn Metric>,
}

impl MetricEvaluator {
    pub fn new(metric: Arc<dyn Metric>) -> Self {
        Self { metric }
    }
}

impl Evaluator for MetricEvaluator {
    type Condition = MetricCondition;

    fn bind(&self, condition: MetricCondition) -> Predicate {
        let metric = Arc::clone(&self.metric);
        Box::new(move |_: &Message, _: DeliveryStatus, _: &ProducerInfo| {
            condition.is_satisfied(metric.value())
        })
    }
}

/// Evaluates the raw notification, including in-flight `Incoming` ones
pub struct MessageEvaluator;

impl Evaluator for MessageEvaluator {
    type Condition = MessageCondition;

    fn bind(&self, condition: MessageCondition) -> Predicate {
        Box::new(
            move |message: &Message, status: DeliveryStatus, producer: &ProducerInfo| {
                condition.is_satisfied(message, status, producer)
            },
        )
    }
}

pub type MetricExchangeManager = ExchangeManager<MetricEvaluator>;
pub type MessageExchangeManager = ExchangeManager<MessageEvaluator>;

struct ManagerState {
    stopped: bool,
    /// Exchanges not yet claimed, cancelled or stopped
    exchanges: Vec<Arc<Exchange>>,
}

/// Consumer that resolves expectations against one producer's notifications
pub struct ExchangeManager<E: Evaluator> {
    /// Binds each condition to a predicate at `set_expectation`
    evaluator: E,
    /// Where expectation waits are parked
    pool: WorkerPool,
    /// Stop flag and pending exchanges behind a single lock
    state: Mutex<ManagerState>,
}

impl ExchangeManager<MetricEvaluator> {
    pub fn for_metric(metric: Arc<dyn Metric>, pool: WorkerPool) -> Self {
        Self::new(MetricEvaluator::new(metric), pool)
    }
}

impl ExchangeManager<MessageEvaluator> {
    pub fn for_messages(pool: WorkerPool) -> Self {
        Self::new(MessageEvaluator, pool)
    }
}

impl<E: Evaluator> ExchangeManager<E> {
    pub fn new(evaluator: E, pool: WorkerPool) -> Self {
        Self {
            evaluator,
            pool,
            state: Mutex::new(ManagerState {
                stopped: false,
                exchanges: Vec::new(),
            }),
        }
    }

    /// Register a new exchange for `condition` and start waiting on it
    ///
    /// Returns immediately; the expectation resolves to the first message
    /// satisfying the condition, or to `None` on cancellation or stop.
    pub fn set_expectation(&self, condition: E::Condition) -> Result<Expectation, ExchangeError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(ExchangeError::Stopped { what: "exchange manager" });
        }

        let exchange = Arc::new(Exchange::from_predicate(self.evaluator.bind(condition)));
        let result = self
            .pool
            .spawn_wait(Arc::clone(&exchange))
            .map_err(|e| ExchangeError::WorkerSpawn {
                reason: e.to_string(),
            })?;
        state.exchanges.push(Arc::clone(&exchange));

        Ok(Expectation { exchange, result })
    }

    /// Number of exchanges still waiting for a message
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .exchanges
            .iter()
            .filter(|e| !e.is_stopped())
            .count()
    }
}

impl<E: Evaluator> Consumer for ExchangeManager<E> {
    fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn stop(&self) -> bool {
        let exchanges = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
            std::mem::take(&mut state.exchanges)
        };

        debug!(pending = exchanges.len(), "exchange manager stopped");
        for exchange in exchanges {
            exchange.stop();
        }
        true
    }

    fn message_received(
        &self,
        message: &Message,
        status: DeliveryStatus,
        producer: &ProducerInfo,
    ) -> Result<(), ExchangeError> {
        let claimed = {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(ExchangeError::Stopped { what: "exchange manager" });
            }

            let mut claimed = Vec::new();
            state.exchanges.retain(|exchange| {
                match exchange.claim(message, status, producer) {
                    Ok(true) => {
                        claimed.push(Arc::clone(exchange));
                        false
                    }
                    Ok(false) => true,
                    // Cancelled or resolved elsewhere
                    Err(_) => false,
                }
            });
            claimed
        };

        for exchange in claimed {
            exchange.hand_off(message.clone());
        }
        Ok(())
    }
}

/// Pending result of [`ExchangeManager::set_expectation`]
///
/// Resolves to `Some(message)` on a match and `None` when cancelled or when
/// the manager stops. Dropping it cancels the wait. Impose timeouts with
/// `tokio::time::timeout`.
pub struct Expectation {
    exchange: Arc<Exchange>,
    result: oneshot::Receiver<Option<Message>>,
}

impl Expectation {
    /// Release the wait with an empty result; true if this call cancelled it
    pub fn cancel(&self) -> bool {
        self.exchange.stop()
    }
}

impl Future for Expectation {
    type Output = Option<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().result.poll_unpin(cx).map(|received| {
            received.unwrap_or_else(|_| {
                warn!("expectation worker exited without a result");
                None
            })
        })
    }
}

impl Drop for Expectation {
    fn drop(&mut self) {
        self.exchange.stop();
    }
}
