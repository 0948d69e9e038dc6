//! Message fan-out and blocking expectations for logtap
//!
//! A [`Producer`] fans every message transition out to its registered
//! [`Consumer`]s. Metrics and exchange managers are consumers too: a manager
//! hands out [`Expectation`]s that resolve once a notification satisfies
//! their condition.

mod bus;
mod condition;
mod error;
mod exchange;
mod manager;
mod metric;
mod pool;

pub use bus::{Consumer, ConsumerId, Producer, ProducerInfo};
pub use condition::{MessageCondition, MetricCondition};
pub use error::ExchangeError;
pub use exchange::{Exchange, Predicate};
pub use manager::{
    Evaluator, ExchangeManager, Expectation, MessageEvaluator, MessageExchangeManager,
    MetricEvaluator, MetricExchangeManager,
};
pub use metric::{AtomicMetric, Metric};
pub use pool::WorkerPool;

// Re-export types used in our public API
pub use logtap_types::{DeliveryStatus, Message};
