use std::fmt;
use std::sync::Arc;

use regex::Regex;

use logtap_types::{DeliveryStatus, LogLevel, Message};

use crate::ProducerInfo;

type MetricFn = dyn Fn(i64) -> bool + Send + Sync;
type MessageFn = dyn Fn(&Message, DeliveryStatus, &ProducerInfo) -> bool + Send + Sync;

/// Predicate over a metric's current value
///
/// Cheap to clone and reusable across expectations.
#[derive(Clone)]
pub struct MetricCondition {
    description: String,
    predicate: Arc<MetricFn>,
}

impl MetricCondition {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(i64) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn at_least(threshold: i64) -> Self {
        Self::new(format!(">= {threshold}"), move |v| v >= threshold)
    }

    pub fn at_most(threshold: i64) -> Self {
        Self::new(format!("<= {threshold}"), move |v| v <= threshold)
    }

    pub fn equal_to(expected: i64) -> Self {
        Self::new(format!("== {expected}"), move |v| v == expected)
    }

    pub fn is_satisfied(&self, value: i64) -> bool {
        (self.predicate)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for MetricCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetricCondition({})", self.description)
    }
}

/// Predicate over a raw (message, status, producer) notification
#[derive(Clone)]
pub struct MessageCondition {
    description: String,
    predicate: Arc<MessageFn>,
}

impl MessageCondition {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Message, DeliveryStatus, &ProducerInfo) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Any notification carrying `status`
    pub fn with_status(status: DeliveryStatus) -> Self {
        Self::new(format!("status {status}"), move |_, s, _| s == status)
    }

    /// Messages whose severity is at least `level`
    pub fn level_at_least(level: LogLevel) -> Self {
        Self::new(format!("level >= {level}"), move |m, _, _| {
            m.level().is_some_and(|l| l >= level)
        })
    }

    /// Messages with any raw line matching `pattern`
    pub fn matching(pattern: Regex) -> Self {
        Self::new(format!("matches /{}/", pattern.as_str()), move |m, _, _| {
            m.lines().iter().any(|line| pattern.is_match(line))
        })
    }

    /// Messages carrying an exception whose chain contains `type_name`
    pub fn with_exception(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self::new(format!("exception {type_name}"), move |m, _, _| {
            m.exception()
                .is_some_and(|e| e.chain().any(|d| d.type_name == type_name))
        })
    }

    /// Both conditions must hold
    pub fn and(self, other: MessageCondition) -> Self {
        let description = format!("{} and {}", self.description, other.description);
        Self::new(description, move |m, s, p| {
            self.is_satisfied(m, s, p) && other.is_satisfied(m, s, p)
        })
    }

    pub fn is_satisfied(
        &self,
        message: &Message,
        status: DeliveryStatus,
        producer: &ProducerInfo,
    ) -> bool {
        (self.predicate)(message, status, producer)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for MessageCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageCondition({})", self.description)
    }
}
