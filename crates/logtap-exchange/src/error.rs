use thiserror::Error;

/// Errors raised by consumers, exchanges and managers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Operation on a consumer, exchange or manager that has been stopped
    #[error("illegal state: {what} is stopped")]
    Stopped { what: &'static str },

    /// Notification delivered to an exchange that already handed off a message
    #[error("illegal state: exchange already resolved")]
    AlreadyResolved,

    /// The OS refused to start a worker for a new expectation
    #[error("failed to start expectation worker: {reason}")]
    WorkerSpawn { reason: String },
}

impl ExchangeError {
    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            ExchangeError::Stopped { .. } => "stopped",
            ExchangeError::AlreadyResolved => "already_resolved",
            ExchangeError::WorkerSpawn { .. } => "worker_spawn",
        }
    }
}
