use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use tokio::sync::oneshot;
use tracing::trace;

use logtap_types::Message;

use crate::Exchange;

/// On-demand workers that park on pending exchanges
///
/// Every pending expectation gets its own named OS thread, so the number of
/// concurrent waits is never capped by the async runtime's blocking pool.
/// Workers are detached: an unresolved wait never holds up process exit.
/// Clones share the same counters.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    /// Prefix for worker thread names
    name: Arc<str>,
    /// Workers currently parked on an exchange
    active: Arc<AtomicUsize>,
    /// Sequence for thread names
    spawned: Arc<AtomicU64>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new("logtap-expect")
    }
}

impl WorkerPool {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            active: Arc::new(AtomicUsize::new(0)),
            spawned: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of workers currently parked on an exchange
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a worker that waits on `exchange` and sends its outcome back
    pub(crate) fn spawn_wait(
        &self,
        exchange: Arc<Exchange>,
    ) -> io::Result<oneshot::Receiver<Option<Message>>> {
        let (tx, rx) = oneshot::channel();
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let active = Arc::clone(&self.active);

        active.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("{}-{seq}", self.name))
            .spawn(move || {
                let result = exchange.wait();
                active.fetch_sub(1, Ordering::SeqCst);
                // Receiver gone means the expectation was dropped
                if tx.send(result).is_err() {
                    trace!(worker = seq, "expectation dropped before its result");
                }
            });

        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(rx)
    }
}
