use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logtap_exchange::Producer;
use logtap_types::{DeliveryStatus, EntryType, LogLevel, Message, MessageIds};

use crate::Segmenter;

/// Decides the terminal status of each incoming message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptancePolicy {
    #[default]
    AcceptAll,
    /// Reject log entries below the level (or without one); stdio and
    /// unstructured entries are always accepted
    MinLevel(LogLevel),
}

impl AcceptancePolicy {
    pub fn decide(&self, message: &Message) -> DeliveryStatus {
        match self {
            Self::AcceptAll => DeliveryStatus::Accepted,
            Self::MinLevel(_) if message.entry_type() != EntryType::Log => DeliveryStatus::Accepted,
            Self::MinLevel(min) => match message.level() {
                Some(level) if level >= *min => DeliveryStatus::Accepted,
                _ => DeliveryStatus::Rejected,
            },
        }
    }
}

/// Counters reported when a source finishes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Raw lines read, including undecodable ones
    pub lines: u64,
    /// Lines that were not valid UTF-8 and were decoded lossily
    pub lossy: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl SourceStats {
    /// Messages published under a terminal status
    pub fn messages(&self) -> u64 {
        self.accepted + self.rejected
    }
}

/// Drives one segmenter from a line source on a dedicated task
///
/// Every emitted message is published twice: as `Incoming`, then under its
/// terminal status and a fresh identifier. End of input flushes the last
/// buffered entry; cancellation does not.
pub struct LogSource {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<SourceStats>,
}

impl LogSource {
    pub fn spawn<R>(
        reader: R,
        segmenter: Segmenter,
        producer: Arc<Producer>,
        policy: AcceptancePolicy,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(reader, segmenter, producer, policy, cancel.clone()));
        Self { cancel, task }
    }

    /// Token that stops the source when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the source to finish
    pub async fn join(self) -> SourceStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "log source task failed");
                SourceStats::default()
            }
        }
    }
}

/// Decode one raw line, dropping its terminator
///
/// Invalid UTF-8 is replaced rather than ending the stream. Returns the
/// line and whether replacement happened.
fn decode_line(raw: &[u8]) -> (String, bool) {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => (line.to_string(), false),
        Err(_) => (String::from_utf8_lossy(raw).into_owned(), true),
    }
}

async fn drive<R>(
    mut reader: R,
    mut segmenter: Segmenter,
    producer: Arc<Producer>,
    policy: AcceptancePolicy,
    cancel: CancellationToken,
) -> SourceStats
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let ids = segmenter.ids().clone();
    let mut stats = SourceStats::default();
    // Partial reads survive a losing select branch, so the buffer lives here
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(producer = %producer.info(), "log source cancelled");
                return stats;
            }

            result = reader.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let (line, lossy) = decode_line(&buf);
                        buf.clear();
                        stats.lines += 1;
                        if lossy {
                            stats.lossy += 1;
                            debug!(producer = %producer.info(), line = stats.lines, "replaced invalid UTF-8");
                        }
                        match segmenter.add_line(line) {
                            Ok(Some(message)) => {
                                publish(&producer, &ids, policy, message, &mut stats).await;
                            }
                            Ok(None) => {}
                            Err(e) => warn!(producer = %producer.info(), error = %e, "skipping line"),
                        }
                    }
                    Err(e) => {
                        warn!(producer = %producer.info(), error = %e, "error reading log source");
                        break;
                    }
                }
            }
        }
    }

    if let Some(message) = segmenter.force_processing() {
        publish(&producer, &ids, policy, message, &mut stats).await;
    }
    debug!(producer = %producer.info(), ?stats, "log source finished");
    stats
}

/// Fan out both transitions of one message
///
/// Consumers may block (exchange handoffs), so notification runs on the
/// blocking pool. Messages are still published one at a time.
async fn publish(
    producer: &Arc<Producer>,
    ids: &MessageIds,
    policy: AcceptancePolicy,
    message: Message,
    stats: &mut SourceStats,
) {
    let producer = Arc::clone(producer);
    let ids = ids.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        producer.notify(&message, DeliveryStatus::Incoming);
        let status = policy.decide(&message);
        match message.finalize(status, &ids) {
            Ok(finalized) => {
                producer.notify(&finalized, status);
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, "could not finalize message");
                None
            }
        }
    })
    .await;

    match outcome {
        Ok(Some(DeliveryStatus::Accepted)) => stats.accepted += 1,
        Ok(Some(_)) => stats.rejected += 1,
        Ok(None) => {}
        Err(e) => warn!(error = %e, "message publication failed"),
    }
}
