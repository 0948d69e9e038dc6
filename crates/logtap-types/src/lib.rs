//! Shared types for logtap
//!
//! This crate contains the message model threaded through the segmenter,
//! the notification bus and the exchange machinery.

mod exception;
mod ordering;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveTime;
use thiserror::Error;

pub use exception::{ExceptionDescriptor, TypeCatalog, TypeHandle};
pub use ordering::{by_id, by_timestamp};

// ============================================================================
// Errors
// ============================================================================

/// Invalid input for one of the value types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("a message needs at least one line")]
    EmptyLines,

    #[error("line {index} contains an embedded newline")]
    EmbeddedNewline { index: usize },

    #[error("message {id} is already {status}")]
    AlreadyFinalized { id: MessageId, status: DeliveryStatus },

    #[error("{0} is not a terminal delivery status")]
    NotTerminal(DeliveryStatus),
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" | "trc" | "finest" | "finer" => Some(Self::Trace),
            "debug" | "dbg" | "fine" => Some(Self::Debug),
            "info" | "inf" | "information" => Some(Self::Info),
            "warn" | "warning" | "wrn" => Some(Self::Warn),
            "error" | "err" | "severe" => Some(Self::Error),
            "fatal" | "critical" | "crit" | "ftl" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Short display string (3 chars)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRC",
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warn => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FTL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which header grammar opened an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntryType {
    /// Regular log statement with timestamp and severity
    Log,
    /// Raw stdout/stderr passthrough tagged only with a bracketed stream name
    Stdio,
    /// Lines seen before any recognised header
    #[default]
    Unstructured,
}

/// Lifecycle tag of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Incoming,
    Accepted,
    Rejected,
}

impl DeliveryStatus {
    /// Whether this status ends the message lifecycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Incoming)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incoming => "incoming",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique, monotonically increasing message identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared source of message identifiers
///
/// Clones hand out identifiers from the same counter, so a segmenter and the
/// driver finalizing its messages can share one sequence.
#[derive(Clone, Debug, Default)]
pub struct MessageIds {
    next: Arc<AtomicU64>,
}

impl MessageIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier
    pub fn next_id(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

// ============================================================================
// Message
// ============================================================================

/// Structured fields captured from an entry's header line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub timestamp: Option<NaiveTime>,
    pub level: Option<LogLevel>,
    pub category: Option<String>,
    pub entry_type: EntryType,
}

/// A single reconstructed log entry
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    status: DeliveryStatus,
    lines: Vec<String>,
    payload: Vec<String>,
    metadata: EntryMetadata,
    exception: Option<ExceptionDescriptor>,
}

impl Message {
    /// Create an incoming message from its raw lines
    pub fn new(lines: Vec<String>, ids: &MessageIds) -> Result<Self, ConstructionError> {
        if lines.is_empty() {
            return Err(ConstructionError::EmptyLines);
        }
        if let Some(index) = lines.iter().position(|l| l.contains('\n')) {
            return Err(ConstructionError::EmbeddedNewline { index });
        }

        Ok(Self {
            id: ids.next_id(),
            status: DeliveryStatus::Incoming,
            payload: lines.clone(),
            lines,
            metadata: EntryMetadata::default(),
            exception: None,
        })
    }

    /// Attach header metadata and the header line's payload text
    pub fn with_header(mut self, metadata: EntryMetadata, header_payload: impl Into<String>) -> Self {
        self.metadata = metadata;
        self.payload[0] = header_payload.into();
        self
    }

    /// Attach a parsed exception dump
    pub fn with_exception(mut self, exception: ExceptionDescriptor) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Produce the finalized copy of this message under a fresh identifier
    pub fn finalize(
        &self,
        status: DeliveryStatus,
        ids: &MessageIds,
    ) -> Result<Message, ConstructionError> {
        if self.status.is_terminal() {
            return Err(ConstructionError::AlreadyFinalized {
                id: self.id,
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(ConstructionError::NotTerminal(status));
        }

        let mut finalized = self.clone();
        finalized.id = ids.next_id();
        finalized.status = status;
        Ok(finalized)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    /// Raw lines exactly as read from the source
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines with the header prefix stripped
    pub fn payload(&self) -> &[String] {
        &self.payload
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> Option<NaiveTime> {
        self.metadata.timestamp
    }

    pub fn level(&self) -> Option<LogLevel> {
        self.metadata.level
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.category.as_deref()
    }

    pub fn entry_type(&self) -> EntryType {
        self.metadata.entry_type
    }

    pub fn exception(&self) -> Option<&ExceptionDescriptor> {
        self.exception.as_ref()
    }

    /// Payload joined into a single string
    pub fn text(&self) -> String {
        self.payload.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_lines_rejected() {
        let ids = MessageIds::new();
        assert_eq!(
            Message::new(Vec::new(), &ids).unwrap_err(),
            ConstructionError::EmptyLines
        );
    }

    #[test]
    fn test_embedded_newline_rejected() {
        let ids = MessageIds::new();
        let err = Message::new(lines(&["ok", "bad\nline"]), &ids).unwrap_err();
        assert_eq!(err, ConstructionError::EmbeddedNewline { index: 1 });
    }

    #[test]
    fn test_finalize_assigns_second_id() {
        let ids = MessageIds::new();
        let incoming = Message::new(lines(&["hello"]), &ids).unwrap();
        let accepted = incoming.finalize(DeliveryStatus::Accepted, &ids).unwrap();

        assert_eq!(incoming.id(), MessageId(0));
        assert_eq!(accepted.id(), MessageId(1));
        assert_eq!(accepted.status(), DeliveryStatus::Accepted);
        assert_eq!(accepted.lines(), incoming.lines());
    }

    #[test]
    fn test_finalize_only_once() {
        let ids = MessageIds::new();
        let incoming = Message::new(lines(&["hello"]), &ids).unwrap();

        assert_eq!(
            incoming.finalize(DeliveryStatus::Incoming, &ids).unwrap_err(),
            ConstructionError::NotTerminal(DeliveryStatus::Incoming)
        );

        let rejected = incoming.finalize(DeliveryStatus::Rejected, &ids).unwrap();
        assert!(matches!(
            rejected.finalize(DeliveryStatus::Accepted, &ids),
            Err(ConstructionError::AlreadyFinalized { .. })
        ));
    }

    #[test]
    fn test_header_replaces_first_payload_line() {
        let ids = MessageIds::new();
        let metadata = EntryMetadata {
            level: Some(LogLevel::Warn),
            entry_type: EntryType::Log,
            ..Default::default()
        };
        let message = Message::new(lines(&["12:00:00,000 WARN body", "more"]), &ids)
            .unwrap()
            .with_header(metadata, "body");

        assert_eq!(message.payload(), &["body".to_string(), "more".to_string()]);
        assert_eq!(message.lines()[0], "12:00:00,000 WARN body");
        assert_eq!(message.level(), Some(LogLevel::Warn));
        assert_eq!(message.text(), "body\nmore");
    }

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("severe"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error > LogLevel::Warn);
    }
}
