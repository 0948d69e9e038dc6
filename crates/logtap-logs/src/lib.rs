//! Log segmentation for logtap
//!
//! This crate turns raw lines into structured messages, parses embedded
//! exception dumps and drives a segmenter off an async line source.

mod exception;
mod grammar;
mod segmenter;
mod source;

pub use exception::{ExceptionLine, ExceptionParser, FrameSource, ParseError, ParsedDump, StackFrame};
pub use grammar::{FieldKind, FormatSegment, HeaderGrammar, HeaderMatch};
pub use segmenter::Segmenter;
pub use source::{AcceptancePolicy, LogSource, SourceStats};

// Re-export types used in our public API
pub use logtap_types::{
    DeliveryStatus, EntryMetadata, EntryType, ExceptionDescriptor, LogLevel, Message, MessageIds,
    TypeCatalog,
};
