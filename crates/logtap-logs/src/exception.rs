//! Exception dump parsing
//!
//! Each line is classified on its own into an [`ExceptionLine`]; the records
//! are then folded into an [`ExceptionDescriptor`] chain where every cause
//! line after the first becomes the cause of the one before it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::trace;

use logtap_types::{ExceptionDescriptor, TypeCatalog};

static CAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:Caused by: )?(?P<class>[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)+)(?::\s?(?P<message>.*))?$",
    )
    .expect("cause pattern is valid")
});

static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+at (?P<class>[\w$.<>/@]+)\.(?P<method>[\w$<>]+)\((?P<location>[^)]*)\)(?:\s*~?\[(?P<module>[^\]:]*):(?P<version>[^\]]*)\])?\s*$",
    )
    .expect("frame pattern is valid")
});

static TRUNCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\.\.\. (?P<count>\d+) more\s*$").expect("truncation pattern is valid"));

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<file>.+):(?P<line>\d+)$").expect("location pattern is valid"));

/// Exception dump text that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("exception dump is empty")]
    Empty,

    #[error("exception dump does not start with an exception line: {line:?}")]
    MissingCause { line: String },
}

/// Where a stack frame's code lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameSource {
    Regular { file: String, line: u32 },
    Native,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub source: FrameSource,
    pub declaring_class: String,
    pub method: String,
    /// Empty when the frame carries no module annotation
    pub module_name: String,
    pub module_version: String,
}

/// Classification of one line of an exception dump
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExceptionLine {
    Cause {
        class_name: String,
        message: Option<String>,
    },
    StackFrame(StackFrame),
    StackTraceEnd {
        frames_omitted: u32,
    },
}

impl ExceptionLine {
    pub fn classify(line: &str) -> Option<Self> {
        if let Some(caps) = TRUNCATION.captures(line) {
            let frames_omitted = caps["count"].parse().ok()?;
            return Some(Self::StackTraceEnd { frames_omitted });
        }

        if let Some(caps) = FRAME.captures(line) {
            let location = &caps["location"];
            let source = if location == "Native Method" {
                FrameSource::Native
            } else if let Some(loc) = LOCATION.captures(location) {
                match loc["line"].parse() {
                    Ok(line) => FrameSource::Regular {
                        file: loc["file"].to_string(),
                        line,
                    },
                    Err(_) => FrameSource::Unknown,
                }
            } else {
                FrameSource::Unknown
            };

            return Some(Self::StackFrame(StackFrame {
                source,
                declaring_class: caps["class"].to_string(),
                method: caps["method"].to_string(),
                module_name: caps.name("module").map_or("", |m| m.as_str()).to_string(),
                module_version: caps.name("version").map_or("", |m| m.as_str()).to_string(),
            }));
        }

        let caps = CAUSE.captures(line)?;
        let message = caps
            .name("message")
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        Some(Self::Cause {
            class_name: caps["class"].to_string(),
            message,
        })
    }

    pub fn is_cause(&self) -> bool {
        matches!(self, Self::Cause { .. })
    }
}

/// Parsed dump with the per-line records it was folded from
#[derive(Clone, Debug)]
pub struct ParsedDump {
    pub descriptor: ExceptionDescriptor,
    pub records: Vec<ExceptionLine>,
}

/// Folds exception dumps into descriptors, resolving type names against a catalog
#[derive(Clone, Debug)]
pub struct ExceptionParser {
    catalog: Arc<TypeCatalog>,
}

impl ExceptionParser {
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        Self { catalog }
    }

    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> Result<ExceptionDescriptor, ParseError> {
        self.parse_lines(lines).map(|dump| dump.descriptor)
    }

    /// Parse a dump that must start with an exception line
    ///
    /// Unrecognised lines directly after an exception line continue its
    /// message; elsewhere they are skipped.
    pub fn parse_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<ParsedDump, ParseError> {
        let first = lines.first().ok_or(ParseError::Empty)?.as_ref();
        if !ExceptionLine::classify(first).is_some_and(|l| l.is_cause()) {
            return Err(ParseError::MissingCause {
                line: first.to_string(),
            });
        }

        let mut records = Vec::with_capacity(lines.len());
        let mut causes: Vec<ExceptionDescriptor> = Vec::new();
        let mut in_header = false;

        for line in lines.iter().map(AsRef::as_ref) {
            match ExceptionLine::classify(line) {
                Some(record) => {
                    if let ExceptionLine::Cause {
                        class_name,
                        message,
                    } = &record
                    {
                        let mut descriptor = ExceptionDescriptor::new(class_name, message.clone());
                        descriptor.resolved = self.catalog.resolve(class_name);
                        causes.push(descriptor);
                        in_header = true;
                    } else {
                        in_header = false;
                    }
                    records.push(record);
                }
                None if in_header => {
                    if let Some(current) = causes.last_mut() {
                        let message = current.message.get_or_insert_with(String::new);
                        if !message.is_empty() {
                            message.push('\n');
                        }
                        message.push_str(line);
                    }
                }
                None => trace!(line, "skipping unrecognised exception line"),
            }
        }

        let descriptor = causes
            .into_iter()
            .rev()
            .reduce(|cause, mut outer| {
                outer.cause = Some(Box::new(cause));
                outer
            })
            .ok_or(ParseError::Empty)?;

        Ok(ParsedDump {
            descriptor,
            records,
        })
    }

    /// Locate and parse the first exception dump inside an entry's lines
    ///
    /// A dump starts at an exception line followed by a stack frame or a
    /// truncation line, or at an exception line that ends the entry, and runs
    /// while lines keep classifying.
    pub fn find_in<S: AsRef<str>>(&self, lines: &[S]) -> Option<ExceptionDescriptor> {
        let classified: Vec<Option<ExceptionLine>> = lines
            .iter()
            .map(|l| ExceptionLine::classify(l.as_ref()))
            .collect();

        let start = classified.iter().enumerate().position(|(i, record)| {
            record.as_ref().is_some_and(ExceptionLine::is_cause)
                && match classified.get(i + 1) {
                    Some(Some(next)) => !next.is_cause(),
                    Some(None) => false,
                    None => i > 0,
                }
        })?;
        let end = classified[start..]
            .iter()
            .position(Option::is_none)
            .map_or(lines.len(), |offset| start + offset);

        self.parse(&lines[start..end]).ok()
    }
}
