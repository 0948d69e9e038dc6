use std::sync::LazyLock;

use chrono::NaiveTime;
use regex::{Captures, Regex};

use logtap_types::{EntryMetadata, EntryType, LogLevel};

static TIMESTAMP_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<time>\d{2}:\d{2}:\d{2},\d{3})\s+(?P<level>TRACE|DEBUG|INFO|WARN|WARNING|ERROR|FATAL|SEVERE)\s+(?:\[(?P<category>[^\]]+)\]\s?)?(?P<message>.*)$",
    )
    .expect("timestamp grammar is valid")
});

static BRACKETED_CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<category>[\w.\-]+)\]\s?(?P<message>.*)$")
        .expect("category grammar is valid")
});

/// Field of a header line described by a format translator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// `HH:mm:ss,SSS` time of day
    Time,
    Level,
    Category,
    /// Free text up to the end of the line
    Message,
    /// Any other non-blank token (thread name, pid, ...)
    Other,
}

/// One piece of a logging framework's line layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatSegment {
    Literal(String),
    Variable(FieldKind),
}

/// Result of matching a header line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderMatch {
    pub metadata: EntryMetadata,
    /// Header line with the grammar's prefix removed
    pub payload: String,
}

/// Recognises the first line of a log entry
///
/// Patterns use the named groups `time`, `level`, `category` and `message`;
/// all of them are optional.
#[derive(Clone, Debug)]
pub struct HeaderGrammar {
    regex: Regex,
    entry_type: EntryType,
}

impl HeaderGrammar {
    pub fn new(pattern: &str, entry_type: EntryType) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            entry_type,
        })
    }

    /// `12:16:32,500 WARN  [category] text`
    pub fn timestamp_level() -> Self {
        Self {
            regex: TIMESTAMP_LEVEL.clone(),
            entry_type: EntryType::Log,
        }
    }

    /// `[stderr] text`, used for raw stdout/stderr passthrough
    pub fn bracketed_category() -> Self {
        Self {
            regex: BRACKETED_CATEGORY.clone(),
            entry_type: EntryType::Stdio,
        }
    }

    /// The grammars a segmenter uses unless told otherwise
    pub fn defaults() -> Vec<Self> {
        vec![Self::timestamp_level(), Self::bracketed_category()]
    }

    /// Build a grammar from a translated layout description
    ///
    /// Whitespace inside literals matches any run of blanks, since layouts
    /// usually pad fields. A trailing message group is added when the layout
    /// has none.
    pub fn from_segments(
        segments: &[FormatSegment],
        entry_type: EntryType,
    ) -> Result<Self, regex::Error> {
        let mut pattern = String::from("^");
        let mut has_message = false;

        for segment in segments {
            match segment {
                FormatSegment::Literal(text) => push_literal(&mut pattern, text),
                FormatSegment::Variable(kind) => {
                    let group = match kind {
                        FieldKind::Time => r"(?P<time>\d{2}:\d{2}:\d{2},\d{3})",
                        FieldKind::Level => r"(?P<level>[A-Za-z]+)",
                        FieldKind::Category => r"(?P<category>[^\]\s]+)",
                        FieldKind::Message => {
                            has_message = true;
                            r"(?P<message>.*)"
                        }
                        FieldKind::Other => r"\S+",
                    };
                    pattern.push_str(group);
                }
            }
        }
        if !has_message {
            pattern.push_str(r"(?P<message>.*)");
        }
        pattern.push('$');

        Self::new(&pattern, entry_type)
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Match a line; a `level` group that is not a known severity is no match
    pub fn matches(&self, line: &str) -> Option<HeaderMatch> {
        let caps = self.regex.captures(line)?;

        let level = match caps.name("level") {
            Some(m) => Some(LogLevel::parse(m.as_str())?),
            None => None,
        };
        let timestamp = caps.name("time").and_then(|m| parse_time(m.as_str()));
        let category = caps.name("category").map(|m| m.as_str().to_string());

        Some(HeaderMatch {
            metadata: EntryMetadata {
                timestamp,
                level,
                category,
                entry_type: self.entry_type,
            },
            payload: payload(&caps, line),
        })
    }
}

fn payload(caps: &Captures<'_>, line: &str) -> String {
    caps.name("message")
        .map_or(line, |m| m.as_str())
        .to_string()
}

/// Parse `HH:mm:ss,SSS`
fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(&raw.replacen(',', ".", 1), "%H:%M:%S%.f").ok()
}

fn push_literal(pattern: &mut String, text: &str) {
    let mut in_blank = false;
    let mut word = String::new();
    for c in text.chars() {
        if c.is_whitespace() {
            if !word.is_empty() {
                pattern.push_str(&regex::escape(&word));
                word.clear();
            }
            if !in_blank {
                pattern.push_str(r"\s+");
                in_blank = true;
            }
        } else {
            word.push(c);
            in_blank = false;
        }
    }
    if !word.is_empty() {
        pattern.push_str(&regex::escape(&word));
    }
}
