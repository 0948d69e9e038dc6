use std::sync::Arc;

use tracing::warn;

use logtap_types::{ConstructionError, Message, MessageIds, TypeCatalog};

use crate::exception::ExceptionParser;
use crate::grammar::{HeaderGrammar, HeaderMatch};

/// Splits a line stream into entries
///
/// An entry ends only when the next header line shows up, so lines are
/// buffered until then. Every line fed in ends up in exactly one emitted
/// message, in order.
pub struct Segmenter {
    /// Tried in order; the first match wins
    grammars: Vec<HeaderGrammar>,
    ids: MessageIds,
    parser: ExceptionParser,
    /// Lines of the entry being assembled
    buffer: Vec<String>,
    /// Header of the buffered entry, `None` for lines before the first header
    header: Option<HeaderMatch>,
}

impl Segmenter {
    /// Segmenter with the default grammars and the JDK type catalog
    pub fn new(ids: MessageIds) -> Self {
        Self::with_grammars(ids, HeaderGrammar::defaults(), Arc::new(TypeCatalog::jdk()))
    }

    pub fn with_grammars(
        ids: MessageIds,
        grammars: Vec<HeaderGrammar>,
        catalog: Arc<TypeCatalog>,
    ) -> Self {
        Self {
            grammars,
            ids,
            parser: ExceptionParser::new(catalog),
            buffer: Vec::new(),
            header: None,
        }
    }

    /// Identifier source shared with whoever finalizes the emitted messages
    pub fn ids(&self) -> &MessageIds {
        &self.ids
    }

    /// Feed one line; returns the previous entry when `line` starts a new one
    ///
    /// A line containing `\n` is rejected and leaves the buffer untouched.
    pub fn add_line(&mut self, line: impl Into<String>) -> Result<Option<Message>, ConstructionError> {
        let line = line.into();
        if line.contains('\n') {
            return Err(ConstructionError::EmbeddedNewline {
                index: self.buffer.len(),
            });
        }
        let header = self.grammars.iter().find_map(|g| g.matches(&line));

        match header {
            Some(header) => {
                let emitted = self.package();
                self.buffer.push(line);
                self.header = Some(header);
                Ok(emitted)
            }
            None => {
                self.buffer.push(line);
                Ok(None)
            }
        }
    }

    /// Flush whatever is buffered, e.g. at end of stream
    pub fn force_processing(&mut self) -> Option<Message> {
        self.package()
    }

    /// Number of lines waiting for the next header
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn package(&mut self) -> Option<Message> {
        let header = self.header.take();
        if self.buffer.is_empty() {
            return None;
        }
        let lines = std::mem::take(&mut self.buffer);

        let mut message = match Message::new(lines, &self.ids) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed entry");
                return None;
            }
        };
        if let Some(header) = header {
            message = message.with_header(header.metadata, header.payload);
        }
        if let Some(exception) = self.parser.find_in(message.payload()) {
            message = message.with_exception(exception);
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtap_types::{EntryType, LogLevel};
    use proptest::prelude::*;

    const L1: &str = "12:16:32,500 WARN  [cat] body";
    const L2: &str = "Continuation";
    const L3: &str = "12:16:32,756 ERROR [stderr] other";

    #[test]
    fn test_header_detection() {
        let mut segmenter = Segmenter::new(MessageIds::new());

        assert!(segmenter.add_line(L1).unwrap().is_none());
        assert!(segmenter.add_line(L2).unwrap().is_none());

        let first = segmenter.add_line(L3).unwrap().unwrap();
        assert_eq!(first.lines(), &[L1.to_string(), L2.to_string()]);
        assert_eq!(first.level(), Some(LogLevel::Warn));
        assert_eq!(first.category(), Some("cat"));
        assert_eq!(first.payload(), &["body".to_string(), L2.to_string()]);

        let last = segmenter.force_processing().unwrap();
        assert_eq!(last.lines(), &[L3.to_string()]);
        assert_eq!(last.level(), Some(LogLevel::Error));
        assert_eq!(last.category(), Some("stderr"));

        assert!(segmenter.force_processing().is_none());
        assert_eq!(segmenter.buffered(), 0);
    }

    #[test]
    fn test_first_line_never_emits() {
        let mut segmenter = Segmenter::new(MessageIds::new());
        assert!(segmenter.add_line(L3).unwrap().is_none());

        let mut segmenter = Segmenter::new(MessageIds::new());
        assert!(segmenter.add_line(L2).unwrap().is_none());
    }

    #[test]
    fn test_lines_before_first_header_are_unstructured() {
        let mut segmenter = Segmenter::new(MessageIds::new());
        segmenter.add_line("garbage").unwrap();
        let message = segmenter.add_line(L1).unwrap().unwrap();

        assert_eq!(message.entry_type(), EntryType::Unstructured);
        assert_eq!(message.level(), None);
        assert_eq!(message.payload(), &["garbage".to_string()]);
    }

    #[test]
    fn test_stdio_entries() {
        let mut segmenter = Segmenter::new(MessageIds::new());
        segmenter.add_line("[stdout] hello").unwrap();
        let message = segmenter.add_line("[stdout] world").unwrap().unwrap();

        assert_eq!(message.entry_type(), EntryType::Stdio);
        assert_eq!(message.category(), Some("stdout"));
        assert_eq!(message.text(), "hello");
    }

    #[test]
    fn test_round_trip_reproduces_input() {
        let input = [
            "preamble",
            "",
            L1,
            L2,
            "\tat org.acme.A.b(A.java:1)",
            "[stderr] raw",
            L3,
            L3,
            "  tail",
            "[stdout]",
        ];

        let mut segmenter = Segmenter::new(MessageIds::new());
        let mut emitted: Vec<Message> = input.iter().filter_map(|l| segmenter.add_line(*l).unwrap()).collect();
        emitted.extend(segmenter.force_processing());

        let rebuilt: Vec<&str> = emitted
            .iter()
            .flat_map(|m| m.lines().iter().map(String::as_str))
            .collect();
        assert_eq!(rebuilt, input);
        assert_eq!(emitted.len(), 6);
    }

    #[test]
    fn test_exception_attached_to_entry() {
        let mut segmenter = Segmenter::new(MessageIds::new());
        for line in [
            "12:00:00,000 ERROR [org.acme.Job] run failed",
            "java.lang.IllegalStateException: not ready",
            "\tat org.acme.Job.run(Job.java:42)",
            "\tat java.lang.Thread.run(Thread.java:829)",
        ] {
            segmenter.add_line(line).unwrap();
        }

        let message = segmenter.force_processing().unwrap();
        let exception = message.exception().unwrap();
        assert_eq!(exception.type_name, "java.lang.IllegalStateException");
        assert_eq!(exception.message.as_deref(), Some("not ready"));
        assert!(exception.resolved.is_some());
    }

    #[test]
    fn test_ids_come_from_shared_source() {
        let ids = MessageIds::new();
        let mut segmenter = Segmenter::new(ids.clone());
        segmenter.add_line(L1).unwrap();
        let first = segmenter.add_line(L3).unwrap().unwrap();
        assert_eq!(first.id().0, 0);
        assert_eq!(ids.next_id().0, 1);
    }

    #[test]
    fn test_embedded_newline_keeps_buffer() {
        let mut segmenter = Segmenter::new(MessageIds::new());
        segmenter.add_line(L1).unwrap();
        segmenter.add_line(L2).unwrap();

        assert_eq!(
            segmenter.add_line("two\nlines").unwrap_err(),
            ConstructionError::EmbeddedNewline { index: 2 }
        );
        assert_eq!(segmenter.buffered(), 2);

        let message = segmenter.force_processing().unwrap();
        assert_eq!(message.lines(), &[L1.to_string(), L2.to_string()]);
    }

    fn any_line() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u32..24, 0u32..60, 0u32..1000, prop::sample::select(vec!["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "FATAL"]), "[a-z.]{0,12}")
                .prop_map(|(h, m, ms, level, cat)| format!("{h:02}:{m:02}:00,{ms:03} {level:<5} [{cat}] body")),
            prop::sample::select(vec!["stdout", "stderr", "app"]).prop_map(|cat| format!("[{cat}] raw")),
            Just(String::new()),
            "[ \t]{0,2}[a-zA-Z0-9 .:()]{0,30}",
            Just("\tat org.acme.A.b(A.java:1)".to_string()),
            Just("java.lang.RuntimeException: boom".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip_reproduces_any_input(input in prop::collection::vec(any_line(), 1..40)) {
            let mut segmenter = Segmenter::new(MessageIds::new());
            let mut emitted = Vec::new();

            for (i, line) in input.iter().enumerate() {
                let out = segmenter.add_line(line.as_str()).unwrap();
                if i == 0 {
                    prop_assert!(out.is_none());
                }
                emitted.extend(out);
            }
            emitted.extend(segmenter.force_processing());

            prop_assert!(emitted.iter().all(|m| !m.lines().is_empty()));
            let rebuilt: Vec<&str> = emitted
                .iter()
                .flat_map(|m| m.lines().iter().map(String::as_str))
                .collect();
            prop_assert_eq!(rebuilt, input.iter().map(String::as_str).collect::<Vec<_>>());
            prop_assert_eq!(segmenter.buffered(), 0);
        }
    }
}
