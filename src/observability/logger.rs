//! Structured JSON logger
//!
//! - Structured logs (JSON), one line per event
//! - Deterministic key ordering
//! - Explicit severity levels
//! - Synchronous, no buffering
//!
//! Everything goes to stderr: this crate is a library, and stdout belongs
//! to the embedding application.

use std::fmt::Write as _;
use std::io::{self, Write};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// Structured logger for storage lifecycle events
///
/// Field keys are emitted in deterministic (alphabetical) order, after the
/// fixed `event` and `severity` keys, so identical events produce identical
/// lines.
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::render(severity, event, fields);
        // One write_all call: a line is never interleaved.
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = handle.write_all(line.as_bytes());
        let _ = handle.flush();
    }

    /// Renders one event as a single JSON line.
    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut ordered: Vec<&(&str, &str)> = fields.iter().collect();
        ordered.sort_by_key(|(key, _)| *key);

        let mut line = String::with_capacity(128);
        line.push('{');
        Self::push_entry(&mut line, "event", event);
        line.push(',');
        Self::push_entry(&mut line, "severity", severity.as_str());
        for (key, value) in ordered {
            line.push(',');
            Self::push_entry(&mut line, key, value);
        }
        line.push_str("}\n");
        line
    }

    fn push_entry(line: &mut String, key: &str, value: &str) {
        Self::push_escaped(line, key);
        line.push(':');
        Self::push_escaped(line, value);
    }

    fn push_escaped(line: &mut String, text: &str) {
        line.push('"');
        for c in text.chars() {
            match c {
                '"' => line.push_str("\\\""),
                '\\' => line.push_str("\\\\"),
                '\n' => line.push_str("\\n"),
                '\r' => line.push_str("\\r"),
                '\t' => line.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(line, "\\u{:04x}", c as u32);
                }
                c => line.push(c),
            }
        }
        line.push('"');
    }

    /// Log at TRACE level
    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}
