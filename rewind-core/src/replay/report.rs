//! Per-case and summary reporting
//!
//! A [`Reporter`] pairs a [`MessageFormatter`] with a [`Printer`] sink.
//! Closures implement both traits, so custom output is a one-liner:
//!
//! ```rust,ignore
//! let reporter = Reporter::default()
//!     .with_printer(|line: &str| eprintln!("{line}"))
//!     .with_formatter(|record: &MessageRecord<'_>| format!("{} {}", record.status, record.key));
//! ```

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::runner::{CaseResult, CaseStatus, RunSummary};
use crate::outcome::{CaseKey, Outcome};

/// Data available to a formatter for one case
#[derive(Debug, Clone, Copy)]
pub struct MessageRecord<'a> {
    /// Classification
    pub status: CaseStatus,
    /// Case key
    pub key: &'a CaseKey,
    /// Classification detail; empty on success
    pub message: &'a str,
    /// Recorded outcome, when it could be loaded
    pub expected: Option<&'a Outcome>,
    /// Replayed outcome, when the case ran
    pub actual: Option<&'a Outcome>,
}

impl<'a> From<&'a CaseResult> for MessageRecord<'a> {
    fn from(result: &'a CaseResult) -> Self {
        Self {
            status: result.status,
            key: &result.key,
            message: &result.message,
            expected: result.expected.as_ref(),
            actual: result.actual.as_ref(),
        }
    }
}

/// Turns a case record into a line of output
pub trait MessageFormatter: Send + Sync {
    /// Format one case
    fn format(&self, record: &MessageRecord<'_>) -> String;
}

impl<F> MessageFormatter for F
where
    F: Fn(&MessageRecord<'_>) -> String + Send + Sync,
{
    fn format(&self, record: &MessageRecord<'_>) -> String {
        self(record)
    }
}

/// Output sink
pub trait Printer: Send + Sync {
    /// Emit one line
    fn print(&self, line: &str);
}

impl<F> Printer for F
where
    F: Fn(&str) + Send + Sync,
{
    fn print(&self, line: &str) {
        self(line)
    }
}

/// Renders values inside messages
pub type Stringify = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// `REWIND: {STATUS} fc=.. tc=.. [msg=..] [expected: ..] [actual: ..]`
#[derive(Clone, Default)]
pub struct DefaultFormatter {
    stringify: Option<Stringify>,
}

impl fmt::Debug for DefaultFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultFormatter")
            .field("custom_stringify", &self.stringify.is_some())
            .finish()
    }
}

impl DefaultFormatter {
    /// Use `stringify` to render values
    pub fn with_stringify<F>(mut self, stringify: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.stringify = Some(Arc::new(stringify));
        self
    }

    fn render(&self, outcome: &Outcome) -> String {
        let body = match outcome {
            Outcome::Returned(value) => match &self.stringify {
                Some(stringify) => stringify(value),
                None => value.to_string(),
            },
            Outcome::Raised(raised) => raised.to_string(),
        };
        format!("{} {}", outcome.type_label(), body)
    }
}

impl MessageFormatter for DefaultFormatter {
    fn format(&self, record: &MessageRecord<'_>) -> String {
        let mut parts = vec![
            format!("{:10}", record.status.to_string()),
            format!("fc={}", record.key.fcid),
            format!("tc={}", record.key.tcid),
        ];
        if !record.message.is_empty() {
            parts.push(format!("msg={}", record.message));
        }
        if record.status == CaseStatus::Fail {
            if let Some(expected) = record.expected {
                parts.push(format!("expected: {}", self.render(expected)));
            }
            if let Some(actual) = record.actual {
                parts.push(format!("actual: {}", self.render(actual)));
            }
        }
        format!("REWIND: {}", parts.join(" "))
    }
}

/// Writes lines to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn print(&self, line: &str) {
        println!("{line}");
    }
}

/// Emits lines as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPrinter;

impl Printer for TracingPrinter {
    fn print(&self, line: &str) {
        info!(target: "rewind::report", "{line}");
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct CollectingPrinter {
    lines: Mutex<Vec<String>>,
}

impl CollectingPrinter {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines printed so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Printer for CollectingPrinter {
    fn print(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(line.to_string());
    }
}

/// Formatter plus sink
#[derive(Clone)]
pub struct Reporter {
    formatter: Arc<dyn MessageFormatter>,
    printer: Arc<dyn Printer>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            formatter: Arc::new(DefaultFormatter::default()),
            printer: Arc::new(StdoutPrinter),
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    /// Replace the formatter
    pub fn with_formatter(mut self, formatter: impl MessageFormatter + 'static) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    /// Replace the printer
    pub fn with_printer(mut self, printer: impl Printer + 'static) -> Self {
        self.printer = Arc::new(printer);
        self
    }

    /// Share a printer
    pub fn with_shared_printer(mut self, printer: Arc<dyn Printer>) -> Self {
        self.printer = printer;
        self
    }

    /// Report one case
    pub fn case(&self, result: &CaseResult) {
        let line = self.formatter.format(&MessageRecord::from(result));
        self.printer.print(&line);
    }

    /// Report the batch summary
    pub fn summary(&self, summary: &RunSummary) {
        self.printer.print(&summary.summary_line());
    }
}
