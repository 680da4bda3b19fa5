#![forbid(unsafe_code)]

//! Process-wide sink for unexpected navigation failures.

use std::error::Error;
use std::sync::Mutex;

/// Receives one report per failed navigation. Must not panic.
pub trait ErrorSink: Send + Sync {
    fn report(&self, message: &str, error: &(dyn Error + 'static));
}

/// Logs reports as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, message: &str, error: &(dyn Error + 'static)) {
        tracing::error!(error = %error, "{message}");
    }
}

/// A captured report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub error: String,
}

/// Keeps every report in memory, for tests and diagnostics panels.
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingErrorSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports received so far.
    #[must_use]
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, message: &str, error: &(dyn Error + 'static)) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(ErrorReport {
                message: message.to_owned(),
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NavigationError;

    #[test]
    fn recording_sink_keeps_reports_in_order() {
        let sink = RecordingErrorSink::new();
        sink.report("first", &NavigationError::Transport("reset".into()));
        sink.report("second", &NavigationError::MissingState("instance"));
        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].message, "first");
        assert_eq!(reports[0].error, "transport error: reset");
        assert_eq!(reports[1].error, "missing state: instance");
    }

    #[test]
    fn tracing_sink_does_not_panic_without_subscriber() {
        TracingErrorSink.report("ignored", &NavigationError::Timeout(Default::default()));
    }
}
