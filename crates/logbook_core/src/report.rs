//! Log sink and progress reporting.
//!
//! Lines are traced immediately and also handed to the publish context, which
//! keeps the accumulated log text and emits `NewLogEntry` notifications.

use crate::error::{ControllerError, ControllerResult};
use crate::events::{ControllerEvent, Severity};
use crate::publish::Publisher;
use std::panic::{self, AssertUnwindSafe};

/// Cloneable handle for writing log lines and progress from any thread.
#[derive(Clone)]
pub struct Reporter {
    publisher: Option<Publisher>,
}

impl Reporter {
    pub(crate) fn new(publisher: Publisher) -> Self {
        Self {
            publisher: Some(publisher),
        }
    }

    /// A reporter that only traces. Useful for driving components directly.
    pub fn tracing_only() -> Self {
        Self { publisher: None }
    }

    /// Writes a normal line.
    pub fn log(&self, text: impl Into<String>) {
        self.log_with(text.into(), Severity::Normal);
    }

    /// Writes a highlighted line (warnings, errors).
    pub fn log_highlight(&self, text: impl Into<String>) {
        self.log_with(text.into(), Severity::Highlight);
    }

    /// Writes a line with an explicit severity.
    pub fn log_with(&self, text: String, severity: Severity) {
        match severity {
            Severity::Highlight => tracing::warn!("{}", text),
            Severity::Normal | Severity::Success => tracing::info!("{}", text),
        }

        if let Some(publisher) = &self.publisher {
            let posted = publisher.post(move |ctx| ctx.append_log(text, severity));
            if posted.is_err() {
                tracing::debug!("log line dropped, publish context closed");
            }
        }
    }

    /// Reports progress. A negative percent clears the display.
    pub fn progress(&self, percent: i32, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!(percent, %message, "progress");

        if let Some(publisher) = &self.publisher {
            let _ = publisher.post(move |ctx| ctx.emit(ControllerEvent::Progress { percent, message }));
        }
    }
}

/// What a long-running collaborator call gets to observe and report through.
pub struct TaskContext<'a> {
    is_closing: &'a (dyn Fn() -> bool + Sync),
    reporter: &'a Reporter,
}

impl<'a> TaskContext<'a> {
    /// Creates a context from a closing predicate and a reporter.
    pub fn new(is_closing: &'a (dyn Fn() -> bool + Sync), reporter: &'a Reporter) -> Self {
        Self {
            is_closing,
            reporter,
        }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_closing(&self) -> bool {
        (self.is_closing)()
    }

    /// Returns `Err(Cancelled)` once shutdown has been requested, for use
    /// with `?` between sub-steps.
    pub fn check_closing(&self) -> ControllerResult<()> {
        if self.is_closing() {
            Err(ControllerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The reporter.
    pub fn reporter(&self) -> &Reporter {
        self.reporter
    }

    /// Shorthand for [`Reporter::progress`].
    pub fn progress(&self, percent: i32, message: impl Into<String>) {
        self.reporter.progress(percent, message);
    }

    /// Shorthand for [`Reporter::log`].
    pub fn log(&self, text: impl Into<String>) {
        self.reporter.log(text);
    }
}

/// Runs a collaborator call, turning a panic into [`ControllerError::Panicked`].
pub(crate) fn contain<T>(what: &str, f: impl FnOnce() -> ControllerResult<T>) -> ControllerResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(ControllerError::Panicked(what.to_string())),
    }
}

/// Runs an isolated step: errors are logged, cancellation is absorbed, and
/// the caller carries on either way.
pub(crate) fn isolate<T>(
    reporter: &Reporter,
    what: &str,
    f: impl FnOnce() -> ControllerResult<T>,
) -> Option<T> {
    match contain(what, f) {
        Ok(value) => Some(value),
        Err(err) if err.is_cancelled() => {
            tracing::debug!(step = what, "step cancelled");
            None
        }
        Err(err) => {
            reporter.log_highlight(format!("{what} failed: {err}"));
            None
        }
    }
}
