//! Stage reporting for long-running oracle calls.
//!
//! The CLI uses `SpinnerReporter`; library callers can use `NoopReporter`
//! or provide their own implementation.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Receives stage changes from a try-on session.
pub trait ProgressReporter: Send + Sync {
    /// A new stage started.
    fn stage(&self, stage: &str);

    /// Informational line printed above the spinner.
    fn message(&self, msg: &str);

    /// All stages are done.
    fn finish(&self);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn stage(&self, _stage: &str) {}
    fn message(&self, _msg: &str) {}
    fn finish(&self) {}
}

/// Spinner backed by `indicatif` for CLI use.
#[derive(Debug)]
pub struct SpinnerReporter {
    bar: ProgressBar,
}

impl Default for SpinnerReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinnerReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} ({elapsed})") {
            bar.set_style(style);
        }
        Self { bar }
    }

    /// A spinner that draws nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressReporter for SpinnerReporter {
    fn stage(&self, stage: &str) {
        self.bar.set_message(stage.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_is_silent() {
        let reporter = NoopReporter;
        reporter.stage("generating");
        reporter.message("hello");
        reporter.finish();
    }

    #[test]
    fn hidden_spinner_lifecycle() {
        let reporter = SpinnerReporter::hidden();
        reporter.stage("resolving garment images");
        reporter.stage("generating preview");
        reporter.message("done");
        reporter.finish();
    }
}
