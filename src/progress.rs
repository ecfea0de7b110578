//! Human-readable progress lines for verbose mode.

use colored::Colorize;

use crate::events::{EventEnvelope, EventSink, SequenceEvent};

/// Renders color-coded progress lines with an ISO timestamp and a `+Δs`
/// offset from the start of the run. Installed automatically when
/// `SequenceConfig::verbose` is set; advisory only.
#[derive(Default)]
pub struct ProgressSink;

impl ProgressSink {
    pub fn new() -> Self {
        Self
    }

    fn line(event: &SequenceEvent) -> Option<String> {
        let line = match event {
            SequenceEvent::SequenceStarted { task_count } => {
                let label = format!("sequence started ({task_count} tasks)");
                format!("{} {}", "▶".blue().bold(), label.as_str().bold())
            }
            SequenceEvent::SequenceFinished {
                ok: true,
                failed,
                duration_ms,
            } => format!(
                "{} sequence finished in {}ms ({} failed)",
                "✓".green().bold(),
                duration_ms,
                failed
            ),
            SequenceEvent::SequenceFinished {
                ok: false,
                duration_ms,
                ..
            } => format!(
                "{} sequence aborted after {}ms",
                "✗".red().bold(),
                duration_ms
            ),
            SequenceEvent::TaskStarted { id, .. } => {
                format!("{} task {} started", "▶".blue(), id.as_str().bold())
            }
            SequenceEvent::TaskAttemptFailed {
                id,
                attempt,
                message,
            } => format!(
                "{} task {} attempt {} failed: {}",
                "!".yellow().bold(),
                id.as_str().bold(),
                attempt,
                message.as_str().yellow()
            ),
            SequenceEvent::TaskSucceeded { id, duration_ms } => format!(
                "{} task {} succeeded in {}ms",
                "✓".green().bold(),
                id.as_str().bold(),
                duration_ms
            ),
            SequenceEvent::TaskFailed {
                id,
                attempts,
                message,
            } => format!(
                "{} task {} failed after {} attempts: {}",
                "✗".red().bold(),
                id.as_str().bold(),
                attempts,
                message.as_str().red()
            ),
            SequenceEvent::TaskSkipped { id } => {
                format!("{} task {} skipped", "-".dimmed(), id.as_str().bold())
            }
            // Span pairs are for trace consumers, not the console.
            SequenceEvent::SpanOpened { .. } | SequenceEvent::SpanClosed { .. } => return None,
        };
        Some(line)
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, envelope: &EventEnvelope) {
        if let Some(line) = Self::line(&envelope.event) {
            let stamp = envelope
                .timestamp
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string();
            let offset = format!("+{:.2}s", envelope.at_ms as f64 / 1000.0);
            println!("{} {} {}", stamp.as_str().dimmed(), offset.as_str().dimmed(), line);
        }
    }
}
