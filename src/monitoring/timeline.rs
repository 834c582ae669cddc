//! Step Timeline
//!
//! Tracks when each step of a workflow run was dispatched and when it
//! finished, for the report logged at the end of the run.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// How a step span ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOutcome {
    Completed,
    Failed,
}

/// One dispatch of a step.
#[derive(Debug, Clone)]
pub struct StepSpan {
    pub step: String,
    pub started: Instant,
    /// End time and outcome, once the step finished
    pub finished: Option<(Instant, SpanOutcome)>,
}

impl StepSpan {
    pub fn duration(&self) -> Option<Duration> {
        self.finished
            .map(|(end, _)| end.duration_since(self.started))
    }
}

/// Spans of every step dispatched during one run, in dispatch order.
///
/// A step visited twice gets two spans.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    spans: Vec<StepSpan>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Opens a span for a step.
    pub fn start(&mut self, step: impl Into<String>) {
        self.spans.push(StepSpan {
            step: step.into(),
            started: Instant::now(),
            finished: None,
        });
    }

    /// Closes the most recent open span of `step`.
    pub fn finish(&mut self, step: &str, outcome: SpanOutcome) {
        if let Some(span) = self
            .spans
            .iter_mut()
            .rev()
            .find(|span| span.step == step && span.finished.is_none())
        {
            span.finished = Some((Instant::now(), outcome));
        }
    }

    pub fn spans(&self) -> &[StepSpan] {
        &self.spans
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Renders one line per span: offset from the run start, duration and
    /// outcome.
    pub fn report(&self) -> String {
        let mut output = String::from("Step timeline:\n");

        for span in &self.spans {
            let offset = span.started.duration_since(self.start_time).as_millis();
            let status = match span.finished {
                Some((_, SpanOutcome::Completed)) => "completed",
                Some((_, SpanOutcome::Failed)) => "failed",
                None => "unfinished",
            };
            let duration = span
                .duration()
                .map(|d| format!("{} ms", d.as_millis()))
                .unwrap_or_else(|| "-".to_string());

            let _ = writeln!(
                output,
                "  {:16} +{:>8} ms {:>12}  {}",
                truncate(&span.step, 16),
                offset,
                duration,
                status
            );
        }

        let _ = write!(output, "  Total: {} ms", self.elapsed().as_millis());
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.spans().is_empty());
    }

    #[test]
    fn test_span_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.start("a");
        thread::sleep(Duration::from_millis(20));
        timeline.finish("a", SpanOutcome::Completed);

        let span = &timeline.spans()[0];
        assert!(span.duration().unwrap() >= Duration::from_millis(20));
        assert_eq!(span.finished.unwrap().1, SpanOutcome::Completed);
    }

    #[test]
    fn test_revisited_step_gets_new_span() {
        let mut timeline = ExecutionTimeline::new();
        timeline.start("a");
        timeline.finish("a", SpanOutcome::Completed);
        timeline.start("a");
        timeline.finish("a", SpanOutcome::Failed);

        assert_eq!(timeline.spans().len(), 2);
        assert_eq!(timeline.spans()[0].finished.unwrap().1, SpanOutcome::Completed);
        assert_eq!(timeline.spans()[1].finished.unwrap().1, SpanOutcome::Failed);
    }

    #[test]
    fn test_finish_unknown_step_is_ignored() {
        let mut timeline = ExecutionTimeline::new();
        timeline.start("a");
        timeline.finish("b", SpanOutcome::Completed);

        assert!(timeline.spans()[0].finished.is_none());
        assert!(timeline.spans()[0].duration().is_none());
    }

    #[test]
    fn test_report() {
        let mut timeline = ExecutionTimeline::new();
        timeline.start("drain");
        timeline.finish("drain", SpanOutcome::Completed);
        timeline.start("a-step-with-a-very-long-name");

        let report = timeline.report();
        assert!(report.contains("drain"));
        assert!(report.contains("completed"));
        assert!(report.contains("unfinished"));
        assert!(report.contains("a-step-with-a..."));
        assert!(report.contains("Total:"));
    }

    #[test]
    fn test_timeline_elapsed() {
        let timeline = ExecutionTimeline::default();
        thread::sleep(Duration::from_millis(20));
        assert!(timeline.elapsed().as_millis() >= 20);
    }
}
