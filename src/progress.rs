//! Indexing progress reporting.
//!
//! The pipeline reports a stage label and an optional completion fraction
//! in `0.0..=1.0` as it moves through each source. Built-in reporters
//! write to **stderr** so stdout remains parseable for scripts; an
//! embedder can plug in its own with [`CallbackProgress`].

use std::io::Write;

/// Stage of the indexing pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Remote content is being downloaded (gists, repository trees).
    Fetching,
    Chunking,
    Embedding,
    Saving,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Saving => "saving",
            Stage::Complete => "complete",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Fraction of the current operation done, when known.
    pub fraction: Option<f64>,
    /// Item being worked on (file path, gist id, ...).
    pub label: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, fraction: Option<f64>) -> Self {
        Self {
            stage,
            fraction: fraction.map(|f| f.clamp(0.0, 1.0)),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Receives progress events from the indexing pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index src/lib.rs  embedding  40%".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let mut line = String::from("index");
        if let Some(ref label) = event.label {
            line.push(' ');
            line.push_str(label);
        }
        line.push_str("  ");
        line.push_str(event.stage.as_str());
        if let Some(fraction) = event.fraction {
            line.push_str(&format!("  {}%", format_percent(fraction)));
        }
        line.push('\n');
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage.as_str(),
            "fraction": event.fraction,
            "label": event.label,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards every event to a closure.
pub struct CallbackProgress<F>(pub F);

impl<F> ProgressReporter for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

fn format_percent(fraction: f64) -> u32 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Progress mode: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum ProgressMode {
    #[default]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn format_percent_rounds() {
        assert_eq!(format_percent(0.0), 0);
        assert_eq!(format_percent(0.404), 40);
        assert_eq!(format_percent(1.0), 100);
        assert_eq!(format_percent(3.0), 100);
    }

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(ProgressEvent::new(Stage::Saving, Some(1.5)).fraction, Some(1.0));
        assert_eq!(ProgressEvent::new(Stage::Saving, None).fraction, None);
    }

    #[test]
    fn callback_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = CallbackProgress(move |e: ProgressEvent| sink.lock().push(e.stage));
        reporter.report(ProgressEvent::new(Stage::Chunking, None));
        reporter.report(ProgressEvent::new(Stage::Complete, Some(1.0)).with_label("x"));
        assert_eq!(*seen.lock(), vec![Stage::Chunking, Stage::Complete]);
    }
}
