//! Structured reporting from the generator. Stages don't log directly for
//! anything a caller might want to inspect; they record events on a
//! [Diagnostics] sink that's passed in to them.

use derive_more::Display;
use log::{debug, error, info, warn};
use std::path::PathBuf;

/// Something worth reporting that happened during generation
#[derive(Clone, Debug, Display, PartialEq)]
pub enum DiagnosticEvent {
    #[display(
        fmt = "region ({}, {}): {} took {} ms",
        "region.0",
        "region.1",
        stage,
        elapsed_ms
    )]
    StageCompleted {
        region: (i32, i32),
        stage: String,
        elapsed_ms: u128,
    },

    #[display(fmt = "skipped step {}: {}", step, reason)]
    StepSkipped { step: String, reason: String },

    #[display(fmt = "step {} failed: {}", step, error)]
    StepFailed { step: String, error: String },

    #[display(fmt = "{} = {}", name, value)]
    Metric { name: String, value: f64 },

    #[display(
        fmt = "region ({}, {}) failed: {}",
        "region.0",
        "region.1",
        error
    )]
    RegionFailed { region: (i32, i32), error: String },

    #[display(fmt = "failed to write {}: {}", "path.display()", error)]
    ExportFailed { path: PathBuf, error: String },
}

/// A sink for [DiagnosticEvent]s. Passed by mutable reference into each
/// stage that reports anything.
pub trait Diagnostics {
    fn record(&mut self, event: DiagnosticEvent);
}

/// Turns every event into a log line
#[derive(Copy, Clone, Debug, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn record(&mut self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::StageCompleted { .. } => debug!("{}", event),
            DiagnosticEvent::Metric { .. } => info!("{}", event),
            DiagnosticEvent::StepSkipped { .. }
            | DiagnosticEvent::StepFailed { .. } => warn!("{}", event),
            DiagnosticEvent::RegionFailed { .. }
            | DiagnosticEvent::ExportFailed { .. } => error!("{}", event),
        }
    }
}

/// Keeps every event in memory, for inspection after the fact
#[derive(Clone, Debug, Default)]
pub struct CollectingDiagnostics {
    pub events: Vec<DiagnosticEvent>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All failed steps, as `(step, error)`
    pub fn failed_steps(&self) -> Vec<(&str, &str)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::StepFailed { step, error } => {
                    Some((step.as_str(), error.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// All skipped steps, as `(step, reason)`
    pub fn skipped_steps(&self) -> Vec<(&str, &str)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::StepSkipped { step, reason } => {
                    Some((step.as_str(), reason.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Stage names in the order they completed
    pub fn stages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::StageCompleted { stage, .. } => {
                    Some(stage.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// The most recent value recorded for a metric
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.events.iter().rev().find_map(|event| match event {
            DiagnosticEvent::Metric { name: n, value } if n == name => {
                Some(*value)
            }
            _ => None,
        })
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn record(&mut self, event: DiagnosticEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting() {
        let mut diagnostics = CollectingDiagnostics::new();
        diagnostics.record(DiagnosticEvent::Metric {
            name: "sink_count".into(),
            value: 3.0,
        });
        diagnostics.record(DiagnosticEvent::StepFailed {
            step: "2:terracing".into(),
            error: "boom".into(),
        });
        diagnostics.record(DiagnosticEvent::Metric {
            name: "sink_count".into(),
            value: 5.0,
        });
        assert_eq!(diagnostics.metric("sink_count"), Some(5.0));
        assert_eq!(diagnostics.metric("river_cells"), None);
        assert_eq!(diagnostics.failed_steps(), vec![("2:terracing", "boom")]);
    }

    #[test]
    fn test_display() {
        let event = DiagnosticEvent::RegionFailed {
            region: (-1, 2),
            error: "oops".into(),
        };
        assert_eq!(event.to_string(), "region (-1, 2) failed: oops");
    }
}
