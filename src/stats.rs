use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RunError;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{RunReport, RunState};

/// One row of run history.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub state: String,

    // run counts
    pub entities: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    pub duration_secs: f64,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunSummary {
    /// Summary of a finished run. Delivery failures come from the registry,
    /// since the report only carries successes.
    pub fn from_report(
        report: &RunReport,
        before: &MetricsSnapshot,
        after: &MetricsSnapshot,
    ) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            state: report.state.to_string(),
            entities: report.entities,
            extracted: report.extracted,
            extraction_failures: report.extraction_failures,
            delivered: report.delivered,
            delivery_failures: Self::delta(before, after, "record_sent_fail_total") as usize,
            duration_secs: report.elapsed.as_secs_f64(),
            ..Default::default()
        }
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error: &RunError, after: &MetricsSnapshot) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            state: RunState::Failed.to_string(),
            duration_secs: after.get("mining_duration_seconds").copied().unwrap_or_default(),
            error_type: Some(error.code().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Set the feed source name
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    fn delta(before: &MetricsSnapshot, after: &MetricsSnapshot, name: &str) -> f64 {
        let read = |s: &MetricsSnapshot| s.get(name).copied().unwrap_or_default();
        read(after) - read(before)
    }
}
