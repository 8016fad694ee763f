//! One mining run: fetch the feed, extract every entity, send the results.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dispatch::TelemetryDispatcher;
use crate::error::RunError;
use crate::extract::extract;
use crate::fetch::{FeedFetcher, HttpClient};
use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Extracting,
    Dispatching,
    Finalized,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Dispatching => "dispatching",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub entities: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub delivered: usize,
    pub elapsed: Duration,
}

/// Where a run reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunTarget {
    pub source: String,
    pub feed_url: String,
    pub sink_url: String,
}

pub struct PipelineRunner<F, D> {
    fetcher: FeedFetcher<F>,
    dispatcher: TelemetryDispatcher<D>,
    metrics: Arc<MetricsRegistry>,
    target: RunTarget,
    state: RunState,
}

impl<F: HttpClient, D: HttpClient> PipelineRunner<F, D> {
    pub fn new(
        feed_client: F,
        sink_client: D,
        metrics: Arc<MetricsRegistry>,
        target: RunTarget,
    ) -> Self {
        Self {
            fetcher: FeedFetcher::new(feed_client, metrics.clone()),
            dispatcher: TelemetryDispatcher::new(sink_client, metrics.clone()),
            metrics,
            target,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "Run state change");
        self.state = next;
    }

    /// Executes one run.
    ///
    /// `mining_last_run` is stamped at the start and `mining_duration_seconds`
    /// on every exit path, including failure.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::NoEntities`] when the feed holds no entities,
    /// whether because it was empty or because the fetch failed.
    #[tracing::instrument(skip(self), fields(source = %self.target.source))]
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        self.metrics.last_run.set(Utc::now().timestamp() as f64);
        self.metrics.records_extracted.set(0.0);
        let metrics = self.metrics.clone();
        let timer = metrics.run_duration.start_timer();

        let result = self.execute().await;
        let elapsed = timer.stop();

        match self.metrics.track(result) {
            Ok(mut report) => {
                self.transition(RunState::Finalized);
                report.state = RunState::Finalized;
                report.elapsed = Duration::from_secs_f64(elapsed);
                info!(elapsed_secs = elapsed, delivered = report.delivered, "Mining run finished");
                Ok(report)
            }
            Err(e) => {
                self.transition(RunState::Failed);
                warn!(elapsed_secs = elapsed, error = %e, "Mining run failed");
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<RunReport, RunError> {
        self.transition(RunState::Fetching);
        let document = self.fetcher.fetch(&self.target.feed_url).await;
        let entities = document.entities();
        info!(count = entities.len(), "Found vehicles");
        if entities.is_empty() {
            return Err(RunError::NoEntities);
        }

        self.transition(RunState::Extracting);
        let mut vehicles = Vec::with_capacity(entities.len());
        for entity in entities {
            match extract(entity, &self.target.source, &self.metrics) {
                Ok(v) => vehicles.push(v),
                Err(e) => {
                    debug!(error = %e, "Skipping entity");
                    self.metrics.extraction_failures.inc();
                }
            }
        }

        self.transition(RunState::Dispatching);
        let delivered = self
            .dispatcher
            .dispatch(&vehicles, &self.target.sink_url)
            .await;

        Ok(RunReport {
            state: self.state,
            entities: entities.len(),
            extracted: vehicles.len(),
            extraction_failures: entities.len() - vehicles.len(),
            delivered,
            elapsed: Duration::ZERO,
        })
    }
}
