//! CLI entry point for the GTFS-RT miner job.
//!
//! Runs one mining pass (fetch the feed, extract vehicle telemetry, send it to
//! the telemetry service) and then pushes the run's metrics to a Prometheus
//! push gateway. A failed run is logged, never fatal: metrics are pushed
//! either way.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gtfs_rt_miner::{
    config::{Config, FeedAuth},
    fetch::{
        BasicClient, HttpClient,
        auth::{ApiKey, UrlParam},
    },
    metrics::MetricsRegistry,
    output::{append_record, print_json},
    pipeline::{PipelineRunner, RunTarget},
    push::push_metrics,
    stats::RunSummary,
};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "gtfs_rt_miner")]
#[command(about = "Mine GTFS-RT vehicle positions into the telemetry service", long_about = None)]
struct Cli {
    /// Feed source name stamped on every record (overrides DATA_MINER_SOURCE)
    #[arg(short, long)]
    source: Option<String>,

    /// CSV file to append a run summary to
    #[arg(long, value_name = "CSV")]
    history: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_miner.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_miner.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    if let Some(source) = cli.source {
        config.source = source;
    }

    let metrics = Arc::new(MetricsRegistry::new());
    let mut runner = PipelineRunner::new(
        feed_client(&config)?,
        BasicClient::without_redirects()?,
        metrics.clone(),
        RunTarget {
            source: config.source.clone(),
            feed_url: config.data_url.clone(),
            sink_url: config.telemetry_server.clone(),
        },
    );

    let before = metrics.snapshot();
    let summary = match runner.run().await {
        Ok(report) => RunSummary::from_report(&report, &before, &metrics.snapshot()),
        Err(e) => {
            error!(error = %e, "Error running job");
            RunSummary::from_error(&e, &metrics.snapshot())
        }
    }
    .with_source(&config.source);

    if let Err(e) = print_json(&summary) {
        error!(error = %e, "Could not log run summary");
    }
    if let Some(path) = cli.history.as_deref() {
        if let Err(e) = append_record(path, &summary) {
            error!(path, error = %e, "Could not append run history");
        }
    }

    let pushed = match BasicClient::with_timeout(PUSH_TIMEOUT) {
        Ok(client) => push_metrics(&client, &config.push_gateway, &config.job, &metrics).await,
        Err(e) => Err(e),
    };
    match pushed {
        Ok(()) => info!(gateway = %config.push_gateway, "Metrics sent to push gateway"),
        Err(e) => error!(error = %e, "Could not send metrics to push gateway"),
    }

    Ok(())
}

/// Builds the feed client, wrapping it with API key authentication when the
/// feed needs it.
fn feed_client(config: &Config) -> Result<Box<dyn HttpClient>> {
    let basic = BasicClient::with_timeout(config.fetch_timeout)?;
    let client: Box<dyn HttpClient> = match &config.feed_auth {
        FeedAuth::None => Box::new(basic),
        FeedAuth::Header {
            header_name: Some(name),
            key,
        } => Box::new(ApiKey::new(basic, name, key)?),
        FeedAuth::Header {
            header_name: None,
            key,
        } => Box::new(ApiKey::bearer(basic, key)?),
        FeedAuth::UrlParam { param_name, key } => Box::new(UrlParam::new(basic, param_name, key)),
    };
    Ok(client)
}
