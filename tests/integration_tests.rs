use std::sync::Arc;
use std::time::{Duration, Instant};

use gtfs_rt_miner::dispatch::TelemetryDispatcher;
use gtfs_rt_miner::error::RunError;
use gtfs_rt_miner::fetch::auth::{ApiKey, UrlParam};
use gtfs_rt_miner::fetch::{BasicClient, FeedFetcher};
use gtfs_rt_miner::metrics::MetricsRegistry;
use gtfs_rt_miner::parser::FeedDocument;
use gtfs_rt_miner::pipeline::{PipelineRunner, RunState, RunTarget};
use gtfs_rt_miner::push::push_metrics;
use gtfs_rt_miner::telemetry::{Position, VehicleTelemetry};
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::net::TcpListener;

const FEED: &str = include_str!("fixtures/vehicle_positions.json");

// Nothing listens on port 1, so every request fails to connect.
const CLOSED_SINK: &str = "http://127.0.0.1:1/telemetry";

fn vehicle() -> VehicleTelemetry {
    VehicleTelemetry {
        source: "testing".to_string(),
        trip_id: "1".to_string(),
        route_id: "1".to_string(),
        vehicle_id: "1".to_string(),
        status: "testing".to_string(),
        timestamp: 123456,
        position: Position::new(12345.0, -12345.0),
    }
}

fn runner(
    metrics: &Arc<MetricsRegistry>,
    feed_url: String,
    sink_url: String,
) -> PipelineRunner<BasicClient, BasicClient> {
    PipelineRunner::new(
        BasicClient::new(),
        BasicClient::new(),
        metrics.clone(),
        RunTarget {
            source: "KingCounty".to_string(),
            feed_url,
            sink_url,
        },
    )
}

#[tokio::test]
async fn test_full_pipeline_skips_malformed_entity() {
    let mut server = Server::new_async().await;
    let feed = server
        .mock("GET", "/vehicles.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(FEED)
        .create_async()
        .await;
    let sink = server
        .mock("POST", "/telemetry")
        .match_header("content-type", "application/json")
        .with_status(201)
        .expect(2)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let mut runner = runner(
        &metrics,
        format!("{}/vehicles.json", server.url()),
        format!("{}/telemetry", server.url()),
    );

    let report = runner.run().await.expect("run should finish");

    feed.assert_async().await;
    sink.assert_async().await;
    assert_eq!(runner.state(), RunState::Finalized);
    assert_eq!(report.state, RunState::Finalized);
    assert_eq!(report.entities, 3);
    assert_eq!(report.extracted, 2);
    assert_eq!(report.extraction_failures, 1);
    assert_eq!(report.delivered, 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["record_extraction_fail_total"], 1.0);
    assert_eq!(snapshot["record_count_total"], 2.0);
    assert_eq!(snapshot["record_extraction_seconds_count"], 3.0);
    assert_eq!(snapshot["telemetry_push_attempts_total"], 2.0);
    assert_eq!(snapshot["telemetry_server_push_seconds_count"], 1.0);
    assert_eq!(snapshot["record_sent_fail_total"], 0.0);
    // the malformed entity is the only instrumented error
    assert_eq!(snapshot["exceptions_total"], 1.0);
    assert!(snapshot["mining_last_run"] > 0.0);
}

#[tokio::test]
async fn test_records_extracted_is_per_run() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/vehicles.json")
        .with_body(FEED)
        .expect(2)
        .create_async()
        .await;
    let _sink = server
        .mock("POST", "/telemetry")
        .with_status(200)
        .expect(4)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let mut runner = runner(
        &metrics,
        format!("{}/vehicles.json", server.url()),
        format!("{}/telemetry", server.url()),
    );
    runner.run().await.unwrap();
    runner.run().await.unwrap();

    assert_eq!(metrics.records_extracted.get(), 2.0);
    assert_eq!(metrics.extraction_failures.get(), 2);
    assert_eq!(metrics.dispatch_attempts.get(), 4);
}

#[tokio::test]
async fn test_empty_feed_fails_run_but_records_metrics() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/vehicles.json")
        .with_body(r#"{"header": {"gtfs_realtime_version": "2.0"}, "entity": []}"#)
        .create_async()
        .await;
    let sink = server
        .mock("POST", "/telemetry")
        .expect(0)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    metrics.fetch_duration.set(-1.0);
    let mut runner = runner(
        &metrics,
        format!("{}/vehicles.json", server.url()),
        format!("{}/telemetry", server.url()),
    );

    assert_eq!(runner.run().await, Err(RunError::NoEntities));

    sink.assert_async().await;
    assert_eq!(runner.state(), RunState::Failed);
    assert!(metrics.last_run.get() > 0.0);
    assert!(metrics.fetch_duration.get() >= 0.0);
    assert_eq!(metrics.unhandled_errors.get(), 1);
}

#[tokio::test]
async fn test_fetch_error_status_degrades_to_empty_document() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/vehicles.json")
        .with_status(503)
        .with_body(FEED)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let fetcher = FeedFetcher::new(BasicClient::new(), metrics.clone());

    let document = fetcher.fetch(&format!("{}/vehicles.json", server.url())).await;
    assert_eq!(document, FeedDocument::empty());
}

#[tokio::test]
async fn test_fetch_undecodable_body_degrades_to_empty_document() {
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/vehicles.pb")
        .with_body(vec![0xFF, 0xFE, 0x00, 0x01])
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let fetcher = FeedFetcher::new(BasicClient::new(), metrics.clone());

    let document = fetcher.fetch(&format!("{}/vehicles.pb", server.url())).await;
    assert!(document.entities().is_empty());
}

#[tokio::test]
async fn test_dispatch_vehicle_list() {
    let mut server = Server::new_async().await;
    let sink = server
        .mock("POST", "/")
        .with_status(200)
        .expect(100)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics.clone());
    let records = vec![vehicle(); 100];

    let count = dispatcher.dispatch(&records, &format!("{}/", server.url())).await;

    sink.assert_async().await;
    assert_eq!(count, 100);
    assert_eq!(metrics.dispatch_attempts.get(), 100);
    assert_eq!(metrics.dispatch_failures.get(), 0);
}

#[tokio::test]
async fn test_dispatch_wire_format() {
    let mut server = Server::new_async().await;
    let sink = server
        .mock("POST", "/")
        .match_body(Matcher::Json(json!({
            "source": "testing",
            "tripId": "1",
            "routeId": "1",
            "objectId": "1",
            "vehicleId": "1",
            "status": "testing",
            "timestamp": 123456,
            "position": {"longitude": 12345.0, "latitude": -12345.0}
        })))
        .with_status(200)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics);

    assert_eq!(dispatcher.dispatch(&[vehicle()], &format!("{}/", server.url())).await, 1);
    sink.assert_async().await;
}

#[tokio::test]
async fn test_dispatch_request_exception() {
    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics.clone());
    let records = vec![vehicle(); 100];

    let count = dispatcher.dispatch(&records, CLOSED_SINK).await;

    assert_eq!(count, 0);
    assert_eq!(metrics.dispatch_attempts.get(), 100);
    assert_eq!(metrics.dispatch_failures.get(), 100);
}

#[tokio::test]
async fn test_dispatch_rejected_status_is_failure() {
    let mut server = Server::new_async().await;
    let _redirect = server
        .mock("POST", "/moved")
        .with_status(304)
        .create_async()
        .await;
    let _error = server
        .mock("POST", "/broken")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics.clone());
    let records = vec![vehicle(); 3];

    let moved = format!("{}/moved", server.url());
    assert_eq!(dispatcher.dispatch(&records, &moved).await, 0);
    let broken = format!("{}/broken", server.url());
    assert_eq!(dispatcher.dispatch(&records, &broken).await, 0);

    assert_eq!(metrics.dispatch_attempts.get(), 6);
    assert_eq!(metrics.dispatch_failures.get(), 6);
    assert_eq!(metrics.dispatch_duration.count(), 2);
}

#[tokio::test]
async fn test_dispatch_redirect_is_failure() {
    let mut server = Server::new_async().await;
    let _found = server
        .mock("POST", "/found")
        .with_status(302)
        .with_header("location", "/elsewhere")
        .create_async()
        .await;
    let _temporary = server
        .mock("POST", "/temporary")
        .with_status(307)
        .with_header("location", "/elsewhere")
        .create_async()
        .await;
    let elsewhere_get = server
        .mock("GET", "/elsewhere")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;
    let elsewhere_post = server
        .mock("POST", "/elsewhere")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let client = BasicClient::without_redirects().unwrap();
    let dispatcher = TelemetryDispatcher::new(client, metrics.clone());
    let records = vec![vehicle(); 2];

    let found = format!("{}/found", server.url());
    assert_eq!(dispatcher.dispatch(&records, &found).await, 0);
    let temporary = format!("{}/temporary", server.url());
    assert_eq!(dispatcher.dispatch(&records, &temporary).await, 0);

    elsewhere_get.assert_async().await;
    elsewhere_post.assert_async().await;
    assert_eq!(metrics.dispatch_attempts.get(), 4);
    assert_eq!(metrics.dispatch_failures.get(), 4);
}

#[tokio::test]
async fn test_dispatch_times_out_each_record() {
    // Accepts connections and holds them open without ever answering.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });

    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics.clone());
    let records = vec![vehicle(); 2];

    let start = Instant::now();
    let sink = format!("http://{addr}/telemetry");
    let count = dispatcher.dispatch(&records, &sink).await;
    let elapsed = start.elapsed();
    silent.abort();

    assert_eq!(count, 0);
    assert_eq!(metrics.dispatch_attempts.get(), 2);
    assert_eq!(metrics.dispatch_failures.get(), 2);
    assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

#[tokio::test]
async fn test_one_failure_does_not_affect_others() {
    let mut server = Server::new_async().await;
    let _rejected = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"vehicleId": "bad"})))
        .with_status(400)
        .create_async()
        .await;
    let _accepted = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"vehicleId": "1"})))
        .with_status(202)
        .expect(2)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let dispatcher = TelemetryDispatcher::new(BasicClient::new(), metrics.clone());
    let mut bad = vehicle();
    bad.vehicle_id = "bad".to_string();
    let records = vec![vehicle(), bad, vehicle()];

    assert_eq!(dispatcher.dispatch(&records, &format!("{}/", server.url())).await, 2);
    assert_eq!(metrics.dispatch_attempts.get(), 3);
    assert_eq!(metrics.dispatch_failures.get(), 1);
}

#[tokio::test]
async fn test_feed_api_key_header() {
    let mut server = Server::new_async().await;
    let feed = server
        .mock("GET", "/vehicles.json")
        .match_header("x-api-key", "secret")
        .with_body(FEED)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let client = ApiKey::new(BasicClient::new(), "x-api-key", "secret").unwrap();
    let fetcher = FeedFetcher::new(client, metrics);

    let document = fetcher.fetch(&format!("{}/vehicles.json", server.url())).await;

    feed.assert_async().await;
    assert_eq!(document.entities().len(), 3);
}

#[tokio::test]
async fn test_feed_api_key_url_param() {
    let mut server = Server::new_async().await;
    let feed = server
        .mock("GET", "/vehicles.json")
        .match_query(Matcher::UrlEncoded("api_key".into(), "secret".into()))
        .with_body(FEED)
        .create_async()
        .await;

    let metrics = Arc::new(MetricsRegistry::new());
    let client = UrlParam::new(BasicClient::new(), "api_key", "secret");
    let fetcher = FeedFetcher::new(client, metrics);

    let document = fetcher.fetch(&format!("{}/vehicles.json", server.url())).await;

    feed.assert_async().await;
    assert_eq!(document.entities().len(), 3);
}

#[tokio::test]
async fn test_push_metrics() {
    let mut server = Server::new_async().await;
    let gateway = server
        .mock("PUT", "/metrics/job/data_miner_king_county")
        .match_header("content-type", "text/plain; version=0.0.4")
        .match_body(Matcher::Regex("record_sent_fail_total 2\n".to_string()))
        .with_status(200)
        .create_async()
        .await;

    let metrics = MetricsRegistry::new();
    metrics.dispatch_failures.inc_by(2);

    push_metrics(&BasicClient::new(), &server.url(), "data_miner_king_county", &metrics)
        .await
        .unwrap();
    gateway.assert_async().await;
}

#[tokio::test]
async fn test_push_metrics_error_status() {
    let mut server = Server::new_async().await;
    let _gateway = server
        .mock("PUT", "/metrics/job/job")
        .with_status(500)
        .create_async()
        .await;

    let metrics = MetricsRegistry::new();
    let result = push_metrics(&BasicClient::new(), &server.url(), "job", &metrics).await;
    assert!(result.is_err());
}
