//! Delivery of telemetry records to the telemetry service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};
use tracing::{debug, error, info, warn};

use crate::error::DeliveryError;
use crate::fetch::HttpClient;
use crate::metrics::MetricsRegistry;
use crate::telemetry::VehicleTelemetry;

/// Per-record POST timeout.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends telemetry one record per request, isolating failures per record.
pub struct TelemetryDispatcher<C> {
    client: C,
    metrics: Arc<MetricsRegistry>,
}

impl<C: HttpClient> TelemetryDispatcher<C> {
    pub fn new(client: C, metrics: Arc<MetricsRegistry>) -> Self {
        Self { client, metrics }
    }

    /// Sends every record to `sink_uri` in order and returns how many were
    /// accepted.
    ///
    /// Each record bumps `telemetry_push_attempts_total` and, on failure,
    /// `record_sent_fail_total`; a failed record never stops the loop.
    #[tracing::instrument(skip(self, records), fields(records = records.len()))]
    pub async fn dispatch(&self, records: &[VehicleTelemetry], sink_uri: &str) -> usize {
        let _timer = self.metrics.dispatch_duration.start_timer();
        if records.is_empty() {
            debug!("No telemetry to send");
            return 0;
        }

        let sink = Url::parse(sink_uri).map_err(|e| e.to_string());
        let mut delivered = 0;

        for vehicle in records {
            self.metrics.dispatch_attempts.inc();

            let outcome = match &sink {
                Ok(url) => self.send(vehicle, url.clone()).await,
                Err(reason) => Err(DeliveryError::InvalidSink(reason.clone())),
            };

            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(
                        source = %vehicle.source,
                        vehicle_id = %vehicle.vehicle_id,
                        error = %e,
                        "Error sending telemetry"
                    );
                    self.metrics.dispatch_failures.inc();
                }
            }
        }

        info!(delivered, failed = records.len() - delivered, "Telemetry sent");
        delivered
    }

    async fn send(&self, vehicle: &VehicleTelemetry, url: Url) -> Result<(), DeliveryError> {
        let mut req = Request::new(Method::POST, url);
        *req.timeout_mut() = Some(SEND_TIMEOUT);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(serde_json::to_vec(vehicle)?.into());

        let resp = self
            .client
            .execute(req)
            .await
            .map_err(DeliveryError::Transport)?;

        let status = resp.status();
        if status.as_u16() >= 300 {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Telemetry service rejected record");
            return Err(DeliveryError::Status(status));
        }
        Ok(())
    }
}
