//! Prometheus push gateway client.

use anyhow::{Context, Result, anyhow};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};

use crate::fetch::HttpClient;
use crate::metrics::MetricsRegistry;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// `{gateway}/metrics/job/{job}`, tolerating a trailing slash on the gateway.
pub fn job_url(gateway: &str, job: &str) -> Result<Url> {
    let base = if gateway.ends_with('/') {
        gateway.to_string()
    } else {
        format!("{gateway}/")
    };
    let base = Url::parse(&base).with_context(|| format!("invalid push gateway url '{gateway}'"))?;
    let mut url = base.join("metrics/job/")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("push gateway url cannot be a base"))?
        .pop_if_empty()
        .push(job);
    Ok(url)
}

/// Replaces the job's metric group on the gateway with the current registry.
pub async fn push_metrics<C: HttpClient>(
    client: &C,
    gateway: &str,
    job: &str,
    registry: &MetricsRegistry,
) -> Result<()> {
    let mut req = Request::new(Method::PUT, job_url(gateway, job)?);
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
    *req.body_mut() = Some(registry.encode_text().into());

    let response = client
        .execute(req)
        .await
        .map_err(|e| anyhow!("Failed to send metrics: {}", e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Push gateway returned status {}: {}", status, body));
    }
    Ok(())
}
