//! Feed retrieval.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::sync::Arc;

use tracing::{error, info};

use crate::error::FetchError;
use crate::metrics::MetricsRegistry;
use crate::parser::{FeedDocument, parse_feed};

/// GETs `url` and returns the body, rejecting non-2xx responses.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>, FetchError> {
    let url = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await.map_err(FetchError::Transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(resp.bytes().await.map_err(FetchError::Transport)?.to_vec())
}

/// Retrieves the upstream feed. Never fails: any problem is logged and
/// yields [`FeedDocument::empty`].
pub struct FeedFetcher<C> {
    client: C,
    metrics: Arc<MetricsRegistry>,
}

impl<C: HttpClient> FeedFetcher<C> {
    pub fn new(client: C, metrics: Arc<MetricsRegistry>) -> Self {
        Self { client, metrics }
    }

    /// Fetches and decodes the feed, setting `data_download_seconds` on
    /// every exit path.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> FeedDocument {
        let timer = self.metrics.fetch_duration.start_timer();
        info!("Getting data");

        let result = self.try_fetch(url).await;
        let elapsed = timer.stop();

        match result {
            Ok(document) => {
                info!(elapsed_secs = elapsed, "Downloaded data set");
                document
            }
            Err(e) => {
                error!(error = %e, elapsed_secs = elapsed, "Could not get data");
                FeedDocument::empty()
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let bytes = fetch_bytes(&self.client, url).await?;
        parse_feed(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
