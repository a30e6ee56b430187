const BASE_DELAY_MS: u64 = 100;
const BODY_PREVIEW_CHARS: usize = 200;

use crate::config::BackendConfig;
use crate::metrics_defs::{BACKEND_FETCH_DURATION, BACKEND_RETRIES};
use crate::types::Region;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use shared::{counter, histogram};
use std::time::Instant;
use tokio::time::{Duration, sleep};

const PUBLISHABLE_KEY_HEADER: &str = "x-publishable-api-key";

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

#[derive(Deserialize)]
struct RegionList {
    #[serde(default)]
    regions: Option<Vec<Region>>,
}

#[derive(Deserialize)]
struct SingleRegion {
    region: Region,
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid publishable key header value")]
    InvalidKey,
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("invalid JSON response from backend: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("No regions found. Please set up regions in your Medusa Admin.")]
    NoRegions,
}

/// Client for the store region endpoints of the commerce backend.
#[derive(Clone)]
pub struct Backend {
    client: reqwest::Client,
    base_url: Url,
    retries: u32,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            PUBLISHABLE_KEY_HEADER,
            HeaderValue::from_str(&config.publishable_key).map_err(|_| BackendError::InvalidKey)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Url::join drops the last path segment unless it ends with a slash
        let mut base_url = config.url.clone();
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        Ok(Backend {
            client,
            base_url,
            retries: config.retries,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))
    }

    /// Lists every region configured in the backend.
    pub async fn list_regions(&self) -> Result<Vec<Region>, BackendError> {
        let start = Instant::now();
        let url = self.endpoint("store/regions")?;
        let body = self.get_text(url).await?;

        let list: RegionList = parse_json(&body)?;
        let regions = list
            .regions
            .filter(|r| !r.is_empty())
            .ok_or(BackendError::NoRegions)?;

        histogram!(BACKEND_FETCH_DURATION).record(start.elapsed().as_secs_f64());
        tracing::debug!(count = regions.len(), "Fetched regions from backend");

        Ok(regions)
    }

    /// Fetches a single region by id. `None` when the backend does not know it.
    pub async fn retrieve_region(&self, id: &str) -> Result<Option<Region>, BackendError> {
        let mut url = self.endpoint("store/regions")?;
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl("backend URL cannot be a base".into()))?
            .push(id);

        match self.get_text(url).await {
            Ok(body) => Ok(Some(parse_json::<SingleRegion>(&body)?.region)),
            Err(BackendError::Status(StatusCode::NOT_FOUND)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_text(&self, url: Url) -> Result<String, BackendError> {
        let mut retries = 0;

        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.text().await?);
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && retries < self.retries {
                // Backoff between retries
                let retry_millis = BASE_DELAY_MS * 2_u64.pow(retries);
                tracing::debug!(%status, retry_millis, "Retrying backend request");
                counter!(BACKEND_RETRIES).increment(1);
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            return Err(BackendError::Status(status));
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        tracing::error!(error = %e, body = %preview, "Could not parse backend response");
        BackendError::InvalidJson(e)
    })
}
