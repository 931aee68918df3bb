//! HTTP client for the plate-recognition service

use async_trait::async_trait;
use serde::Deserialize;

use super::{EventQuery, FeedError, FeedResult, PlateEvent, SensorFeed};
use crate::config::FeedConfig;

const EVENTS_PATH: &str = "/internal/anpr/events";

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    data: Vec<PlateEvent>,
}

/// `GET {base}/internal/anpr/events` with an internal service token.
///
/// Each call makes exactly one request; retrying is left to
/// [`fetch_with_retry`](super::fetch_with_retry).
pub struct HttpSensorFeed {
    base_url: String,
    internal_token: String,
    client: reqwest::Client,
}

impl HttpSensorFeed {
    pub fn new(config: &FeedConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FeedError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            internal_token: config.internal_token.clone(),
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }
}

#[async_trait]
impl SensorFeed for HttpSensorFeed {
    async fn entry_events(&self, query: &EventQuery) -> FeedResult<Vec<PlateEvent>> {
        if !self.is_configured() {
            return Err(FeedError::NotConfigured);
        }
        if query.plate.is_empty() {
            return Err(FeedError::InvalidPlate(query.plate.clone()));
        }

        let url = format!("{}{}", self.base_url, EVENTS_PATH);
        let start = query.start.to_rfc3339();
        let end = query.end.to_rfc3339();
        let mut request = self.client.get(&url).query(&[
            ("plate", query.plate.as_str()),
            ("start_time", start.as_str()),
            ("end_time", end.as_str()),
            ("direction", "entry"),
        ]);
        if !self.internal_token.is_empty() {
            request = request.header("X-Internal-Token", &self.internal_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status { code, body });
        }

        let parsed: EventsResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(parsed.data)
    }
}
