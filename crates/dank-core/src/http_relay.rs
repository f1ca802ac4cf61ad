#![cfg(feature = "http-relay")]

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;

use crate::relay::{Relay, RelayError};
use crate::wire::{format_timestamp, PublishMessageRequest, PublishedKey, StoredMessage};

/// [`Relay`] over the relay's JSON HTTP API.
#[derive(Clone)]
pub struct HttpRelayClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RelayError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn status_error(resp: reqwest::Response) -> RelayError {
        let status = resp.status();
        let detail = format!("status={} body={:?}", status, resp.text().await.ok());
        if status == StatusCode::SERVICE_UNAVAILABLE {
            RelayError::Unavailable(detail)
        } else if status.is_client_error() {
            RelayError::Rejected(detail)
        } else {
            RelayError::BadResponse(detail)
        }
    }
}

#[async_trait]
impl Relay for HttpRelayClient {
    async fn publish(&self, request: &PublishMessageRequest) -> Result<(), RelayError> {
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(resp).await)
        }
    }

    async fn list_keys(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<PublishedKey>, RelayError> {
        let url = format!("{}/keys", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[("since", format_timestamp(&since)), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| RelayError::Http(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(Self::status_error(resp).await);
        }
        resp.json::<Vec<PublishedKey>>()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))
    }

    async fn fetch_messages(&self, search_index: &[u8; 32]) -> Result<Vec<StoredMessage>, RelayError> {
        let url = format!("{}/messages/{}", self.base_url, hex::encode(search_index));
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Http(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => resp
                .json::<Vec<StoredMessage>>()
                .await
                .map_err(|e| RelayError::Decode(e.to_string())),
            // Some deployments answer 404 for an index nobody wrote to
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(Self::status_error(resp).await),
        }
    }
}
