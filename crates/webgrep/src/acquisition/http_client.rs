//! Transport collaborator.
//!
//! The pipeline only ever sees the [`Fetcher`] trait. Retries, redirects and
//! TLS are whatever the underlying client does; every error surfaces as a
//! [`FetchError`] recorded against the resource.

use crate::errors::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Body and declared content type of one fetched URL.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetch a URL within a timeout.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed [`Fetcher`].
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        Ok(FetchResponse {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(err.to_string())
    }
}
