//! Outbound HTTP
//!
//! A small GET client used by download scripts and remote file entities. Connection
//! failures and timeouts are retried a bounded number of times; everything else surfaces
//! straight away.

use crate::config::HttpConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A response body, parsed when it is JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchBody {
    Json(Value),
    Bytes(Vec<u8>),
}

impl FetchBody {
    pub fn into_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            FetchBody::Json(value) => serde_json::to_vec(&value),
            FetchBody::Bytes(bytes) => Ok(bytes),
        }
    }

    /// The body as JSON, parsing raw bytes if needed.
    pub fn into_json(self) -> Result<Value, serde_json::Error> {
        match self {
            FetchBody::Json(value) => Ok(value),
            FetchBody::Bytes(bytes) => serde_json::from_slice(strip_bom(&bytes)),
        }
    }
}

/// HTTP GET collaborator
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str, accept: Option<&str>) -> Result<FetchBody, FetchError>;
}

pub struct ReqwestFetcher {
    client: Client,
    retries: u32,
    retry_delay: Duration,
}

impl ReqwestFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FetchError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    async fn get_once(&self, url: &str, accept: Option<&str>) -> Result<FetchBody, FetchError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send().await.map_err(|e| map_http_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
            || accept.map(|a| a.contains("json")).unwrap_or(false);

        let bytes = response.bytes().await.map_err(|e| map_http_error(url, e))?;
        let body = strip_bom(&bytes);
        if is_json {
            serde_json::from_slice(body)
                .map(FetchBody::Json)
                .map_err(|e| FetchError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        } else {
            Ok(FetchBody::Bytes(body.to_vec()))
        }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str, accept: Option<&str>) -> Result<FetchBody, FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, accept).await {
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %err, "Transient fetch failure, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                result => {
                    debug!(url, attempts = attempt + 1, ok = result.is_ok(), "Fetch finished");
                    return result;
                }
            }
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

fn map_http_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() || is_connection_reset(&error) {
        FetchError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else if error.is_body() || error.is_decode() {
        FetchError::Body {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        FetchError::Other(format!("{}: {}", url, error))
    }
}

fn is_connection_reset(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}
