//! Outbound HTTP.
//!
//! One shared async client with an explicit User-Agent. Every failure maps to
//! the `TransientFetch` error kind; callers collect those per URL instead of
//! failing their batch.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT as UA_HEADER};
use std::time::Duration;

use truthledger_model::{LedgerError, LedgerResult};

use crate::USER_AGENT;

/// Refuse bodies larger than this many bytes.
const MAX_BODY_BYTES: usize = 2_000_000;

/// A fetched page body plus the response metadata callers care about.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Async page fetcher shared by the ingestor and the feed fetcher.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new() -> LedgerResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            UA_HEADER,
            HeaderValue::from_static(USER_AGENT),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html, application/xhtml+xml, application/xml;q=0.9, */*;q=0.8",
            ),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LedgerError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// GET a URL with a per-request timeout.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> LedgerResult<FetchedPage> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LedgerError::TransientFetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::TransientFetch(format!(
                "{url}: http status {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(len) = response.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(LedgerError::TransientFetch(format!(
                    "{url}: content-length {len} exceeds cap"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LedgerError::TransientFetch(format!("{url}: failed to read body: {e}")))?;
        if bytes.len() > MAX_BODY_BYTES {
            return Err(LedgerError::TransientFetch(format!(
                "{url}: body size {} exceeds cap",
                bytes.len()
            )));
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body: String::from_utf8_lossy(&bytes).to_string(),
        })
    }
}
