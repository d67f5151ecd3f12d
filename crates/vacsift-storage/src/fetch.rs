//! Polite HTTP access to the listings and reference APIs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid JSON body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    /// Throttling, server faults, and connection trouble are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
            Self::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            Self::Decode { .. } | Self::Closed => false,
        }
    }
}

/// Exponential delays between attempts, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.base_delay
            .checked_mul(1 << doublings)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub retry: RetryPolicy,
    /// Minimum spacing between request starts. `None` disables pacing.
    pub min_interval: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            retry: RetryPolicy::default(),
            // The listings API starts serving captchas above roughly two requests a second.
            min_interval: Some(Duration::from_millis(500)),
        }
    }
}

/// Hands out request start times at least `interval` apart.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next free slot and sleep until it arrives.
    pub async fn wait_turn(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |reserved| reserved.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub body: Vec<u8>,
}

/// HTTP client shared by every source of a run.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    per_source_concurrency: usize,
    source_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
    pacer: Option<RequestPacer>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_concurrency: config.per_source_concurrency.max(1),
            source_slots: Mutex::new(HashMap::new()),
            pacer: config.min_interval.map(RequestPacer::new),
            retry: config.retry,
        })
    }

    async fn source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut slots = self.source_slots.lock().await;
        Arc::clone(
            slots
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_concurrency))),
        )
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        let source = self.source_semaphore(source_id).await;
        let _per_source = source.acquire().await.map_err(|_| FetchError::Closed)?;

        self.fetch_with_retries(url)
            .instrument(info_span!("http_fetch", %run_id, source_id, url))
            .await
    }

    /// Fetch and decode a JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<T, FetchError> {
        let response = self.fetch_bytes(run_id, source_id, url).await?;
        serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
            url: response.final_url,
            source,
        })
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut retry = 0;
        loop {
            match self.attempt(url).await {
                Err(err) if err.is_transient() && retry < self.retry.max_retries => {
                    debug!(error = %err, retry, "transient fetch failure; retrying");
                    tokio::time::sleep(self.retry.delay_before_retry(retry)).await;
                    retry += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }
        let request_error = |source: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = response.bytes().await.map_err(request_error)?.to_vec();
        Ok(FetchedResponse { final_url, body })
    }
}
