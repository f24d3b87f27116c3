//! Paced HTTP client shared by the source connectors.
//!
//! Each connector owns one `PacedClient`, so pacing is per source: two
//! connectors never wait on each other, but two requests from the same
//! connector are always at least `min_interval` apart even when issued
//! from concurrent tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use litlink_config::SourceConfig;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::sources::SourceError;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const MAX_ERROR_BODY: usize = 300;

pub struct PacedClient {
    client: reqwest::Client,
    source: String,
    min_interval: Duration,
    timeout_secs: u64,
    max_retries: u32,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl PacedClient {
    pub fn new(source: &str, config: &SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            source: source.to_string(),
            min_interval: Duration::from_millis(config.min_interval_ms),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    /// Hold the lock across the sleep so queued callers line up behind it.
    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, SourceError> {
        let mut attempt = 0u32;
        loop {
            self.wait_turn().await;
            debug!(source = %self.source, url, attempt, "GET");

            match self.client.get(url).query(query).send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    if attempt >= self.max_retries {
                        return Err(SourceError::RateLimited {
                            source_name: self.source.clone(),
                            retry_after: wait,
                        });
                    }
                    warn!(source = %self.source, wait, "Rate limited, honouring Retry-After");
                    sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
                    return Err(SourceError::Api {
                        url: url.to_string(),
                        message: format!("HTTP {status}: {body}"),
                    });
                }
                Ok(resp) => return resp.text().await.map_err(|e| self.classify(e)),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(self.classify(e));
                    }
                    let backoff = 2u64.pow(attempt);
                    warn!(source = %self.source, error = %e, backoff, "Request failed, retrying");
                    sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let text = self.get_text(url, query).await?;
        serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn classify(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout_secs)
        } else {
            SourceError::Http(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_interval_ms: u64) -> SourceConfig {
        SourceConfig { min_interval_ms, ..SourceConfig::default() }
    }

    #[tokio::test]
    async fn test_first_request_does_not_wait() {
        let client = PacedClient::new("test", &config(500), "litlink-test").unwrap();
        let start = Instant::now();
        client.wait_turn().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_consecutive_requests_are_spaced() {
        let client = PacedClient::new("test", &config(120), "litlink-test").unwrap();
        let start = Instant::now();
        client.wait_turn().await;
        client.wait_turn().await;
        client.wait_turn().await;
        assert!(start.elapsed() >= Duration::from_millis(240));
    }
}
