use crate::apis::rate_limiter::RateLimiter;
use crate::config::RetryConfig;
use crate::error::{Result, TrackerError};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Exponential backoff schedule for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Json(Value),
    /// The upstream answered 404; openFDA uses this for "no matches"
    NotFound,
}

/// GETs JSON from one upstream with rate limiting and retry-with-backoff.
pub struct JsonFetcher {
    adapter: &'static str,
    client: reqwest::Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl JsonFetcher {
    pub fn new(
        adapter: &'static str,
        timeout: Duration,
        requests_per_min: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("violations_tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            adapter,
            client,
            limiter: RateLimiter::new(requests_per_min),
            retry,
        })
    }

    #[instrument(skip(self, query), fields(adapter = self.adapter))]
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<FetchOutcome> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;
            let mut retry_after: Option<Duration> = None;

            let failure = match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.json::<Value>().await {
                            Ok(body) => {
                                crate::metrics::ingest::request(self.adapter, "ok");
                                return Ok(FetchOutcome::Json(body));
                            }
                            Err(e) => format!("unreadable JSON body: {e}"),
                        }
                    } else if status == StatusCode::NOT_FOUND {
                        crate::metrics::ingest::request(self.adapter, "not_found");
                        return Ok(FetchOutcome::NotFound);
                    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        retry_after = resp
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.trim().parse::<u64>().ok())
                            .map(Duration::from_secs);
                        format!("HTTP {status}")
                    } else {
                        crate::metrics::ingest::request(self.adapter, "failed");
                        return Err(TrackerError::fetch(
                            self.adapter,
                            format!("HTTP {status} from {url}"),
                        ));
                    }
                }
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                crate::metrics::ingest::request(self.adapter, "failed");
                return Err(TrackerError::fetch(
                    self.adapter,
                    format!("giving up on {url} after {attempt} attempts: {failure}"),
                ));
            }

            let delay = retry_after
                .unwrap_or_else(|| self.retry.delay_for(attempt - 1))
                .min(self.retry.max_delay);
            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "request failed ({}), backing off",
                failure
            );
            crate::metrics::ingest::retry(self.adapter);
            tokio::time::sleep(delay).await;
            debug!(attempt, "retrying {}", url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn policy_from_config_never_has_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 10,
            max_delay_ms: 20,
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
    }
}
