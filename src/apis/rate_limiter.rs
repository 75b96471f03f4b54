use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket over requests per minute. A zero rate disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_min: u64,
    // tokens available and the time they were last refilled
    bucket: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_min: u64) -> Self {
        // Start with a single token so a fresh limiter cannot burst a whole minute at once
        let initial = if requests_per_min > 0 { 1.0 } else { 0.0 };
        Self {
            requests_per_min,
            bucket: Mutex::new((initial, Instant::now())),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Wait until one request may be sent.
    pub async fn acquire(&self) {
        if self.requests_per_min == 0 {
            return;
        }
        let capacity = self.requests_per_min as f64;
        let refill_per_sec = capacity / 60.0;
        loop {
            let mut guard = self.bucket.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            *tokens = (*tokens + now.duration_since(*last).as_secs_f64() * refill_per_sec).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }
            let wait = (1.0 - *tokens) / refill_per_sec;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(wait.max(0.001))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn second_request_waits_for_refill() {
        // 600/min = one token every 100ms
        let limiter = RateLimiter::new(600);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
