//! Token-bucket limiter for publishes.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Allows one publish per `interval`, with bursts of up to `burst`.
///
/// Callers wait for a token rather than being rejected.
pub struct PublishLimiter {
    interval: Duration,
    burst: u32,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl PublishLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            interval,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available.
    /// Otherwise returns how long until the next one.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if self.interval.is_zero() {
            return Ok(());
        }

        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(f64::from(self.burst));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        Err(self.interval.mul_f64(1.0 - bucket.tokens))
    }

    /// Wait until a token is available and take it.
    pub async fn wait(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Publish rate limited");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
