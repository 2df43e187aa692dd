//! Token-bucket quota for collaborator calls.
//!
//! Each collaborator (embedding, generation) gets one [`TokenBucket`]
//! sized from its `requests_per_minute`. Every call site awaits
//! [`TokenBucket::acquire`] before calling out; when the bucket is empty
//! the caller waits for the next token instead of being rejected. Waiters
//! are served in arrival order.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket holding at most `capacity` tokens, refilled continuously
    /// at `refill_per_sec`.
    pub fn new(name: impl Into<String>, capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A bucket that never admits more than `rpm` calls in any minute.
    ///
    /// Burst size is one second's worth of quota (at least one call).
    pub fn per_minute(name: impl Into<String>, rpm: u32) -> Self {
        let rpm = rpm.max(1);
        let burst = rpm.div_ceil(60);
        Self::new(name, burst, f64::from(rpm) / 60.0)
    }

    /// Take one token, waiting until one is available.
    pub async fn acquire(&self) {
        // The lock is held while sleeping so later callers queue behind.
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec);
            debug!(
                bucket = %self.name,
                wait_ms = wait.as_millis() as u64,
                "quota exhausted, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
