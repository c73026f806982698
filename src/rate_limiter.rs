//! Send throttling using a token bucket
//!
//! One token is taken per outbound transmission attempt, never per batch, so a
//! provider-level burst limit holds even when per-send latency varies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Fixed-point scale for token accounting, so slow refill rates do not lose
/// fractional tokens between refills
const MILLI_TOKENS: u64 = 1000;

/// Token-bucket limiter shared by every send of one dispatch run
///
/// # Algorithm
///
/// - The bucket holds `rate` tokens, or one token when the rate is below 1/s,
///   and starts full
/// - Tokens refill continuously at `rate` per second
/// - [`acquire`](RateLimiter::acquire) takes one token, sleeping until one is available
///
/// Calls are only ever delayed, never dropped. Fractional rates are kept, so
/// a provider allowing one send every two seconds gets exactly that.
///
/// # Implementation
///
/// Lock-free, tracked with `AtomicU64`:
/// - `milli_rate`: thousandths of a token per second (always at least 1)
/// - `tokens`: available tokens in thousandths
/// - `last_refill`: timestamp of last refill (nanoseconds since an arbitrary epoch)
#[derive(Clone, Debug)]
pub struct RateLimiter {
    milli_rate: Arc<AtomicU64>,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Create a limiter issuing `tokens_per_second` permits per second
    ///
    /// A rate that is zero, negative or not finite is treated as 1.
    ///
    /// ```
    /// use campaign_dispatch::rate_limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(14.0);
    /// assert_eq!(limiter.rate(), 14.0);
    ///
    /// let slow = RateLimiter::new(0.5);
    /// assert_eq!(slow.rate(), 0.5);
    /// ```
    #[must_use]
    pub fn new(tokens_per_second: f64) -> Self {
        let milli_rate = Self::to_milli_rate(tokens_per_second);

        Self {
            milli_rate: Arc::new(AtomicU64::new(milli_rate)),
            tokens: Arc::new(AtomicU64::new(Self::capacity(milli_rate))),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Change the rate, effective immediately
    ///
    /// Raising the rate grows the bucket by the difference; lowering it leaves
    /// excess tokens in place until consumed.
    pub fn set_rate(&self, tokens_per_second: f64) {
        let new_rate = Self::to_milli_rate(tokens_per_second);
        let old_rate = self.milli_rate.swap(new_rate, Ordering::SeqCst);

        let (new_capacity, old_capacity) = (Self::capacity(new_rate), Self::capacity(old_rate));
        if new_capacity > old_capacity {
            self.tokens
                .fetch_add(new_capacity - old_capacity, Ordering::SeqCst);
        }
    }

    /// Current rate in tokens per second
    pub fn rate(&self) -> f64 {
        self.milli_rate.load(Ordering::Relaxed) as f64 / MILLI_TOKENS as f64
    }

    /// Whole tokens available right now
    pub fn available(&self) -> u64 {
        self.refill_tokens();
        self.tokens.load(Ordering::SeqCst) / MILLI_TOKENS
    }

    /// Wait for and take one token
    pub async fn acquire(&self) {
        loop {
            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= MILLI_TOKENS {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - MILLI_TOKENS,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Sleep roughly until the missing fraction of a token has refilled,
            // capped so rate changes are noticed promptly
            let milli_rate = self.milli_rate.load(Ordering::Relaxed);
            let missing = MILLI_TOKENS - current;
            let wait_ms = missing.saturating_mul(1000) / milli_rate;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(5, 100))).await;
        }
    }

    fn refill_tokens(&self) {
        let milli_rate = self.milli_rate.load(Ordering::Relaxed);
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let to_add = (milli_rate as f64 * elapsed_secs) as u64;

        if to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let capacity = Self::capacity(milli_rate);
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(to_add).min(capacity.max(current)))
                });
        }
    }

    /// Bucket size in thousandths: the rate, but never less than one token
    fn capacity(milli_rate: u64) -> u64 {
        milli_rate.max(MILLI_TOKENS)
    }

    fn to_milli_rate(tokens_per_second: f64) -> u64 {
        if tokens_per_second.is_finite() && tokens_per_second > 0.0 {
            // Float-to-int casts saturate
            ((tokens_per_second * MILLI_TOKENS as f64).round() as u64).max(1)
        } else {
            MILLI_TOKENS
        }
    }

    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}
