//! Provider quota integration
//!
//! The provider reports a maximum sustained send rate and a 24-hour
//! allowance. The raw rate drives the [`RateLimiter`](crate::rate_limiter::RateLimiter);
//! a derived, clamped value sizes checkpoint batches.

use crate::config::{DispatchConfig, QuotaOverrunPolicy};
use crate::error::{Error, Result};
use crate::provider::SendQuota;

/// Batch size derived from the provider's maximum send rate
///
/// `max(min_batch, min(max_batch, rate * multiplier))`; with the defaults a
/// rate of 14/s gives batches of 28.
pub fn effective_send_rate(max_send_rate: f64, config: &DispatchConfig) -> usize {
    let scaled = (max_send_rate.max(0.0) * f64::from(config.rate_multiplier)).floor();
    let scaled = if scaled.is_finite() {
        scaled as usize
    } else {
        config.max_batch_size
    };

    scaled
        .min(config.max_batch_size)
        .max(config.min_batch_size)
        .max(1)
}

/// Tokens per second for the send limiter: the provider's raw rate,
/// fractions included
///
/// A rate the provider cannot have meant (zero, negative, not finite) falls
/// back to one send per second.
pub fn limiter_rate(max_send_rate: f64) -> f64 {
    if max_send_rate.is_finite() && max_send_rate > 0.0 {
        max_send_rate
    } else {
        1.0
    }
}

/// Outcome of comparing the estimated recipients to the remaining allowance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaCheck {
    /// Enough allowance left
    Sufficient,
    /// Not enough allowance, but the policy says to send anyway
    Overrun {
        /// Estimated recipients
        required: u64,
        /// Remaining 24-hour allowance
        remaining: u64,
    },
}

/// Apply the overrun policy to an estimated recipient count
///
/// Returns [`Error::QuotaInsufficient`] when the policy is
/// [`QuotaOverrunPolicy::Abort`] and the estimate exceeds what is left today.
pub fn check_quota(
    quota: &SendQuota,
    estimated_recipients: u64,
    policy: QuotaOverrunPolicy,
) -> Result<QuotaCheck> {
    let remaining = quota.remaining_today();
    if estimated_recipients <= remaining {
        return Ok(QuotaCheck::Sufficient);
    }

    match policy {
        QuotaOverrunPolicy::Proceed => Ok(QuotaCheck::Overrun {
            required: estimated_recipients,
            remaining,
        }),
        QuotaOverrunPolicy::Abort => Err(Error::QuotaInsufficient {
            required: estimated_recipients,
            remaining,
        }),
    }
}
