//! Retry policy for starting a call.
//!
//! Only failures to get the call onto a channel are retried; once the call
//! is running, per-action errors are results, not retry triggers.

use std::time::Duration;

use rpcmux_core::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    /// Delay before retry number `attempt` (0-based) after `err`, or `None`
    /// to give up.
    pub fn delay_for(&self, attempt: u32, err: &RpcError) -> Option<Duration> {
        if attempt >= self.max_retries || !retryable(err) {
            return None;
        }
        Some(
            self.initial_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(self.max_delay),
        )
    }
}

fn retryable(err: &RpcError) -> bool {
    err.is_establishment() || matches!(err, RpcError::AllTransportsFailed(_))
}
