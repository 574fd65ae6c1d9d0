//! Minimum-interval fetch throttling.

use crate::remote_config::storage::FetchStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow,
    /// The fetch is denied; another attempt is allowed after `retry_after_millis`.
    Throttled { retry_after_millis: u64 },
}

impl ThrottleDecision {
    #[cfg(test)]
    pub(crate) fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allow)
    }
}

/// Decides whether a fetch may go out at `now_millis`.
///
/// Only a previous *successful* fetch can throttle: after a failure, a throttled attempt or
/// before the first fetch, the request is always allowed so callers cannot lock themselves out.
pub fn can_fetch(
    now_millis: u64,
    last_fetch_time_millis: u64,
    last_status: FetchStatus,
    minimum_interval_seconds: u64,
) -> ThrottleDecision {
    if last_status != FetchStatus::Success {
        return ThrottleDecision::Allow;
    }
    let interval_millis = minimum_interval_seconds.saturating_mul(1_000);
    let elapsed = now_millis.saturating_sub(last_fetch_time_millis);
    if elapsed >= interval_millis {
        ThrottleDecision::Allow
    } else {
        ThrottleDecision::Throttled {
            retry_after_millis: interval_millis - elapsed,
        }
    }
}
