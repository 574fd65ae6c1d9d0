//! Fetch settings for a remote config instance.
//!
//! Both values are expressed in whole seconds, matching the `fetchTimeout` and
//! `minimumFetchInterval` arguments accepted by the operation surface.

use std::time::Duration;

use crate::remote_config::error::{invalid_argument, RemoteConfigResult};

/// Default timeout for fetch operations (60 seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 60;
/// Default minimum interval between successful fetches (12 hours).
pub const DEFAULT_MINIMUM_FETCH_INTERVAL_SECONDS: u64 = 12 * 60 * 60;

/// Configuration options for fetch behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteConfigSettings {
    fetch_timeout_seconds: u64,
    minimum_fetch_interval_seconds: u64,
}

impl RemoteConfigSettings {
    /// Creates a new settings object after validating values.
    ///
    /// `fetch_timeout_seconds` must be strictly positive and `minimum_fetch_interval_seconds`
    /// must not be negative; a zero interval disables throttling.
    pub fn new(
        fetch_timeout_seconds: i64,
        minimum_fetch_interval_seconds: i64,
    ) -> RemoteConfigResult<Self> {
        if fetch_timeout_seconds <= 0 {
            return Err(invalid_argument(format!(
                "fetch timeout must be greater than zero, got {fetch_timeout_seconds}"
            )));
        }
        if minimum_fetch_interval_seconds < 0 {
            return Err(invalid_argument(format!(
                "minimum fetch interval must not be negative, got {minimum_fetch_interval_seconds}"
            )));
        }
        Ok(Self {
            fetch_timeout_seconds: fetch_timeout_seconds as u64,
            minimum_fetch_interval_seconds: minimum_fetch_interval_seconds as u64,
        })
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch_timeout_seconds
    }

    pub fn minimum_fetch_interval_seconds(&self) -> u64 {
        self.minimum_fetch_interval_seconds
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl Default for RemoteConfigSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECONDS,
            minimum_fetch_interval_seconds: DEFAULT_MINIMUM_FETCH_INTERVAL_SECONDS,
        }
    }
}

/// Partial settings update; `None` keeps the current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoteConfigSettingsUpdate {
    pub fetch_timeout_seconds: Option<i64>,
    pub minimum_fetch_interval_seconds: Option<i64>,
}

impl RemoteConfigSettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.fetch_timeout_seconds.is_none() && self.minimum_fetch_interval_seconds.is_none()
    }

    /// Merges the update over `current`, validating the resulting pair.
    pub fn apply_to(&self, current: RemoteConfigSettings) -> RemoteConfigResult<RemoteConfigSettings> {
        RemoteConfigSettings::new(
            self.fetch_timeout_seconds
                .unwrap_or(current.fetch_timeout_seconds as i64),
            self.minimum_fetch_interval_seconds
                .unwrap_or(current.minimum_fetch_interval_seconds as i64),
        )
    }
}
