//! Poll intervals, timeouts and retry bounds

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Debug list poll interval while an observer is connected
    pub poll_interval_secs: u64,
    /// Upper bound on waiting for a login flow to yield a credential
    pub login_timeout_secs: u64,
    /// Pause between device catalog retries while the catalog is empty
    pub catalog_retry_secs: u64,
    /// Give up on an empty catalog after this many re-polls
    pub catalog_max_attempts: u32,
    /// Delay before the refresh poll that follows a user action
    pub refresh_delay_ms: u64,
    /// Quiet period before buffered form edits are persisted
    pub form_debounce_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            login_timeout_secs: 120,
            catalog_retry_secs: 5,
            catalog_max_attempts: 24,
            refresh_delay_ms: 1000,
            form_debounce_ms: 300,
        }
    }
}

/// Timing settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileTiming {
    pub poll_interval_secs: Option<u64>,
    pub login_timeout_secs: Option<u64>,
    pub catalog_retry_secs: Option<u64>,
    pub catalog_max_attempts: Option<u32>,
    pub refresh_delay_ms: Option<u64>,
    pub form_debounce_ms: Option<u64>,
}

impl TimingConfig {
    pub fn from_file(file: Option<FileTiming>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            // Zero would make tokio's interval panic
            poll_interval_secs: file
                .poll_interval_secs
                .filter(|&s| s > 0)
                .unwrap_or(defaults.poll_interval_secs),
            login_timeout_secs: file
                .login_timeout_secs
                .filter(|&s| s > 0)
                .unwrap_or(defaults.login_timeout_secs),
            catalog_retry_secs: file.catalog_retry_secs.unwrap_or(defaults.catalog_retry_secs),
            catalog_max_attempts: file
                .catalog_max_attempts
                .unwrap_or(defaults.catalog_max_attempts),
            refresh_delay_ms: file.refresh_delay_ms.unwrap_or(defaults.refresh_delay_ms),
            form_debounce_ms: file.form_debounce_ms.unwrap_or(defaults.form_debounce_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn catalog_retry(&self) -> Duration {
        Duration::from_secs(self.catalog_retry_secs)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn form_debounce(&self) -> Duration {
        Duration::from_millis(self.form_debounce_ms)
    }
}
