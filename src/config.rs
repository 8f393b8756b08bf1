//! Configuration Module
//!
//! Runtime settings and the persisted tracker entry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::SessionCredentials;
use crate::scheduler::DEFAULT_UPDATE_INTERVAL;

/// Default anisette/report gateway
pub const DEFAULT_URL: &str = "http://localhost:6969";

/// Storage key of the tracker entry
pub const ENTRY_KEY: &str = "tracker";

/// Shortest accepted polling period
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Everything needed to resume tracking without logging in again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub url: String,
    /// Account email, used as a label only
    pub email: String,
    pub account: SessionCredentials,
    /// Raw accessory export as it was imported
    pub accessory: String,
}

/// Validate and normalize a gateway URL
pub fn parse_url(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url.as_str().trim_end_matches('/').to_string()),
        other => Err(ConfigError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

/// Polling period from an optional number of seconds
pub fn update_interval(secs: Option<u64>) -> Result<Duration, ConfigError> {
    let Some(secs) = secs else {
        return Ok(DEFAULT_UPDATE_INTERVAL);
    };

    let interval = Duration::from_secs(secs);
    if interval < MIN_UPDATE_INTERVAL {
        return Err(ConfigError::IntervalTooShort(secs));
    }
    Ok(interval)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Update interval of {0}s is below the 60s minimum")]
    IntervalTooShort(u64),
}
