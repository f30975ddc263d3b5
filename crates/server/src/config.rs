//! Server configuration.
//!
//! The configuration is plain data and deserializes from camelCase JSON, every field being
//! optional. It is validated once by the server builder and then shared read-only by all
//! requests.

use std::time::Duration;

use http::Method;
use sans_http::protocol::{STANDARD_METHODS, parse_method};
use serde::Deserialize;

use crate::ServerBuildError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// seconds before an unsent response is forced to `timeout_status`; `0` disables the timer
    pub timeout: f64,
    pub logs: LogConfig,
    pub supported_methods: Vec<String>,
    /// answer 405 for methods outside `supported_methods`
    pub method_check: bool,
    /// reject the request future instead of settling with a 500 when an error goes unhandled
    pub rejectable: bool,
    pub timeout_status: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            logs: LogConfig::default(),
            supported_methods: STANDARD_METHODS.iter().map(ToString::to_string).collect(),
            method_check: true,
            rejectable: false,
            timeout_status: 408,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0.0).then(|| Duration::from_secs_f64(self.timeout))
    }

    /// Checks the values and resolves the supported method names.
    pub(crate) fn validate(&self) -> Result<Vec<Method>, ServerBuildError> {
        if !self.timeout.is_finite() || self.timeout < 0.0 {
            return Err(ServerBuildError::invalid_config(format!("timeout must be a non-negative number, got {}", self.timeout)));
        }
        if !(400..=599).contains(&self.timeout_status) {
            return Err(ServerBuildError::invalid_config(format!("timeout status must be 4xx or 5xx, got {}", self.timeout_status)));
        }
        if self.supported_methods.is_empty() {
            return Err(ServerBuildError::invalid_config("supported methods must not be empty"));
        }

        self.supported_methods
            .iter()
            .map(|name| parse_method(name).ok_or_else(|| ServerBuildError::invalid_config(format!("unknown method {name}"))))
            .collect()
    }
}

/// Controls how the events of each request are written to `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// write nothing
    pub silent: bool,
    /// buffer the events of a request and write them as one record after settlement
    pub grouped: bool,
    /// include debug events such as handler timings and skips
    pub verbose: bool,
    /// prefix each event with the time since the previous one
    pub time_diff: bool,
    /// append the total request duration to the summary
    pub duration: bool,
    /// prefix the summary with the current HTTP date
    pub timestamp: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { silent: false, grouped: true, verbose: false, time_diff: false, duration: true, timestamp: false }
    }
}
