//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poller::PollPolicy;

/// Longest operation timeout accepted, one week.
const MAX_OPERATION_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Provider settings derived from environment variables, configuration files,
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATUM",
    discovery(
        app_name = "stratum",
        env_var = "STRATUM_CONFIG_PATH",
        config_file_name = "stratum.toml",
        dotfile_name = ".stratum.toml",
        project_file_name = "stratum.toml"
    )
)]
pub struct ProviderConfig {
    /// Base URL of the orchestration API, for example
    /// `https://api.example.net`. This value is required.
    pub api_host: String,
    /// Opaque bearer token passed through on every request.
    pub access_token: Option<String>,
    /// Delay between operation polls in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// Upper bound for the poll delay. Setting it switches polling to a
    /// doubling cadence capped at this value.
    pub poll_max_interval_ms: Option<u64>,
    /// Maximum number of polls per operation.
    #[ortho_config(default = 600)]
    pub poll_max_attempts: u32,
    /// Time allowed for one poll request in milliseconds.
    #[ortho_config(default = 30_000)]
    pub poll_attempt_timeout_ms: u64,
    /// Overall time allowed for an operation to settle, in seconds.
    #[ortho_config(default = 1800)]
    pub operation_timeout_secs: u64,
    /// HTTP request timeout in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [provider] in stratum.toml",
            self.env_var, self.toml_key
        )
    }
}

impl ProviderConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("stratum")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide values via environment variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the API host is empty and
    /// [`ConfigError::InvalidValue`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = FieldMetadata::new("orchestration API host", "STRATUM_API_HOST", "api_host");
        let api_host = self.api_host.trim();
        if api_host.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                host.description,
                host.hint()
            )));
        }
        if !(api_host.starts_with("http://") || api_host.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "{} must start with http:// or https://, got '{api_host}': {}",
                host.description,
                host.hint()
            )));
        }

        Self::require_positive(
            self.poll_interval_ms,
            &FieldMetadata::new("poll interval", "STRATUM_POLL_INTERVAL_MS", "poll_interval_ms"),
        )?;
        Self::require_positive(
            u64::from(self.poll_max_attempts),
            &FieldMetadata::new(
                "poll attempt limit",
                "STRATUM_POLL_MAX_ATTEMPTS",
                "poll_max_attempts",
            ),
        )?;
        Self::require_positive(
            self.poll_attempt_timeout_ms,
            &FieldMetadata::new(
                "poll attempt timeout",
                "STRATUM_POLL_ATTEMPT_TIMEOUT_MS",
                "poll_attempt_timeout_ms",
            ),
        )?;
        let operation_timeout = FieldMetadata::new(
            "operation timeout",
            "STRATUM_OPERATION_TIMEOUT_SECS",
            "operation_timeout_secs",
        );
        Self::require_positive(self.operation_timeout_secs, &operation_timeout)?;
        if self.operation_timeout_secs > MAX_OPERATION_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "{} must not exceed {MAX_OPERATION_TIMEOUT_SECS} seconds, got {}: {}",
                operation_timeout.description,
                self.operation_timeout_secs,
                operation_timeout.hint()
            )));
        }
        Self::require_positive(
            self.request_timeout_secs,
            &FieldMetadata::new(
                "request timeout",
                "STRATUM_REQUEST_TIMEOUT_SECS",
                "request_timeout_secs",
            ),
        )?;

        if let Some(cap) = self
            .poll_max_interval_ms
            .filter(|cap| *cap < self.poll_interval_ms)
        {
            let metadata = FieldMetadata::new(
                "maximum poll interval",
                "STRATUM_POLL_MAX_INTERVAL_MS",
                "poll_max_interval_ms",
            );
            return Err(ConfigError::InvalidValue(format!(
                "{} ({cap}ms) must not be below the poll interval ({}ms): {}",
                metadata.description,
                self.poll_interval_ms,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// API base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.api_host.trim().trim_end_matches('/')
    }

    /// Timeout applied to every HTTP request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the operation poll policy from the configured cadence.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        let interval = Duration::from_millis(self.poll_interval_ms);
        let policy = self.poll_max_interval_ms.map_or_else(
            || PollPolicy::fixed(interval, self.poll_max_attempts),
            |cap| {
                PollPolicy::capped_exponential(
                    interval,
                    Duration::from_millis(cap),
                    self.poll_max_attempts,
                )
            },
        );
        policy
            .with_attempt_timeout(Duration::from_millis(self.poll_attempt_timeout_ms))
            .with_deadline(Duration::from_secs(self.operation_timeout_secs))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range or malformed.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> ProviderConfig {
        ProviderConfig {
            api_host: String::from("https://api.example.net/"),
            access_token: None,
            poll_interval_ms: 250,
            poll_max_interval_ms: None,
            poll_max_attempts: 10,
            poll_attempt_timeout_ms: 1000,
            operation_timeout_secs: 60,
            request_timeout_secs: 5,
        }
    }

    #[rstest]
    fn fixed_policy_without_cap(config: ProviderConfig) {
        let policy = config.poll_policy();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_interval, None);
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(1));
        assert_eq!(policy.deadline, Duration::from_secs(60));
    }

    #[rstest]
    fn cap_switches_to_exponential(config: ProviderConfig) {
        let policy = ProviderConfig {
            poll_max_interval_ms: Some(4000),
            ..config
        }
        .poll_policy();
        assert_eq!(policy.max_interval, Some(Duration::from_secs(4)));
    }

    #[rstest]
    fn base_url_drops_trailing_slash(config: ProviderConfig) {
        assert_eq!(config.base_url(), "https://api.example.net");
    }

    #[rstest]
    fn cap_below_interval_is_rejected(config: ProviderConfig) {
        let err = ProviderConfig {
            poll_max_interval_ms: Some(100),
            ..config
        }
        .validate()
        .expect_err("cap below interval");
        assert!(err.to_string().contains("STRATUM_POLL_MAX_INTERVAL_MS"));
    }

    #[rstest]
    #[case(MAX_OPERATION_TIMEOUT_SECS, true)]
    #[case(MAX_OPERATION_TIMEOUT_SECS + 1, false)]
    #[case(u64::MAX, false)]
    fn operation_timeout_is_bounded(
        config: ProviderConfig,
        #[case] secs: u64,
        #[case] accepted: bool,
    ) {
        let result = ProviderConfig {
            operation_timeout_secs: secs,
            ..config
        }
        .validate();
        assert_eq!(result.is_ok(), accepted, "{secs}: {result:?}");
        if let Err(err) = result {
            assert!(err.to_string().contains("STRATUM_OPERATION_TIMEOUT_SECS"));
        }
    }
}
