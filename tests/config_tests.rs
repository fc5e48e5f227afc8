//! Tests for provider configuration loading and validation.

use std::time::Duration;

use rstest::*;
use stratum::ProviderConfig;
use stratum::config::ConfigError;
use stratum::test_support::EnvGuard;

#[fixture]
fn valid_config() -> ProviderConfig {
    ProviderConfig {
        api_host: String::from("https://storage.example.net"),
        access_token: Some(String::from("opaque-token")),
        poll_interval_ms: 1000,
        poll_max_interval_ms: None,
        poll_max_attempts: 600,
        poll_attempt_timeout_ms: 30_000,
        operation_timeout_secs: 1800,
        request_timeout_secs: 30,
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: ProviderConfig) {
    assert!(valid_config.validate().is_ok());
}

#[rstest]
fn missing_api_host_has_actionable_error(valid_config: ProviderConfig) {
    let cfg = ProviderConfig {
        api_host: String::from("   "),
        ..valid_config
    };

    let error = cfg.validate().expect_err("api host is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains("STRATUM_API_HOST"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("stratum.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("api_host"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
fn api_host_without_scheme_is_rejected(valid_config: ProviderConfig) {
    let cfg = ProviderConfig {
        api_host: String::from("storage.example.net"),
        ..valid_config
    };

    let error = cfg.validate().expect_err("scheme is required");
    assert!(
        matches!(error, ConfigError::InvalidValue(ref message) if message.contains("http://")),
        "unexpected error: {error}"
    );
}

/// Every numeric setting must be positive and point at its source when not.
#[rstest]
fn zero_values_produce_actionable_errors(valid_config: ProviderConfig) {
    fn assert_actionable(
        mut cfg: ProviderConfig,
        mutate: impl FnOnce(&mut ProviderConfig),
        env_var: &str,
        toml_key: &str,
    ) {
        mutate(&mut cfg);
        let error = cfg.validate().expect_err("validation should fail");
        let message = error.to_string();
        assert!(
            message.contains(env_var),
            "error should mention env var {env_var}: {message}"
        );
        assert!(
            message.contains(toml_key),
            "error should mention TOML key {toml_key}: {message}"
        );
    }

    assert_actionable(
        valid_config.clone(),
        |cfg| cfg.poll_interval_ms = 0,
        "STRATUM_POLL_INTERVAL_MS",
        "poll_interval_ms",
    );
    assert_actionable(
        valid_config.clone(),
        |cfg| cfg.poll_max_attempts = 0,
        "STRATUM_POLL_MAX_ATTEMPTS",
        "poll_max_attempts",
    );
    assert_actionable(
        valid_config.clone(),
        |cfg| cfg.poll_attempt_timeout_ms = 0,
        "STRATUM_POLL_ATTEMPT_TIMEOUT_MS",
        "poll_attempt_timeout_ms",
    );
    assert_actionable(
        valid_config.clone(),
        |cfg| cfg.operation_timeout_secs = 0,
        "STRATUM_OPERATION_TIMEOUT_SECS",
        "operation_timeout_secs",
    );
    assert_actionable(
        valid_config,
        |cfg| cfg.request_timeout_secs = 0,
        "STRATUM_REQUEST_TIMEOUT_SECS",
        "request_timeout_secs",
    );
}

#[rstest]
fn poll_policy_carries_the_configured_budget(valid_config: ProviderConfig) {
    let policy = ProviderConfig {
        poll_max_interval_ms: Some(8000),
        ..valid_config
    }
    .poll_policy();

    assert_eq!(policy.interval, Duration::from_secs(1));
    assert_eq!(policy.max_interval, Some(Duration::from_secs(8)));
    assert_eq!(policy.max_attempts, 600);
    assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
    assert_eq!(policy.deadline, Duration::from_secs(1800));
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("STRATUM_API_HOST", Some("https://env.example.net")),
        ("STRATUM_POLL_INTERVAL_MS", Some("250")),
        ("STRATUM_ACCESS_TOKEN", None),
        ("STRATUM_POLL_MAX_INTERVAL_MS", None),
        ("STRATUM_CONFIG_PATH", None),
    ])
    .await;

    let cfg = ProviderConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration should load from the environment: {err}"));

    assert_eq!(cfg.api_host, "https://env.example.net");
    assert_eq!(cfg.poll_interval_ms, 250);
    assert_eq!(cfg.poll_max_attempts, 600);
    assert_eq!(cfg.request_timeout_secs, 30);
    assert_eq!(cfg.access_token, None);
    assert!(cfg.validate().is_ok());
}
