//! Environment-based configuration.
//!
//! Settings are read from process environment variables, optionally seeded
//! from a `.env.local` file. Keys are matched case-insensitively. Values
//! already present in the environment win over the file.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::error::{PagewrightError, Result};
use crate::retry::RetryPolicy;

/// Env file read at startup when no other file is given.
pub const DEFAULT_ENV_FILE: &str = ".env.local";

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4";
const DEFAULT_GITHUB_API_URL: &str = pagewright_github::DEFAULT_API_URL;
const DEFAULT_EVALUATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GITHUB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SETTLE_DELAY_SECS: u64 = 5;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 10;

/// Process-wide settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Shared secret every task request must present.
    pub secret_key: String,
    /// GitHub token with `repo` and `pages` scopes.
    pub github_token: String,
    /// Account that owns generated repositories.
    pub github_username: String,
    /// GitHub REST API root.
    pub github_api_url: String,
    /// API key for the generation backend.
    pub llm_api_key: String,
    /// OpenAI-compatible API root.
    pub llm_base_url: String,
    /// Model name sent with every completion request.
    pub llm_model: String,
    /// Overall budget for delivering one evaluation callback, in seconds.
    pub evaluation_timeout_secs: u64,
    /// Per-request timeout for GitHub calls, in seconds.
    pub github_timeout_secs: u64,
    /// Per-request timeout for completion calls, in seconds.
    pub llm_timeout_secs: u64,
    /// Grace interval between enabling Pages and notifying, in seconds.
    pub settle_delay_secs: u64,
    /// Attempts per remote call before giving up on transient failures.
    pub retry_max_attempts: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("github_token", &"<redacted>")
            .field("github_username", &self.github_username)
            .field("github_api_url", &self.github_api_url)
            .field("llm_api_key", &"<redacted>")
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_model", &self.llm_model)
            .field("evaluation_timeout_secs", &self.evaluation_timeout_secs)
            .field("github_timeout_secs", &self.github_timeout_secs)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("settle_delay_secs", &self.settle_delay_secs)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .finish()
    }
}

impl Config {
    /// Loads an env file, then reads the environment.
    ///
    /// With `env_file` unset, [`DEFAULT_ENV_FILE`] is tried and silently
    /// skipped when absent. An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the env file cannot be parsed or a
    /// value is invalid, and `ConfigMissing` for absent required keys.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let path = env_file.unwrap_or_else(|| Path::new(DEFAULT_ENV_FILE));
        match dotenvy::from_path(path) {
            Ok(()) => debug!(path = %path.display(), "Loaded env file"),
            Err(dotenvy::Error::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound && env_file.is_none() => {}
            Err(e) => {
                return Err(PagewrightError::config_validation(
                    format!("cannot read env file '{}': {e}", path.display()),
                    "Check the file exists and uses KEY=value lines",
                ));
            }
        }
        Self::from_env()
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    ///
    /// Each key is tried upper-case first, then lower-case. Blank values
    /// count as absent.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissing` for an absent required key and
    /// `ConfigValidationError` for unparseable or invalid values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .or_else(|| lookup(&key.to_lowercase()))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &str| get(key).ok_or_else(|| PagewrightError::config_missing(key));

        let config = Self {
            secret_key: required("SECRET_KEY")?,
            github_token: required("GITHUB_TOKEN")?,
            github_username: required("GITHUB_USERNAME")?,
            github_api_url: get("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            llm_api_key: required("LLM_API_KEY")?,
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            evaluation_timeout_secs: parse_number(
                "EVALUATION_TIMEOUT",
                get("EVALUATION_TIMEOUT"),
                DEFAULT_EVALUATION_TIMEOUT_SECS,
            )?,
            github_timeout_secs: parse_number(
                "GITHUB_TIMEOUT",
                get("GITHUB_TIMEOUT"),
                DEFAULT_GITHUB_TIMEOUT_SECS,
            )?,
            llm_timeout_secs: parse_number(
                "LLM_TIMEOUT",
                get("LLM_TIMEOUT"),
                DEFAULT_LLM_TIMEOUT_SECS,
            )?,
            settle_delay_secs: parse_number(
                "SETTLE_DELAY_SECS",
                get("SETTLE_DELAY_SECS"),
                DEFAULT_SETTLE_DELAY_SECS,
            )?,
            retry_max_attempts: parse_number(
                "RETRY_MAX_ATTEMPTS",
                get("RETRY_MAX_ATTEMPTS"),
                DEFAULT_RETRY_MAX_ATTEMPTS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// Checks that:
    /// - timeouts are greater than 0 (the settle delay may be 0)
    /// - `retry_max_attempts` is greater than 0
    /// - API roots are absolute `http`/`https` URLs
    /// - `github_username` contains no `/`
    ///
    /// # Errors
    ///
    /// Returns `PagewrightError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("EVALUATION_TIMEOUT", self.evaluation_timeout_secs),
            ("GITHUB_TIMEOUT", self.github_timeout_secs),
            ("LLM_TIMEOUT", self.llm_timeout_secs),
        ] {
            if value == 0 {
                return Err(PagewrightError::config_validation(
                    format!("{key} must be greater than 0"),
                    format!("Set {key} to at least 1 second"),
                ));
            }
        }

        if self.retry_max_attempts == 0 {
            return Err(PagewrightError::config_validation(
                "RETRY_MAX_ATTEMPTS must be greater than 0",
                "Set RETRY_MAX_ATTEMPTS to at least 1",
            ));
        }

        for (key, value) in [
            ("LLM_BASE_URL", &self.llm_base_url),
            ("GITHUB_API_URL", &self.github_api_url),
        ] {
            let valid = Url::parse(value)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(PagewrightError::config_validation(
                    format!("{key} is not an http(s) URL: '{value}'"),
                    format!("Set {key} to an absolute URL such as https://api.example.com/v1"),
                ));
            }
        }

        if self.github_username.contains('/') {
            return Err(PagewrightError::config_validation(
                "GITHUB_USERNAME must be a bare account name",
                "Use 'octocat', not 'octocat/repo' or a URL",
            ));
        }

        Ok(())
    }

    /// Whether GitHub credentials are present.
    pub fn github_configured(&self) -> bool {
        !self.github_token.is_empty() && !self.github_username.is_empty()
    }

    /// Whether generation backend credentials are present.
    pub fn llm_configured(&self) -> bool {
        !self.llm_api_key.is_empty()
    }

    /// Overall budget for delivering one evaluation callback.
    pub const fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }

    /// Per-request timeout for GitHub calls.
    pub const fn github_timeout(&self) -> Duration {
        Duration::from_secs(self.github_timeout_secs)
    }

    /// Per-request timeout for completion calls.
    pub const fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Grace interval before notifying the evaluator.
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Retry policy shared by every remote call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.retry_max_attempts)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    raw.map_or(Ok(default), |value| {
        value.parse().map_err(|_| {
            PagewrightError::config_validation(
                format!("{key} must be a whole number, got '{value}'"),
                format!("Set {key} to a non-negative integer"),
            )
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = [
            ("SECRET_KEY", "s3cret"),
            ("GITHUB_TOKEN", "ghp_token"),
            ("GITHUB_USERNAME", "octo"),
            ("LLM_API_KEY", "sk-test"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
        for (k, v) in pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        map
    }

    fn load(map: &HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_config_default_values() {
        let config = load(&env(&[])).unwrap();

        assert_eq!(config.secret_key, "s3cret");
        assert_eq!(config.github_username, "octo");
        assert_eq!(config.llm_base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm_model, "gpt-4");
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.evaluation_timeout(), Duration::from_secs(600));
        assert_eq!(config.github_timeout(), Duration::from_secs(300));
        assert_eq!(config.llm_timeout(), Duration::from_secs(300));
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.retry_max_attempts, 10);
        assert!(config.github_configured());
        assert!(config.llm_configured());
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&env(&[
            ("LLM_MODEL", "gpt-4o-mini"),
            ("LLM_BASE_URL", "http://localhost:11434/v1"),
            ("SETTLE_DELAY_SECS", "0"),
            ("RETRY_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.llm_base_url, "http://localhost:11434/v1");
        assert_eq!(config.settle_delay(), Duration::ZERO);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_lowercase_keys_accepted() {
        let mut map = env(&[]);
        let token = map.remove("GITHUB_TOKEN").unwrap();
        map.insert("github_token".to_string(), token);

        let config = load(&map).unwrap();
        assert_eq!(config.github_token, "ghp_token");
    }

    #[test]
    fn test_missing_required_key() {
        let mut map = env(&[]);
        map.remove("SECRET_KEY");

        let err = load(&map).unwrap_err();
        assert!(
            matches!(&err, PagewrightError::ConfigMissing { key } if key == "SECRET_KEY"),
            "Expected ConfigMissing for SECRET_KEY, got: {err:?}"
        );
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let err = load(&env(&[("LLM_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(&err, PagewrightError::ConfigMissing { key } if key == "LLM_API_KEY"));
    }

    #[test]
    fn test_non_numeric_timeout() {
        let err = load(&env(&[("GITHUB_TIMEOUT", "five minutes")])).unwrap_err();
        assert!(
            matches!(&err, PagewrightError::ConfigValidationError { message, .. }
                if message.contains("GITHUB_TIMEOUT")),
            "Expected ConfigValidationError about GITHUB_TIMEOUT, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let err = load(&env(&[("EVALUATION_TIMEOUT", "0")])).unwrap_err();
        assert!(
            matches!(&err, PagewrightError::ConfigValidationError { message, suggestion }
                if message.contains("EVALUATION_TIMEOUT") && suggestion.contains("EVALUATION_TIMEOUT")),
            "Expected ConfigValidationError about EVALUATION_TIMEOUT, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let err = load(&env(&[("RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(&err, PagewrightError::ConfigValidationError { message, .. }
            if message.contains("RETRY_MAX_ATTEMPTS")));
    }

    #[test]
    fn test_config_validation_bad_url() {
        let err = load(&env(&[("LLM_BASE_URL", "api.openai.com")])).unwrap_err();
        assert!(matches!(&err, PagewrightError::ConfigValidationError { message, .. }
            if message.contains("LLM_BASE_URL")));

        let err = load(&env(&[("GITHUB_API_URL", "ftp://example.com")])).unwrap_err();
        assert!(matches!(&err, PagewrightError::ConfigValidationError { message, .. }
            if message.contains("GITHUB_API_URL")));
    }

    #[test]
    fn test_config_validation_username_with_slash() {
        let err = load(&env(&[("GITHUB_USERNAME", "octo/demo")])).unwrap_err();
        assert!(matches!(&err, PagewrightError::ConfigValidationError { message, .. }
            if message.contains("GITHUB_USERNAME")));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&env(&[])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("ghp_token"));
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("octo"));
    }

    #[test]
    fn test_missing_explicit_env_file() {
        let err = Config::load(Some(Path::new("/nonexistent/pagewright.env"))).unwrap_err();
        assert!(matches!(err, PagewrightError::ConfigValidationError { .. }));
    }
}
