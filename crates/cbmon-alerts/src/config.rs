//! Engine configuration.
//!
//! [`AlertEngineConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! resend_interval_secs = 60
//! alertmanager_urls = ["http://alertmanager:9093"]
//!
//! [base_labels]
//! namespace = "database"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Shortest retention allowed for resolved alerts.
///
/// Alertmanager's generator guidelines require resolved alerts to keep being
/// sent for at least this long.
pub const MIN_INACTIVE_ALERT_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Configuration for the alert engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// How often alerts are recomputed and resent (in seconds).
    pub resend_interval_secs: u64,
    /// How long resolved alerts keep being sent (in seconds).
    pub max_inactive_lifetime_secs: u64,
    /// Timeout for one request to a receiver (in seconds).
    pub receiver_timeout_secs: u64,
    /// Base URLs of the Alertmanager receivers.
    pub alertmanager_urls: Vec<String>,
    /// Labels added to every alert. Never overrides built-in labels.
    pub base_labels: BTreeMap<String, String>,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            resend_interval_secs: 60,
            max_inactive_lifetime_secs: MIN_INACTIVE_ALERT_LIFETIME.as_secs(),
            receiver_timeout_secs: 60,
            alertmanager_urls: Vec::new(),
            base_labels: BTreeMap::new(),
        }
    }
}

impl AlertEngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AlertError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| AlertError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Sets the receiver URLs.
    #[must_use]
    pub fn with_alertmanager_urls<S: Into<String>>(mut self, urls: impl IntoIterator<Item = S>) -> Self {
        self.alertmanager_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a base label.
    #[must_use]
    pub fn with_base_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_labels.insert(key.into(), value.into());
        self
    }

    /// Sets the resend interval.
    ///
    /// The interval is kept in whole seconds; a fractional part rounds up.
    #[must_use]
    pub const fn with_resend_interval(mut self, interval: Duration) -> Self {
        let secs = interval.as_secs();
        self.resend_interval_secs = if interval.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        };
        self
    }

    /// Returns the resend interval.
    #[must_use]
    pub const fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_secs)
    }

    /// Returns how long resolved alerts are kept.
    #[must_use]
    pub const fn max_inactive_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_inactive_lifetime_secs)
    }

    /// Returns the receiver request timeout.
    #[must_use]
    pub const fn receiver_timeout(&self) -> Duration {
        Duration::from_secs(self.receiver_timeout_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.resend_interval_secs == 0 {
            return Err(AlertError::Config(
                "resend_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_inactive_lifetime() < MIN_INACTIVE_ALERT_LIFETIME {
            return Err(AlertError::Config(format!(
                "max_inactive_lifetime_secs must be at least {}",
                MIN_INACTIVE_ALERT_LIFETIME.as_secs()
            )));
        }

        if self.receiver_timeout_secs == 0 {
            return Err(AlertError::Config(
                "receiver_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for url in &self.alertmanager_urls {
            validate_url(url)?;
        }

        for name in self.base_labels.keys() {
            if !is_valid_label_name(name) {
                return Err(AlertError::Config(format!(
                    "base label '{name}' is not a valid label name"
                )));
            }
        }

        Ok(())
    }
}

/// Checks that `url` is a non-empty http(s) URL.
///
/// # Errors
///
/// Returns `AlertError::Config` if it is not.
pub fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(AlertError::Config(
            "alertmanager URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AlertError::Config(format!(
            "alertmanager URL '{url}' must start with http:// or https://"
        )));
    }

    Ok(())
}

// Prometheus label names: [a-zA-Z_][a-zA-Z0-9_]*
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    #[test]
    fn default_config() {
        let config = AlertEngineConfig::default();
        assert_eq!(config.resend_interval(), Duration::from_secs(60));
        assert_eq!(config.max_inactive_lifetime(), Duration::from_secs(900));
        assert_eq!(config.receiver_timeout(), Duration::from_secs(60));
        assert!(config.alertmanager_urls.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            resend_interval_secs = 30
            max_inactive_lifetime_secs = 1800
            receiver_timeout_secs = 10
            alertmanager_urls = ["http://am-0:9093", "https://am-1:9093"]

            [base_labels]
            namespace = "database"
        "#;

        let config = AlertEngineConfig::from_toml(toml).expect("should parse full config");
        assert_eq!(config.resend_interval(), Duration::from_secs(30));
        assert_eq!(config.max_inactive_lifetime(), Duration::from_secs(1800));
        assert_eq!(config.alertmanager_urls.len(), 2);
        assert_eq!(config.base_labels["namespace"], "database");
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let config = AlertEngineConfig::from_toml("").expect("should parse empty config");
        assert_eq!(config, AlertEngineConfig::default());
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"alertmanager_urls = [\"http://am:9093\"]\n")
            .unwrap();

        let config = AlertEngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.alertmanager_urls, vec!["http://am:9093"]);
    }

    #[test]
    fn file_not_found() {
        let result = AlertEngineConfig::from_file("/nonexistent/path/alerts.toml");
        assert!(matches!(result, Err(AlertError::Config(_))));
    }

    #[test]
    fn invalid_toml_rejected() {
        let result = AlertEngineConfig::from_toml("resend_interval_secs = \"soon\"");
        assert!(matches!(result, Err(AlertError::Config(_))));
    }

    #[test_case("resend_interval_secs = 0" ; "zero resend interval")]
    #[test_case("max_inactive_lifetime_secs = 60" ; "retention below fifteen minutes")]
    #[test_case("receiver_timeout_secs = 0" ; "zero timeout")]
    #[test_case("alertmanager_urls = [\"\"]" ; "empty url")]
    #[test_case("alertmanager_urls = [\"am:9093\"]" ; "url without scheme")]
    #[test_case("base_labels = { \"1abc\" = \"x\" }" ; "label starting with digit")]
    #[test_case("base_labels = { \"my-label\" = \"x\" }" ; "label with hyphen")]
    fn invalid_config_rejected(toml: &str) {
        assert!(matches!(
            AlertEngineConfig::from_toml(toml),
            Err(AlertError::Config(_))
        ));
    }

    #[test_case(Duration::from_millis(500), 1 ; "half a second rounds up")]
    #[test_case(Duration::from_millis(1500), 2 ; "fraction above a second rounds up")]
    #[test_case(Duration::from_secs(30), 30 ; "whole seconds kept")]
    #[test_case(Duration::ZERO, 0 ; "zero stays zero")]
    fn resend_interval_whole_seconds(interval: Duration, expected: u64) {
        let config = AlertEngineConfig::default().with_resend_interval(interval);
        assert_eq!(config.resend_interval_secs, expected);
        assert_eq!(config.validate().is_ok(), expected > 0);
    }

    #[test]
    fn builders() {
        let config = AlertEngineConfig::default()
            .with_alertmanager_urls(["http://am:9093"])
            .with_base_label("namespace", "database")
            .with_resend_interval(Duration::from_secs(5));

        assert_eq!(config.alertmanager_urls, vec!["http://am:9093"]);
        assert_eq!(config.base_labels["namespace"], "database");
        assert_eq!(config.resend_interval_secs, 5);
    }
}
