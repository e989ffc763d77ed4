use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.sbx.dev";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BUILD_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STABILITY_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 2;
pub const DEFAULT_STABILITY_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn is_truthy(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
}

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Snapshot built from explicit pairs instead of the process environment.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn flag_is_enabled(&self, key: &str) -> bool {
        self.var(key).is_some_and(is_truthy)
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.var(key).map(str::trim).filter(|value| !value.is_empty())
    }

    fn number<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.non_empty(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
                    var: key,
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self.number::<u64>(key)?.map_or(default, Duration::from_millis))
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self.number::<u64>(key)?.map_or(default, Duration::from_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL ({value}): {reason}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} must be a non-negative integer, found `{value}`")]
    InvalidNumber { var: &'static str, value: String },
    #[error("SBX_STABILITY_THRESHOLD must be at least 1")]
    ZeroStabilityThreshold,
}

/// How the published template is watched after the build reports success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub interval: Duration,
    /// Consecutive confirmed-active observations required.
    pub threshold: u32,
    /// Wall-clock bound; exceeding it yields a warning, not an error.
    pub max_wait: Duration,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_STABILITY_INTERVAL,
            threshold: DEFAULT_STABILITY_THRESHOLD,
            max_wait: DEFAULT_STABILITY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub build_interval: Duration,
    pub log_interval: Duration,
    pub stability: StabilityPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            build_interval: DEFAULT_BUILD_POLL_INTERVAL,
            log_interval: DEFAULT_LOG_POLL_INTERVAL,
            stability: StabilityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_url: Url,
    pub(crate) api_key: Option<String>,
    pub(crate) request_timeout: Duration,
    pub(crate) polling: PollingConfig,
}

impl ClientConfig {
    /// Builds a configuration from the current process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot)
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let raw_url = snapshot.non_empty("SBX_API_URL").unwrap_or(DEFAULT_API_URL);
        let api_url = parse_api_url(raw_url).map_err(|err| ConfigError::InvalidUrl {
            var: "SBX_API_URL",
            value: raw_url.to_string(),
            reason: err.to_string(),
        })?;
        let threshold = snapshot
            .number::<u32>("SBX_STABILITY_THRESHOLD")?
            .unwrap_or(DEFAULT_STABILITY_THRESHOLD);
        if threshold == 0 {
            return Err(ConfigError::ZeroStabilityThreshold);
        }
        Ok(Self {
            api_url,
            api_key: snapshot.non_empty("SBX_API_KEY").map(ToOwned::to_owned),
            request_timeout: snapshot.secs("SBX_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?,
            polling: PollingConfig {
                build_interval: snapshot
                    .millis("SBX_BUILD_POLL_INTERVAL_MS", DEFAULT_BUILD_POLL_INTERVAL)?,
                log_interval: snapshot
                    .millis("SBX_LOG_POLL_INTERVAL_MS", DEFAULT_LOG_POLL_INTERVAL)?,
                stability: StabilityPolicy {
                    interval: snapshot
                        .millis("SBX_STABILITY_INTERVAL_MS", DEFAULT_STABILITY_INTERVAL)?,
                    threshold,
                    max_wait: snapshot
                        .secs("SBX_STABILITY_TIMEOUT_SECS", DEFAULT_STABILITY_TIMEOUT)?,
                },
            },
        })
    }

    /// Configuration pointing at `api_url` with default timings.
    pub fn new(api_url: &str, api_key: Option<&str>) -> Result<Self, ConfigError> {
        let api_url = parse_api_url(api_url).map_err(|err| ConfigError::InvalidUrl {
            var: "api_url",
            value: api_url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            api_url,
            api_key: api_key.map(ToOwned::to_owned),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling: PollingConfig::default(),
        })
    }

    #[must_use]
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }
}

/// Parses the service base URL, forcing a trailing slash so relative paths
/// join under it instead of replacing its last segment.
fn parse_api_url(raw: &str) -> Result<Url, url::ParseError> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{trimmed}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() -> anyhow::Result<()> {
        let config = ClientConfig::from_snapshot(&EnvSnapshot::from_pairs(&[]))?;
        assert_eq!(config.api_url().as_str(), "https://api.sbx.dev/");
        assert!(config.api_key().is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.polling(), &PollingConfig::default());
        assert_eq!(config.polling().stability.threshold, 2);
        Ok(())
    }

    #[test]
    fn overrides_are_read_from_snapshot() -> anyhow::Result<()> {
        let snapshot = EnvSnapshot::from_pairs(&[
            ("SBX_API_URL", "http://127.0.0.1:9000/v1"),
            ("SBX_API_KEY", "key-123"),
            ("SBX_BUILD_POLL_INTERVAL_MS", "250"),
            ("SBX_STABILITY_THRESHOLD", "3"),
            ("SBX_STABILITY_TIMEOUT_SECS", "5"),
            ("SBX_LOG_POLL_INTERVAL_MS", ""),
        ]);
        let config = ClientConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.api_url().as_str(), "http://127.0.0.1:9000/v1/");
        assert_eq!(config.api_key(), Some("key-123"));
        assert_eq!(config.polling().build_interval, Duration::from_millis(250));
        assert_eq!(config.polling().log_interval, DEFAULT_LOG_POLL_INTERVAL);
        assert_eq!(config.polling().stability.threshold, 3);
        assert_eq!(config.polling().stability.max_wait, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn invalid_values_are_reported() {
        let bad_number = EnvSnapshot::from_pairs(&[("SBX_REQUEST_TIMEOUT_SECS", "soon")]);
        assert_eq!(
            ClientConfig::from_snapshot(&bad_number).err(),
            Some(ConfigError::InvalidNumber {
                var: "SBX_REQUEST_TIMEOUT_SECS",
                value: "soon".into(),
            })
        );
        let zero = EnvSnapshot::from_pairs(&[("SBX_STABILITY_THRESHOLD", "0")]);
        assert_eq!(
            ClientConfig::from_snapshot(&zero).err(),
            Some(ConfigError::ZeroStabilityThreshold)
        );
        let bad_url = EnvSnapshot::from_pairs(&[("SBX_API_URL", "not a url")]);
        assert!(matches!(
            ClientConfig::from_snapshot(&bad_url),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn falsey_flags() {
        for raw in ["0", "false", "No", "OFF", "", "  "] {
            assert!(!is_truthy(raw), "{raw:?}");
        }
        for raw in ["1", "true", "yes", "on"] {
            assert!(is_truthy(raw), "{raw:?}");
        }
        let snapshot = EnvSnapshot::from_pairs(&[("SBX_TIMINGS", "off")]);
        assert!(!snapshot.flag_is_enabled("SBX_TIMINGS"));
        assert!(!snapshot.flag_is_enabled("MISSING"));
    }
}
