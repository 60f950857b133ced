//! Centralized configuration management for snowgrab

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::downloader::retry::RetryPolicy;

pub const ENV_INSTANCE: &str = "SNOWGRAB_INSTANCE";
pub const ENV_USERNAME: &str = "SNOWGRAB_USERNAME";
pub const ENV_PASSWORD: &str = "SNOWGRAB_PASSWORD";
pub const ENV_FILTER: &str = "SNOWGRAB_FILTER";
pub const ENV_DOWNLOAD_DIR: &str = "SNOWGRAB_DOWNLOAD_DIR";
pub const ENV_LOG_FILE: &str = "SNOWGRAB_LOG_FILE";
pub const ENV_CONCURRENCY: &str = "SNOWGRAB_CONCURRENCY";
pub const ENV_CACHE_OWNER_LABELS: &str = "SNOWGRAB_CACHE_OWNER_LABELS";
pub const ENV_KEEP_PARTIAL_FILES: &str = "SNOWGRAB_KEEP_PARTIAL_FILES";
pub const ENV_HTTP_TIMEOUT_SECONDS: &str = "SNOWGRAB_HTTP_TIMEOUT_SECONDS";
pub const ENV_USER_AGENT: &str = "SNOWGRAB_USER_AGENT";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SNOWGRAB_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "SNOWGRAB_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "SNOWGRAB_RETRY_MAX_DELAY_MS";

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_DOWNLOAD_DIR: &str = "./attachments";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {name} = '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance connection details
    pub instance: InstanceConfig,
    /// Encoded query selecting the attachments to download
    pub attachment_filter: String,
    /// Base directory for downloaded attachments
    pub download_dir: PathBuf,
    /// Optional log file in addition to stderr
    pub log_file: Option<PathBuf>,
    /// Maximum attachments in flight at once
    pub concurrency: usize,
    /// Share owner-label lookups between attachments of the same record
    pub cache_owner_labels: bool,
    /// Leave partially written files on disk when a download fails
    pub keep_partial_files: bool,
    /// HTTP client configuration
    pub http: HttpConfig,
    /// Retry configuration for remote calls
    pub retry: RetryConfig,
}

/// Instance host and static basic-auth credentials
#[derive(Clone)]
pub struct InstanceConfig {
    /// Bare host name or full `http(s)://` base URL
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl InstanceConfig {
    /// Base URL without trailing slash. Bare hosts are reached over TLS.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connect and metadata request timeout in seconds; also the longest
    /// pause tolerated between two chunks of an attachment body
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            user_agent: "snowgrab/0.1.0".to_string(),
        }
    }
}

/// Backoff parameters for transient remote failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per remote call, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Values supplied on the command line; they take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub instance: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub filter: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub cache_owner_labels: bool,
    pub keep_partial_files: bool,
}

impl Config {
    /// Configuration with defaults for everything but the required fields
    pub fn new(instance: InstanceConfig, attachment_filter: impl Into<String>) -> Self {
        Self {
            instance,
            attachment_filter: attachment_filter.into(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            log_file: None,
            concurrency: DEFAULT_CONCURRENCY,
            cache_owner_labels: false,
            keep_partial_files: false,
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from environment variables, command line overrides and defaults
    pub fn from_env(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(overrides, |name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    pub fn from_lookup<F>(overrides: &ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |value: &Option<String>, name: &'static str| -> Result<String, ConfigError> {
            value
                .clone()
                .or_else(|| lookup(name))
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingField(name))
        };

        let instance = InstanceConfig {
            host: required(&overrides.instance, ENV_INSTANCE)?,
            username: required(&overrides.username, ENV_USERNAME)?,
            password: required(&overrides.password, ENV_PASSWORD)?,
        };
        let attachment_filter = required(&overrides.filter, ENV_FILTER)?;

        let download_dir = overrides
            .download_dir
            .clone()
            .or_else(|| lookup(ENV_DOWNLOAD_DIR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

        let log_file = resolve_log_file(overrides, &lookup);

        let concurrency = match overrides.concurrency {
            Some(n) => n,
            None => parse_var(&lookup, ENV_CONCURRENCY)?.unwrap_or(DEFAULT_CONCURRENCY),
        };

        let cache_owner_labels = overrides.cache_owner_labels
            || parse_flag(&lookup, ENV_CACHE_OWNER_LABELS)?.unwrap_or(false);
        let keep_partial_files = overrides.keep_partial_files
            || parse_flag(&lookup, ENV_KEEP_PARTIAL_FILES)?.unwrap_or(false);

        let http_defaults = HttpConfig::default();
        let http = HttpConfig {
            timeout_seconds: parse_var(&lookup, ENV_HTTP_TIMEOUT_SECONDS)?
                .unwrap_or(http_defaults.timeout_seconds),
            user_agent: lookup(ENV_USER_AGENT).unwrap_or(http_defaults.user_agent),
        };

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: parse_var(&lookup, ENV_RETRY_MAX_ATTEMPTS)?
                .unwrap_or(retry_defaults.max_attempts),
            base_delay_ms: parse_var(&lookup, ENV_RETRY_BASE_DELAY_MS)?
                .unwrap_or(retry_defaults.base_delay_ms),
            max_delay_ms: parse_var(&lookup, ENV_RETRY_MAX_DELAY_MS)?
                .unwrap_or(retry_defaults.max_delay_ms),
        };

        let config = Config {
            instance,
            attachment_filter,
            download_dir,
            log_file,
            concurrency,
            cache_owner_labels,
            keep_partial_files,
            http,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Get HTTP timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.host.trim().is_empty() {
            return Err(ConfigError::MissingField(ENV_INSTANCE));
        }
        if self.instance.username.is_empty() {
            return Err(ConfigError::MissingField(ENV_USERNAME));
        }
        if self.attachment_filter.trim().is_empty() {
            return Err(ConfigError::MissingField(ENV_FILTER));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: ENV_CONCURRENCY,
                value: "0".to_string(),
                reason: "at least one download slot is required".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: ENV_RETRY_MAX_ATTEMPTS,
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Helper function to parse a variable as a specific type
/// Log file from the command line, else from the environment.
///
/// Available before the rest of the configuration is loaded or validated, so
/// logging can be set up first.
pub fn resolve_log_file<F>(overrides: &ConfigOverrides, lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    overrides
        .log_file
        .clone()
        .or_else(|| lookup(ENV_LOG_FILE).filter(|v| !v.is_empty()).map(PathBuf::from))
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value: val.clone(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                name,
                value: val,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn required_env() -> HashMap<String, String> {
        env(&[
            (ENV_INSTANCE, "dev1234.service-now.com"),
            (ENV_USERNAME, "admin"),
            (ENV_PASSWORD, "secret"),
            (ENV_FILTER, "table_name=incident"),
        ])
    }

    #[test]
    fn test_config_defaults() {
        let vars = required_env();
        let config =
            Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.download_dir, PathBuf::from("./attachments"));
        assert_eq!(config.concurrency, 5);
        assert!(config.log_file.is_none());
        assert!(!config.cache_owner_labels);
        assert!(!config.keep_partial_files);
        assert_eq!(config.http.timeout_seconds, 60);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_missing_required_field() {
        let mut vars = required_env();
        vars.remove(ENV_PASSWORD);
        let err = Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ENV_PASSWORD)));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = required_env();
        vars.insert(ENV_FILTER.to_string(), "   ".to_string());
        let err = Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ENV_FILTER)));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let vars = required_env();
        let overrides = ConfigOverrides {
            filter: Some("table_name=change_request".to_string()),
            concurrency: Some(2),
            cache_owner_labels: true,
            ..Default::default()
        };
        let config = Config::from_lookup(&overrides, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.attachment_filter, "table_name=change_request");
        assert_eq!(config.concurrency, 2);
        assert!(config.cache_owner_labels);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut vars = required_env();
        vars.insert(ENV_CONCURRENCY.to_string(), "many".to_string());
        let err = Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: ENV_CONCURRENCY, .. }));

        vars.insert(ENV_CONCURRENCY.to_string(), "0".to_string());
        let err = Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_log_file_resolution() {
        // Resolvable even when required fields are missing
        let vars = env(&[(ENV_LOG_FILE, "/var/log/snowgrab.log")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(
            resolve_log_file(&ConfigOverrides::default(), lookup),
            Some(PathBuf::from("/var/log/snowgrab.log"))
        );

        let overrides = ConfigOverrides {
            log_file: Some(PathBuf::from("run.log")),
            ..Default::default()
        };
        assert_eq!(resolve_log_file(&overrides, lookup), Some(PathBuf::from("run.log")));

        let blank = env(&[(ENV_LOG_FILE, "")]);
        assert_eq!(
            resolve_log_file(&ConfigOverrides::default(), |k| blank.get(k).cloned()),
            None
        );

        let mut vars = required_env();
        vars.insert(ENV_LOG_FILE.to_string(), "/var/log/snowgrab.log".to_string());
        let config = Config::from_lookup(&ConfigOverrides::default(), |k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/snowgrab.log")));
    }

    #[test]
    fn test_base_url() {
        let mut instance = InstanceConfig {
            host: "dev1234.service-now.com".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(instance.base_url(), "https://dev1234.service-now.com");

        instance.host = "http://127.0.0.1:8080/".to_string();
        assert_eq!(instance.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_password_is_redacted() {
        let instance = InstanceConfig {
            host: "h".to_string(),
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", instance).contains("hunter2"));
    }
}
