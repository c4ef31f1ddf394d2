//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::auth::{DEFAULT_LOGIN_PATH, RefreshPolicy};

pub const DEFAULT_API_URL: &str = "http://localhost:8090/api/v1";
pub const DEFAULT_STORAGE_DIR: &str = ".sgcd-pm";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend API base URL
    /// Example: http://localhost:8090/api/v1
    pub api_url: String,

    /// Directory holding one session file per backend origin
    pub storage_dir: PathBuf,

    /// Refresh once the token has this many seconds or fewer left
    pub refresh_threshold_secs: i64,

    /// Back-off after a failed refresh while the old token is still valid
    pub refresh_retry_secs: i64,

    /// Where logout and denied navigation lead
    pub login_path: String,

    /// Per-request timeout; 0 disables it
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    /// Unset or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests need not touch the process env
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::defaults();

        Self {
            api_url: lookup("SGCD_PM_API_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.api_url),
            storage_dir: lookup("SGCD_PM_STORAGE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            refresh_threshold_secs: parse_var(&lookup, "SGCD_PM_REFRESH_THRESHOLD_SECS")
                .unwrap_or(defaults.refresh_threshold_secs),
            refresh_retry_secs: parse_var(&lookup, "SGCD_PM_REFRESH_RETRY_SECS")
                .unwrap_or(defaults.refresh_retry_secs),
            login_path: lookup("SGCD_PM_LOGIN_PATH")
                .filter(|v| v.starts_with('/'))
                .unwrap_or(defaults.login_path),
            http_timeout_secs: parse_var(&lookup, "SGCD_PM_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    /// Built-in values, independent of the environment
    pub fn defaults() -> Self {
        let policy = RefreshPolicy::default();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            refresh_threshold_secs: policy.threshold_secs,
            refresh_retry_secs: policy.retry_after_secs,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    /// Check if a request timeout is configured
    pub fn has_http_timeout(&self) -> bool {
        self.http_timeout_secs > 0
    }

    /// Check if failed refreshes are rate limited
    pub fn has_refresh_backoff(&self) -> bool {
        self.refresh_retry_secs > 0
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.has_http_timeout()
            .then(|| Duration::from_secs(self.http_timeout_secs))
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::default()
            .threshold(self.refresh_threshold_secs)
            .retry_after(self.refresh_retry_secs)
    }

    /// Scheme, host and port of the API URL, used to key the session file.
    /// Falls back to the whole URL when it has no path component.
    pub fn api_origin(&self) -> &str {
        let url = self.api_url.as_str();
        let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
        match url[after_scheme..].find('/') {
            Some(i) => &url[..after_scheme + i],
            None => url,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    // ========================================================================
    // Config Struct Tests (no env var dependencies - thread safe)
    // ========================================================================

    #[test]
    fn test_config_with_no_vars_uses_defaults() {
        let config = config_from(&[]);

        assert_eq!(config, Config::defaults());
        assert_eq!(config.api_url, "http://localhost:8090/api/v1");
        assert_eq!(config.storage_dir, PathBuf::from(".sgcd-pm"));
        assert_eq!(config.refresh_threshold_secs, 60);
        assert_eq!(config.refresh_retry_secs, 0);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_config_with_all_vars() {
        let config = config_from(&[
            ("SGCD_PM_API_URL", "https://pm.example.com/api/v2"),
            ("SGCD_PM_STORAGE_DIR", "/tmp/sessions"),
            ("SGCD_PM_REFRESH_THRESHOLD_SECS", "120"),
            ("SGCD_PM_REFRESH_RETRY_SECS", "15"),
            ("SGCD_PM_LOGIN_PATH", "/signin"),
            ("SGCD_PM_HTTP_TIMEOUT_SECS", "5"),
        ]);

        assert_eq!(config.api_url, "https://pm.example.com/api/v2");
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.refresh_threshold_secs, 120);
        assert_eq!(config.refresh_retry_secs, 15);
        assert_eq!(config.login_path, "/signin");
        assert_eq!(config.http_timeout_secs, 5);
    }

    #[test]
    fn test_config_with_invalid_values_falls_back() {
        let config = config_from(&[
            ("SGCD_PM_API_URL", "  "),
            ("SGCD_PM_REFRESH_THRESHOLD_SECS", "soon"),
            ("SGCD_PM_LOGIN_PATH", "login"),
            ("SGCD_PM_HTTP_TIMEOUT_SECS", "-1"),
        ]);

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.refresh_threshold_secs, 60);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_has_http_timeout() {
        let with = config_from(&[("SGCD_PM_HTTP_TIMEOUT_SECS", "10")]);
        let without = config_from(&[("SGCD_PM_HTTP_TIMEOUT_SECS", "0")]);

        assert!(with.has_http_timeout());
        assert_eq!(with.http_timeout(), Some(Duration::from_secs(10)));
        assert!(!without.has_http_timeout());
        assert_eq!(without.http_timeout(), None);
    }

    #[test]
    fn test_has_refresh_backoff() {
        assert!(!config_from(&[]).has_refresh_backoff());
        assert!(config_from(&[("SGCD_PM_REFRESH_RETRY_SECS", "30")]).has_refresh_backoff());
    }

    #[test]
    fn test_refresh_policy() {
        let config = config_from(&[
            ("SGCD_PM_REFRESH_THRESHOLD_SECS", "90"),
            ("SGCD_PM_REFRESH_RETRY_SECS", "10"),
        ]);

        let policy = config.refresh_policy();

        assert_eq!(policy.threshold_secs, 90);
        assert_eq!(policy.retry_after_secs, 10);
    }

    #[test]
    fn test_api_origin() {
        let config = config_from(&[("SGCD_PM_API_URL", "http://localhost:8090/api/v1")]);
        assert_eq!(config.api_origin(), "http://localhost:8090");

        let bare = config_from(&[("SGCD_PM_API_URL", "https://pm.example.com")]);
        assert_eq!(bare.api_origin(), "https://pm.example.com");
    }

    #[test]
    fn test_config_from_env_reads_process_env() {
        // Actual values depend on environment, so compare against a direct read
        let config = Config::from_env();

        assert_eq!(config, Config::from_lookup(|key| std::env::var(key).ok()));
        assert!(!config.api_url.is_empty());
        assert!(config.login_path.starts_with('/'));
        assert_eq!(
            config.refresh_policy().threshold_secs,
            config.refresh_threshold_secs
        );
    }

    #[test]
    fn test_config_default_calls_from_env() {
        assert_eq!(Config::default(), Config::from_env());
    }

    #[test]
    fn test_defaults_follow_refresh_policy() {
        let defaults = Config::defaults();

        assert_eq!(defaults.refresh_policy(), RefreshPolicy::default());
    }
}
