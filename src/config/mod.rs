//! Relay configuration
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - Environment loading
//! - Defaults matching a stock deployment

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::credentials::DEFAULT_CLEARANCE_COOKIE;

pub const DEFAULT_UPSTREAM: &str = "https://mapleranks.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid url: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{key} must be an absolute http(s) url, got '{value}'")]
    UnsupportedScheme { key: &'static str, value: String },
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Everything the relay needs at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream: Url,
    pub user_agent: String,
    pub accept_language: String,
    pub listen_port: u16,
    /// Pause after navigation before cookies are read.
    pub settle_delay: Duration,
    pub debug_port: u16,
    pub executable_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub seed_credential: Option<String>,
    pub clearance_cookie: String,
    pub refresh_timeout: Duration,
    pub upstream_timeout: Duration,
    pub pull_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_duration: Duration,
    pub viewport: (u32, u32),
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: default_upstream(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            listen_port: 3000,
            settle_delay: Duration::from_millis(8_000),
            debug_port: 9223,
            executable_path: None,
            extra_args: Vec::new(),
            seed_credential: None,
            clearance_cookie: DEFAULT_CLEARANCE_COOKIE.to_string(),
            refresh_timeout: Duration::from_millis(60_000),
            upstream_timeout: Duration::from_millis(60_000),
            pull_timeout: Duration::from_millis(20_000),
            poll_interval: Duration::from_millis(3_000),
            poll_max_duration: Duration::from_millis(180_000),
            viewport: (1280, 800),
        }
    }
}

fn default_upstream() -> Url {
    match Url::parse(DEFAULT_UPSTREAM) {
        Ok(url) => url,
        Err(_) => unreachable!("default upstream is a valid url"),
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Unset and blank values fall back
    /// to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = get("UPSTREAM") {
            config.upstream = parse_upstream("UPSTREAM", &value)?;
        }
        if let Some(value) = get("UA") {
            config.user_agent = value;
        }
        if let Some(value) = get("ACCEPT_LANGUAGE") {
            config.accept_language = value;
        }
        if let Some(value) = get("PORT") {
            config.listen_port = parse_number("PORT", &value)?;
        }
        if let Some(value) = get("WAIT_MS") {
            config.settle_delay = parse_millis("WAIT_MS", &value)?;
        }
        if let Some(value) = get("DEBUG_PORT") {
            config.debug_port = parse_number("DEBUG_PORT", &value)?;
        }
        if let Some(value) =
            get("BROWSER_EXECUTABLE_PATH").or_else(|| get("PUPPETEER_EXECUTABLE_PATH"))
        {
            config.executable_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("BROWSER_ARGS").or_else(|| get("PUPPETEER_ARGS")) {
            config.extra_args = value.split_whitespace().map(str::to_string).collect();
        }
        config.seed_credential = get("CF_COOKIE");
        if let Some(value) = get("CLEARANCE_COOKIE") {
            config.clearance_cookie = value;
        }
        if let Some(value) = get("REFRESH_TIMEOUT_MS") {
            config.refresh_timeout = parse_millis("REFRESH_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("UPSTREAM_TIMEOUT_MS") {
            config.upstream_timeout = parse_millis("UPSTREAM_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("PULL_TIMEOUT_MS") {
            config.pull_timeout = parse_millis("PULL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = get("POLL_MAX_MS") {
            config.poll_max_duration = parse_millis("POLL_MAX_MS", &value)?;
        }

        Ok(config)
    }

    /// Host used as the refresh key.
    pub fn upstream_host(&self) -> String {
        self.upstream.host_str().unwrap_or_default().to_string()
    }
}

fn parse_upstream(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl { key, source })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::UnsupportedScheme {
            key,
            value: value.to_string(),
        });
    }
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

/// Fluent builder for [`RelayConfig`].
#[derive(Debug, Clone, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upstream(mut self, upstream: Url) -> Self {
        self.config.upstream = upstream;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.config.accept_language = accept_language.into();
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn with_debug_port(mut self, port: u16) -> Self {
        self.config.debug_port = port;
        self
    }

    pub fn with_executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable_path = Some(path.into());
        self
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seed_credential(mut self, header: impl Into<String>) -> Self {
        self.config.seed_credential = Some(header.into());
        self
    }

    pub fn with_clearance_cookie(mut self, name: impl Into<String>) -> Self {
        self.config.clearance_cookie = name.into();
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.refresh_timeout = timeout;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream_timeout = timeout;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.config.pull_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_poll_max_duration(mut self, max: Duration) -> Self {
        self.config.poll_max_duration = max;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = (width, height);
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.upstream.as_str(), "https://mapleranks.com/");
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.settle_delay, Duration::from_secs(8));
        assert_eq!(config.debug_port, 9223);
        assert_eq!(config.clearance_cookie, "cf_clearance");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.poll_max_duration, Duration::from_secs(180));
        assert!(config.seed_credential.is_none());
        assert!(config.extra_args.is_empty());
    }

    #[test]
    fn overrides_and_aliases_are_applied() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("UPSTREAM", "http://localhost:8080"),
            ("PORT", "4000"),
            ("WAIT_MS", "250"),
            ("PUPPETEER_EXECUTABLE_PATH", "/usr/bin/chromium"),
            ("BROWSER_ARGS", "--proxy-server=socks5://127.0.0.1:1080  --mute-audio"),
            ("CF_COOKIE", "cf_clearance=seed"),
            ("ACCEPT_LANGUAGE", "  "),
        ]))
        .unwrap();

        assert_eq!(config.upstream_host(), "localhost");
        assert_eq!(config.listen_port, 4000);
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.executable_path, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(
            config.extra_args,
            vec!["--proxy-server=socks5://127.0.0.1:1080", "--mute-audio"]
        );
        assert_eq!(config.seed_credential.as_deref(), Some("cf_clearance=seed"));
        assert_eq!(config.accept_language, DEFAULT_ACCEPT_LANGUAGE);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = RelayConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "PORT", .. }));

        let err = RelayConfig::from_lookup(lookup(&[("UPSTREAM", "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key: "UPSTREAM", .. }));

        let err =
            RelayConfig::from_lookup(lookup(&[("UPSTREAM", "ftp://example.com")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
    }

    #[test]
    fn builder_sets_fields() {
        let config = RelayConfig::builder()
            .with_listen_port(8081)
            .with_poll_interval(Duration::from_millis(10))
            .with_extra_args(["--headless=new"])
            .build();
        assert_eq!(config.listen_port, 8081);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.extra_args, vec!["--headless=new"]);
    }
}
