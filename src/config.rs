use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::proxy::validator::AllowlistPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: SizeLimits,
    pub timeouts: TimeoutPolicy,
    pub allowed_hosts: Vec<String>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads. `1` runs a current-thread runtime.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Byte budgets applied while reading upstream bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SizeLimits {
    pub chunk_size: usize,
    pub max_playlist_bytes: u64,
    pub max_segment_bytes: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            chunk_size: 128 * 1024,
            max_playlist_bytes: 10 * 1024 * 1024,
            max_segment_bytes: 200 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `-` logs through tracing, a path appends JSON lines, empty disables.
    pub access_log: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            access_log: "-".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the optional YAML file, then the environment.
    ///
    /// Runs before the async runtime exists, so the file is read synchronously.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path))?;

                serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables supplied by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.limits.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_PLAYLIST_BYTES") {
            self.limits.max_playlist_bytes = parse_env("MAX_PLAYLIST_BYTES", &v)?;
        }
        if let Some(v) = lookup("MAX_SEGMENT_BYTES") {
            self.limits.max_segment_bytes = parse_env("MAX_SEGMENT_BYTES", &v)?;
        }
        if let Some(v) = lookup("CONNECT_TIMEOUT") {
            self.timeouts.connect_timeout = duration_serde::parse_duration(&v)
                .map_err(|e| anyhow::anyhow!("Invalid CONNECT_TIMEOUT '{}': {}", v, e))?;
        }
        if let Some(v) = lookup("READ_TIMEOUT") {
            self.timeouts.read_timeout = duration_serde::parse_duration(&v)
                .map_err(|e| anyhow::anyhow!("Invalid READ_TIMEOUT '{}': {}", v, e))?;
        }
        if let Some(v) = lookup("ALLOWED_HOSTS") {
            self.allowed_hosts = v
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = lookup("WORKERS") {
            self.server.workers = parse_env("WORKERS", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("ACCESS_LOGFILE") {
            self.logging.access_log = v;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be zero");
        }

        if self.server.workers == 0 {
            anyhow::bail!("Worker count cannot be zero");
        }

        if self.limits.chunk_size == 0 {
            anyhow::bail!("CHUNK_SIZE cannot be zero");
        }

        if self.limits.max_playlist_bytes == 0 || self.limits.max_segment_bytes == 0 {
            anyhow::bail!("Byte limits cannot be zero");
        }

        if self.timeouts.connect_timeout.is_zero() || self.timeouts.read_timeout.is_zero() {
            anyhow::bail!("Timeouts cannot be zero");
        }

        for host in &self.allowed_hosts {
            if host == "*." || host == "*" {
                anyhow::bail!("Allowed host pattern '{}' has an empty suffix", host);
            }
        }

        Ok(())
    }

    /// Build the immutable allowlist shared by request handlers.
    pub fn allowlist(&self) -> AllowlistPolicy {
        AllowlistPolicy::new(self.allowed_hosts.iter().map(String::as_str))
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, value, e))
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs_f64()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => seconds(secs).map_err(serde::de::Error::custom),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Accepts plain (possibly fractional) seconds or `ms`/`s`/`m` suffixes.
    pub fn parse_duration(
        s: &str,
    ) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        let s = s.trim();
        if let Some(num) = s.strip_suffix("ms") {
            let num: f64 = num.trim().parse()?;
            seconds(num / 1000.0)
        } else if let Some(num) = s.strip_suffix('s') {
            seconds(num.trim().parse()?)
        } else if let Some(num) = s.strip_suffix('m') {
            let num: f64 = num.trim().parse()?;
            seconds(num * 60.0)
        } else {
            seconds(s.parse()?)
        }
    }

    fn seconds(
        secs: f64,
    ) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        Duration::try_from_secs_f64(secs).map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.limits.chunk_size, 131072);
        assert_eq!(config.limits.max_playlist_bytes, 10 * 1024 * 1024);
        assert_eq!(config.limits.max_segment_bytes, 200 * 1024 * 1024);
        assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.timeouts.read_timeout, Duration::from_secs(20));
        assert!(config.allowed_hosts.is_empty());
        assert_eq!(config.server.port, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("CHUNK_SIZE", "4096"),
                ("MAX_PLAYLIST_BYTES", "1024"),
                ("MAX_SEGMENT_BYTES", "8192"),
                ("CONNECT_TIMEOUT", "2.5"),
                ("READ_TIMEOUT", "750ms"),
                ("ALLOWED_HOSTS", " CDN.example.com, *.akamai.net ,,"),
                ("WORKERS", "1"),
            ]))
            .unwrap();

        assert_eq!(config.limits.chunk_size, 4096);
        assert_eq!(config.limits.max_playlist_bytes, 1024);
        assert_eq!(config.limits.max_segment_bytes, 8192);
        assert_eq!(config.timeouts.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.timeouts.read_timeout, Duration::from_millis(750));
        assert_eq!(config.allowed_hosts, vec!["CDN.example.com", "*.akamai.net"]);
        assert_eq!(config.server.workers, 1);

        let policy = config.allowlist();
        assert!(policy.is_allowed("cdn.example.com"));
        assert!(policy.is_allowed("edge.akamai.net"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("CHUNK_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CHUNK_SIZE"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.limits.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_wildcard() {
        let mut config = Config::default();
        config.allowed_hosts = vec!["*.".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
server:
  port: 8080
limits:
  chunk_size: 65536
timeouts:
  connect_timeout: "3s"
  read_timeout: 12.5
allowed_hosts:
  - "*.example.com"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.limits.chunk_size, 65536);
        assert_eq!(config.limits.max_segment_bytes, 200 * 1024 * 1024);
        assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.timeouts.read_timeout, Duration::from_millis(12500));
        assert_eq!(config.allowed_hosts, vec!["*.example.com"]);
    }
}
