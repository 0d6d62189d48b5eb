use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub access_cache: AccessCacheConfig,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Full URL of the GraphQL endpoint (e.g. `https://ghe.corp.example.com/api/graphql`).
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    /// Name of the environment variable that holds the API token.
    ///
    /// The token needs enough scope to read repository collaborators;
    /// without it GitHub only reports collaborators on public repositories.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request timeout for access queries.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            token_env: default_token_env(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

// ---------------------------------------------------------------------------
// Access cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AccessCacheConfig {
    /// Idle TTL for repository entries.  `0s`, or any negative value,
    /// disables expiration.  Plain integers are read as seconds.
    #[serde(default = "default_ttl", deserialize_with = "deserialize_ttl")]
    pub ttl: Duration,
    /// Period of the background sweep that drops expired entries.  `0s`
    /// disables the sweeper; expired entries are then only dropped on read.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for AccessCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_ttl() -> Duration {
    crate::access::DEFAULT_TTL
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Parse a humantime TTL such as `5m`.  A leading `-` is accepted and maps to
/// zero, which disables expiration.
pub fn parse_ttl(s: &str) -> Result<Duration, humantime::DurationError> {
    let s = s.trim();
    match s.strip_prefix('-') {
        Some(magnitude) => {
            humantime::parse_duration(magnitude.trim_start()).map(|_| Duration::ZERO)
        }
        None => humantime::parse_duration(s),
    }
}

fn deserialize_ttl<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTtl {
        Seconds(i64),
        Text(String),
    }

    match RawTtl::deserialize(deserializer)? {
        RawTtl::Seconds(secs) => Ok(Duration::from_secs(u64::try_from(secs).unwrap_or(0))),
        RawTtl::Text(text) => parse_ttl(&text).map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.upstream.graphql_url.starts_with("http://")
            || config.upstream.graphql_url.starts_with("https://"),
        "upstream.graphql_url must be an http(s) URL"
    );
    anyhow::ensure!(
        !config.upstream.token_env.is_empty(),
        "upstream.token_env must not be empty"
    );
    anyhow::ensure!(
        !config.upstream.request_timeout.is_zero(),
        "upstream.request_timeout must be greater than zero"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = write_config("{}\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.upstream.graphql_url, "https://api.github.com/graphql");
        assert_eq!(config.upstream.token_env, "GITHUB_TOKEN");
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(10));
        assert_eq!(config.access_cache.ttl, Duration::from_secs(300));
        assert_eq!(config.access_cache.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn humantime_durations_are_parsed() {
        let file = write_config(
            r#"
upstream:
  graphql_url: https://ghe.example.com/api/graphql
  token_env: GHE_TOKEN
  request_timeout: 3s
access_cache:
  ttl: 90s
  sweep_interval: 0s
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.upstream.graphql_url, "https://ghe.example.com/api/graphql");
        assert_eq!(config.upstream.token_env, "GHE_TOKEN");
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(3));
        assert_eq!(config.access_cache.ttl, Duration::from_secs(90));
        assert!(config.access_cache.sweep_interval.is_zero());
    }

    #[test]
    fn zero_ttl_is_accepted() {
        let file = write_config("access_cache:\n  ttl: 0s\n");
        let config = load_config(file.path()).unwrap();
        assert!(config.access_cache.ttl.is_zero());
    }

    #[test]
    fn negative_ttl_maps_to_zero() {
        let file = write_config("access_cache:\n  ttl: -5s\n");
        let config = load_config(file.path()).unwrap();
        assert!(config.access_cache.ttl.is_zero());

        let file = write_config("access_cache:\n  ttl: -30\n");
        let config = load_config(file.path()).unwrap();
        assert!(config.access_cache.ttl.is_zero());
    }

    #[test]
    fn integer_ttl_is_seconds() {
        let file = write_config("access_cache:\n  ttl: 45\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.access_cache.ttl, Duration::from_secs(45));
    }

    #[test]
    fn parse_ttl_clamps_negative_and_rejects_garbage() {
        assert_eq!(parse_ttl("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_ttl("-1h").unwrap(), Duration::ZERO);
        assert!(parse_ttl("-soon").is_err());
        assert!(parse_ttl("forever").is_err());
    }

    #[test]
    fn rejects_non_http_graphql_url() {
        let file = write_config("upstream:\n  graphql_url: ftp://example.com\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("graphql_url"));
    }

    #[test]
    fn rejects_zero_request_timeout() {
        let file = write_config("upstream:\n  request_timeout: 0s\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/nonexistent/forgelock.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/forgelock.yaml"));
    }
}
