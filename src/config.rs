use crate::error::SyncError;
use crate::store::resolver::DEFAULT_SUFFIX_LEN;
use crate::tasks::supervisor::RetryPolicy;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Floor for any retry delay, so a zero setting can't hammer the endpoint
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server_url: String,
    pub push_addr: String,
    pub retry: RetryPolicy,
    // Attempts before a terminal failure is reported. `None` retries forever without reporting.
    pub max_attempts: Option<u32>,
    pub connect_timeout: Duration,
    pub refresh_timeout: Duration,
    pub refresh_interval: Option<Duration>,
    pub refresh_on_unknown_delta: bool,
    pub suffix_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            push_addr: "127.0.0.1:3001".to_string(),
            retry: RetryPolicy::Fixed(Duration::from_secs(3)),
            max_attempts: None,
            connect_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
            refresh_interval: None,
            refresh_on_unknown_delta: false,
            suffix_len: DEFAULT_SUFFIX_LEN,
        }
    }
}

impl SyncConfig {
    // Load from the process environment (call `dotenvy::dotenv()` first to pick up `.env`)
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_vars(env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, SyncError> {
        let defaults = Self::default();

        let retry_floor = parse::<u64>(&vars, "POLL_SYNC_RETRY_MS")?
            .map(Duration::from_millis)
            .unwrap_or_else(|| defaults.retry.floor());
        let retry = match parse::<u64>(&vars, "POLL_SYNC_RETRY_MAX_MS")? {
            Some(max_ms) => RetryPolicy::Exponential {
                base: retry_floor,
                max: Duration::from_millis(max_ms),
            },
            None => RetryPolicy::Fixed(retry_floor),
        };

        Ok(Self {
            server_url: vars
                .get("POLL_SYNC_SERVER_URL")
                .cloned()
                .unwrap_or(defaults.server_url),
            push_addr: vars
                .get("POLL_SYNC_PUSH_ADDR")
                .cloned()
                .unwrap_or(defaults.push_addr),
            retry: retry.clamped(MIN_RETRY_INTERVAL),
            max_attempts: parse(&vars, "POLL_SYNC_MAX_ATTEMPTS")?,
            connect_timeout: parse::<u64>(&vars, "POLL_SYNC_CONNECT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            refresh_timeout: parse::<u64>(&vars, "POLL_SYNC_REFRESH_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_timeout),
            refresh_interval: parse::<u64>(&vars, "POLL_SYNC_REFRESH_INTERVAL_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            refresh_on_unknown_delta: parse(&vars, "POLL_SYNC_REFRESH_ON_UNKNOWN")?
                .unwrap_or(defaults.refresh_on_unknown_delta),
            suffix_len: parse(&vars, "POLL_SYNC_SUFFIX_LEN")?.unwrap_or(defaults.suffix_len),
        })
    }
}

fn parse<T>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|raw| raw.trim()).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = SyncConfig::from_vars(HashMap::new()).unwrap();

        assert_eq!(config.server_url, "http://localhost:3000");
        assert_eq!(config.retry, RetryPolicy::Fixed(Duration::from_secs(3)));
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.refresh_interval, None);
        assert_eq!(config.suffix_len, 6);
    }

    #[test]
    fn backoff_and_caps_from_environment() {
        let config = SyncConfig::from_vars(vars(&[
            ("POLL_SYNC_RETRY_MS", "0"),
            ("POLL_SYNC_RETRY_MAX_MS", "30000"),
            ("POLL_SYNC_MAX_ATTEMPTS", "10"),
            ("POLL_SYNC_REFRESH_INTERVAL_SECS", "60"),
            ("POLL_SYNC_REFRESH_ON_UNKNOWN", "true"),
        ]))
        .unwrap();

        assert_eq!(
            config.retry,
            RetryPolicy::Exponential {
                base: MIN_RETRY_INTERVAL,
                max: Duration::from_secs(30),
            }
        );
        assert_eq!(config.max_attempts, Some(10));
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(60)));
        assert!(config.refresh_on_unknown_delta);
    }

    #[test]
    fn garbage_values_are_config_errors() {
        let err = SyncConfig::from_vars(vars(&[("POLL_SYNC_MAX_ATTEMPTS", "lots")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(ref msg) if msg.contains("POLL_SYNC_MAX_ATTEMPTS")));
    }
}
