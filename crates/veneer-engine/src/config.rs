use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{RetryPolicy, DEFAULT_ENDPOINT};

pub const ENV_API_URL: &str = "VENEER_API_URL";
pub const ENV_RETRY_ATTEMPTS: &str = "VENEER_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "VENEER_RETRY_DELAY_MS";
pub const ENV_STORE: &str = "VENEER_STORE";

const STORE_FILE_NAME: &str = "storage.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub endpoint: String,
    pub retry: RetryPolicy,
    pub store_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            store_path: default_store_path(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();
        if let Some(endpoint) = read(ENV_API_URL) {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(attempts) = read(ENV_RETRY_ATTEMPTS).and_then(|raw| raw.parse::<u32>().ok()) {
            config.retry.max_attempts = attempts.clamp(1, 10);
        }
        if let Some(delay_ms) = read(ENV_RETRY_DELAY_MS).and_then(|raw| raw.parse::<u64>().ok()) {
            config.retry.delay = Duration::from_millis(delay_ms.min(60_000));
        }
        if let Some(path) = read(ENV_STORE) {
            config.store_path = PathBuf::from(path);
        }
        config
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("veneer").join(STORE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from("veneer-storage.json"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{EngineConfig, ENV_API_URL, ENV_RETRY_ATTEMPTS, ENV_RETRY_DELAY_MS, ENV_STORE};
    use crate::client::{DEFAULT_ENDPOINT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.retry.max_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.retry.delay, DEFAULT_RETRY_DELAY);
        assert!(config.store_path.ends_with("storage.json"));
    }

    #[test]
    fn environment_overrides_are_trimmed_and_clamped() {
        let config = config_from(&[
            (ENV_API_URL, " http://localhost:9000/models/sd/ "),
            (ENV_RETRY_ATTEMPTS, "50"),
            (ENV_RETRY_DELAY_MS, "250"),
            (ENV_STORE, "/tmp/veneer/state.json"),
        ]);
        assert_eq!(config.endpoint, "http://localhost:9000/models/sd");
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert_eq!(config.store_path, PathBuf::from("/tmp/veneer/state.json"));
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let config = config_from(&[(ENV_RETRY_ATTEMPTS, "many"), (ENV_API_URL, "   ")]);
        assert_eq!(config.retry.max_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn zero_attempts_still_sends_once() {
        let config = config_from(&[(ENV_RETRY_ATTEMPTS, "0")]);
        assert_eq!(config.retry.max_attempts, 1);
    }
}
