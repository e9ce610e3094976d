//! Service configuration.
//!
//! Configuration is sourced from an optional YAML file, overlaid with
//! environment variables: the dotted path of a key maps to
//! `FRN_<PATH_WITH_UNDERSCORES>` (e.g. `server.port` -> `FRN_SERVER_PORT`,
//! `queue.redis_url` -> `FRN_QUEUE_REDIS_URL`). Every leaf has a default, so
//! the service boots with no file at all.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

pub const ENV_PREFIX: &str = "FRN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for browser clients of the stream endpoint.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            permissive_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: String::new(),
            pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub redis_url: String,
    /// Key prefix isolating this deployment's queues in a shared redis.
    pub key_prefix: String,
    pub poll_interval_ms: u64,
    /// How many due items the scheduler promotes per tick.
    pub scheduler_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "frn".to_string(),
            poll_interval_ms: 500,
            scheduler_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Minimum delay after a provider reports rate limiting.
    pub rate_limited_floor_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            backoff_base_secs: 5,
            backoff_cap_secs: 300,
            rate_limited_floor_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushProviderConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub server_key: String,
    pub timeout_secs: u64,
}

impl Default for PushProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
            server_key: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailProviderConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_address: String,
    pub use_tls: bool,
    pub timeout_secs: u64,
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from_name: "FreeRangeNotify".to_string(),
            from_address: "no-reply@localhost".to_string(),
            use_tls: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsProviderConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub sender_id: String,
    pub timeout_secs: u64,
}

impl Default for SmsProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: String::new(),
            api_key: String::new(),
            sender_id: "FreeRange".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookProviderConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for WebhookProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub push: PushProviderConfig,
    pub email: EmailProviderConfig,
    pub sms: SmsProviderConfig,
    pub webhook: WebhookProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Per-connection write deadline; slow consumers past it are dropped.
    pub write_deadline_ms: u64,
    pub keepalive_secs: u64,
    /// Buffered frames per connection before the writer counts as slow.
    pub channel_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            write_deadline_ms: 1000,
            keepalive_secs: 15,
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationClientConfig {
    pub timeout_secs: u64,
    pub breaker_threshold: u32,
    pub breaker_reset_secs: u64,
}

impl Default for ValidationClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            breaker_threshold: 5,
            breaker_reset_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Accept a bare `user_id` query parameter on the stream endpoint.
    /// Development convenience; production tenants use zero-trust tokens.
    pub allow_user_id_query: bool,
    /// Presence record TTL.
    pub presence_ttl_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            allow_user_id_query: false,
            presence_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub providers: ProvidersConfig,
    pub broadcaster: BroadcasterConfig,
    pub validation: ValidationClientConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration: defaults, overlaid with the YAML file when given,
    /// overlaid with `FRN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Config, NotifyError> {
        let defaults = serde_yaml::to_value(Config::default()).map_err(|e| {
            NotifyError::Configuration {
                message: format!("failed to serialize defaults: {}", e),
            }
        })?;

        let from_file = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| NotifyError::Configuration {
                    message: format!("cannot read config file {}: {}", path.display(), e),
                })?;
                serde_yaml::from_str(&raw).map_err(|e| NotifyError::Configuration {
                    message: format!("invalid YAML in {}: {}", path.display(), e),
                })?
            }
            None => serde_yaml::Value::Mapping(Default::default()),
        };

        let mut merged = merge_values(defaults, from_file);
        apply_env_overrides(&mut merged, ENV_PREFIX);

        let config: Config =
            serde_yaml::from_value(merged).map_err(|e| NotifyError::Configuration {
                message: format!("invalid configuration: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.server.port == 0 {
            return Err(NotifyError::Configuration {
                message: "server.port must be non-zero".to_string(),
            });
        }
        if self.workers.count == 0 {
            return Err(NotifyError::Configuration {
                message: "workers.count must be at least 1".to_string(),
            });
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(NotifyError::Configuration {
                message: "queue.poll_interval_ms must be non-zero".to_string(),
            });
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_empty() {
            return Err(NotifyError::Configuration {
                message: "store.database_url is required for the postgres backend".to_string(),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(NotifyError::Configuration {
                message: format!(
                    "invalid logging.level {:?}, expected one of {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// Recursive merge where `overlay` wins on leaves.
fn merge_values(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, overlay_value) in overlay {
                let merged = match base.remove(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => overlay_value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

/// Replace leaves with values from `PREFIX_DOTTED_UNDERSCORED` variables.
fn apply_env_overrides(value: &mut serde_yaml::Value, prefix: &str) {
    let mut path = Vec::new();
    walk_env(value, prefix, &mut path);
}

fn walk_env(value: &mut serde_yaml::Value, prefix: &str, path: &mut Vec<String>) {
    use serde_yaml::Value;
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                if let Some(key) = key.as_str() {
                    path.push(key.to_string());
                    walk_env(child, prefix, path);
                    path.pop();
                }
            }
        }
        leaf => {
            let var = format!("{}_{}", prefix, path.join("_")).to_uppercase();
            if let Ok(raw) = std::env::var(&var) {
                *leaf = parse_scalar(&raw);
            }
        }
    }
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    use serde_yaml::Value;
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Number(serde_yaml::Number::from(f));
    }
    Value::String(raw.to_string())
}
