use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    pub payments: PaymentsConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub seat_hold_seconds: u64,
    pub hold_extension_seconds: u64,
    pub max_hold_extensions: u32,
    pub max_seats_per_session: usize,
    pub booking_cutoff_minutes: i64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
    #[serde(default = "default_reaper_batch")]
    pub reaper_batch_size: usize,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_reaper_interval() -> u64 { 15 }
fn default_reaper_batch() -> usize { 200 }
fn default_currency() -> String { "VND".to_string() }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: 600,
            hold_extension_seconds: 300,
            max_hold_extensions: 1,
            max_seats_per_session: 6,
            booking_cutoff_minutes: 30,
            reaper_interval_seconds: default_reaper_interval(),
            reaper_batch_size: default_reaper_batch(),
            currency: default_currency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub webhook_secret: String,
    pub checkout_base_url: String,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_failure_threshold: usize,
    #[serde(default = "default_breaker_reset")]
    pub circuit_reset_seconds: u64,
}

fn default_breaker_threshold() -> usize { 5 }
fn default_breaker_reset() -> u64 { 30 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Kafka is optional: without brokers, events are only logged.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // ROADLY__BUSINESS_RULES__SEAT_HOLD_SECONDS=300
            .add_source(config::Environment::with_prefix("ROADLY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
