//! Configuration management for the inventory ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with LEDGER__ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::external::RetryPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT configuration used to identify the acting user
    pub jwt: JwtConfig,

    /// External sales analytics source
    pub analytics: AnalyticsConfig,

    /// Retry policy for calls to unreliable external dependencies
    pub retry: RetryPolicy,

    /// Ledger posting rules
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for verifying JWT tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Base URL of the analytics API
    pub base_url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// What happens when an outbound movement would take a balance below zero
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    #[default]
    Allow,
    Reject,
}

impl NegativeStockPolicy {
    /// Whether a movement of `quantity` ending at `balance_after` may post
    pub fn permits(&self, quantity: Decimal, balance_after: Decimal) -> bool {
        match self {
            NegativeStockPolicy::Allow => true,
            NegativeStockPolicy::Reject => quantity >= Decimal::ZERO || balance_after >= Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Applied to manual outbound movements and production consumption only
    pub negative_stock: NegativeStockPolicy,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("log_json", false)?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/stock_ledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("jwt.secret", "development-secret-key")?
            .set_default("analytics.base_url", "http://localhost:8081/api")?
            .set_default("analytics.timeout_secs", 30)?
            .set_default("analytics.api_key", "")?
            .set_default("retry.max_attempts", 4)?
            .set_default("retry.base_backoff_ms", 250)?
            .set_default("retry.max_backoff_ms", 8000)?
            .set_default("ledger.negative_stock", "allow")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER__ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
