//! Application configuration

use std::env;

/// Configuration loaded from environment variables at startup
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub app_base_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Payment provider
    pub stripe_secret_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::Invalid(
                        "JWT_SECRET must be at least 32 bytes",
                    ));
                }
                secret
            },

            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
