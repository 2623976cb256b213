//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Database URL
    pub database_url: String,
    /// Maximum message body size in bytes
    pub max_message_size: usize,
    /// WebSocket ping interval in seconds
    pub ws_ping_interval: u64,
    /// Maximum total WebSocket connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum WebSocket connections per IP address (0 = unlimited)
    pub max_connections_per_ip: usize,
    /// Comma-separated list of allowed CORS origins (empty = permissive)
    pub cors_origins: Option<String>,
    /// Bearer token for /admin/* endpoints (None = endpoints hidden)
    pub admin_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = ServerConfig {
            host: env::var("CC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CC_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .context("Invalid CC_PORT")?,
            database_url: env::var("CC_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/crewcomm.db".to_string()),
            max_message_size: env::var("CC_MAX_MESSAGE_SIZE")
                .unwrap_or_else(|_| "16384".to_string()) // 16KB
                .parse()
                .context("Invalid CC_MAX_MESSAGE_SIZE")?,
            ws_ping_interval: env::var("CC_WS_PING_INTERVAL")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid CC_WS_PING_INTERVAL")?,
            max_connections: env::var("CC_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("Invalid CC_MAX_CONNECTIONS")?,
            max_connections_per_ip: env::var("CC_MAX_CONNECTIONS_PER_IP")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid CC_MAX_CONNECTIONS_PER_IP")?,
            cors_origins: env::var("CC_CORS_ORIGINS").ok(),
            admin_token: env::var("CC_ADMIN_TOKEN").ok(),
        };

        Ok(config)
    }
}
