//! Server configuration tests

use crewcomm_server::config::ServerConfig;
use std::env;

const CONFIG_VARS: &[&str] = &[
    "CC_HOST",
    "CC_PORT",
    "CC_DATABASE_URL",
    "CC_MAX_MESSAGE_SIZE",
    "CC_WS_PING_INTERVAL",
    "CC_MAX_CONNECTIONS",
    "CC_MAX_CONNECTIONS_PER_IP",
    "CC_CORS_ORIGINS",
    "CC_ADMIN_TOKEN",
];

fn clear_config_env() {
    for var in CONFIG_VARS {
        env::remove_var(var);
    }
}

// Environment mutation is process-global, so defaults, overrides and the
// failure case run sequentially inside one test.
#[test]
fn config_from_env() {
    clear_config_env();

    // Defaults
    let config = ServerConfig::from_env().expect("defaults must parse");
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8090);
    assert_eq!(config.database_url, "sqlite://./data/crewcomm.db");
    assert_eq!(config.max_message_size, 16384);
    assert_eq!(config.ws_ping_interval, 30);
    assert_eq!(config.max_connections, 2000);
    assert_eq!(config.max_connections_per_ip, 10);
    assert!(config.cors_origins.is_none());
    assert!(config.admin_token.is_none());

    // Overrides
    env::set_var("CC_HOST", "127.0.0.1");
    env::set_var("CC_PORT", "9000");
    env::set_var("CC_MAX_CONNECTIONS", "0");
    env::set_var("CC_CORS_ORIGINS", "https://app.example.com");
    env::set_var("CC_ADMIN_TOKEN", "sekrit");

    let config = ServerConfig::from_env().expect("overrides must parse");
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 9000);
    assert_eq!(config.max_connections, 0);
    assert_eq!(config.cors_origins.as_deref(), Some("https://app.example.com"));
    assert_eq!(config.admin_token.as_deref(), Some("sekrit"));

    // Invalid numeric value
    env::set_var("CC_PORT", "not_a_port");
    assert!(ServerConfig::from_env().is_err());

    clear_config_env();
}

#[test]
fn port_parsing() {
    let port = "8090".parse::<u16>();
    assert!(port.is_ok());
    assert_eq!(port.unwrap(), 8090u16);

    let invalid = "not_a_port".parse::<u16>();
    assert!(invalid.is_err());
}
