//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Server address could not be parsed
    Addr(std::net::AddrParseError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Addr(e) => write!(f, "Invalid server address: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<std::net::AddrParseError> for ConfigError {
    fn from(e: std::net::AddrParseError) -> Self {
        ConfigError::Addr(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind the scheduler API to (default 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind the scheduler API to (default 7878)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Resolve host and port into a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }
}

/// Simulated transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    /// Virtual processing time per session in milliseconds (default 3000)
    #[serde(default = "default_session_duration_ms")]
    pub session_duration_ms: u64,
}

fn default_session_duration_ms() -> u64 {
    3000
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            session_duration_ms: default_session_duration_ms(),
        }
    }
}

impl TranscoderConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SCHEDULER_SERVER_HOST -> server.host
    /// - SCHEDULER_SERVER_PORT -> server.port
    /// - SCHEDULER_SESSION_DURATION_MS -> transcoder.session_duration_ms
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SCHEDULER_SERVER_HOST") {
            if !val.is_empty() {
                self.server.host = val;
            }
        }

        if let Ok(val) = env::var("SCHEDULER_SERVER_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("SCHEDULER_SESSION_DURATION_MS") {
            if let Ok(duration_ms) = val.parse::<u64>() {
                self.transcoder.session_duration_ms = duration_ms;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("SCHEDULER_SERVER_HOST");
        env::remove_var("SCHEDULER_SERVER_PORT");
        env::remove_var("SCHEDULER_SESSION_DURATION_MS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            port in 1u16..u16::MAX,
            duration_ms in 1u64..600_000,
        ) {
            let toml_str = format!(
                r#"
[server]
host = "0.0.0.0"
port = {}

[transcoder]
session_duration_ms = {}
"#,
                port, duration_ms
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.server.host, "0.0.0.0");
            prop_assert_eq!(config.server.port, port);
            prop_assert_eq!(config.transcoder.session_duration_ms, duration_ms);
        }

        #[test]
        fn prop_env_overrides_server_port(
            initial_port in 1u16..u16::MAX,
            override_port in 1u16..u16::MAX,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[server]
port = {}
"#,
                initial_port
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SCHEDULER_SERVER_PORT", override_port.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.server.port, override_port);
        }

        #[test]
        fn prop_env_overrides_session_duration(
            initial_ms in 1u64..600_000,
            override_ms in 1u64..600_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[transcoder]
session_duration_ms = {}
"#,
                initial_ms
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SCHEDULER_SESSION_DURATION_MS", override_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.transcoder.session_duration_ms, override_ms);
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7878);
        assert_eq!(config.transcoder.session_duration_ms, 3000);
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[server]
port = 9000
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.server.host, "127.0.0.1"); // default
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.transcoder.session_duration_ms, 3000); // default
    }

    #[test]
    fn test_env_override_host() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SCHEDULER_SERVER_HOST", "0.0.0.0");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_socket_addr_resolution() {
        let config = Config::default();
        let addr = config.server.socket_addr().expect("Default address is valid");
        assert_eq!(addr.to_string(), "127.0.0.1:7878");

        let bad = ServerConfig {
            host: "not-an-address".to_string(),
            port: 80,
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_session_duration_conversion() {
        let transcoder = TranscoderConfig {
            session_duration_ms: 1500,
        };
        assert_eq!(transcoder.session_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_toml_fails() {
        assert!(Config::parse_toml("[server\nport = ]").is_err());
    }
}
