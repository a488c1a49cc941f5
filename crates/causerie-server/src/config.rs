//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./causerie.db`
    pub db_path: PathBuf,

    /// Shared secret for integrity tokens.
    /// Env: `INTEGRITY_SECRET`
    /// Default: a fixed development value (never use in production).
    pub integrity_secret: String,

    /// Optional JSON file seeding the in-memory user directory, follow
    /// graph, and block registry for standalone deployments.
    /// Env: `SEED_PATH`
    /// Default: none.
    pub seed_path: Option<PathBuf>,

    /// Per-user WebSocket frame budget: sustained frames per second.
    /// Env: `FRAME_RATE`
    /// Default: `20`
    pub frame_rate: f64,

    /// Per-user WebSocket frame budget: burst capacity.
    /// Env: `FRAME_BURST`
    /// Default: `60`
    pub frame_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Causerie"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: PathBuf::from("./causerie.db"),
            integrity_secret: "causerie-dev-secret".to_string(),
            seed_path: None,
            frame_rate: 20.0,
            frame_burst: 60.0,
            instance_name: "Causerie".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(secret) = std::env::var("INTEGRITY_SECRET") {
            if !secret.is_empty() {
                config.integrity_secret = secret;
            }
        }

        if let Ok(path) = std::env::var("SEED_PATH") {
            if !path.is_empty() {
                config.seed_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("FRAME_RATE") {
            if let Ok(rate) = val.parse::<f64>() {
                config.frame_rate = rate;
            }
        }

        if let Ok(val) = std::env::var("FRAME_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                config.frame_burst = burst;
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.db_path, PathBuf::from("./causerie.db"));
        assert!(config.seed_path.is_none());
    }
}
