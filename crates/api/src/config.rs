use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEV_API_KEY: &str = "dev-api-key";

/// Process configuration loaded from environment variables (and `.env`).
#[derive(Clone)]
pub struct ApiConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub api_key: String,
    pub bind_addr: SocketAddr,
    pub lock_timeout: Duration,
    pub db_max_connections: u32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL");
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on exit)");
        }

        let api_key = var("API_KEY").unwrap_or_else(|| {
            tracing::warn!("API_KEY not set; using insecure dev default");
            DEV_API_KEY.to_string()
        });

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address such as 0.0.0.0:8000")?;

        let lock_timeout_ms = match var("LOCK_TIMEOUT_MS") {
            Some(v) => v
                .parse::<u64>()
                .context("LOCK_TIMEOUT_MS must be a whole number of milliseconds")?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        let db_max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse::<u32>()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        let config = Self {
            database_url,
            api_key,
            bind_addr,
            lock_timeout: Duration::from_millis(lock_timeout_ms.max(1)),
            db_max_connections: db_max_connections.max(1),
        };
        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(3).collect();
            format!("{head}... ({} chars)", val.chars().count())
        }

        tracing::info!(
            bind_addr = %self.bind_addr,
            store = if self.database_url.is_some() { "postgres" } else { "in_memory" },
            lock_timeout_ms = self.lock_timeout.as_millis() as u64,
            db_max_connections = self.db_max_connections,
            api_key = %preview(&self.api_key),
            "configuration loaded"
        );
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("api_key", &"<redacted>")
            .field("bind_addr", &self.bind_addr)
            .field("lock_timeout", &self.lock_timeout)
            .field("db_max_connections", &self.db_max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.api_key, DEV_API_KEY);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(cfg.lock_timeout, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
        assert_eq!(cfg.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/booking"),
            ("API_KEY", " s3cret "),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("DB_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/booking"));
        assert_eq!(cfg.api_key, "s3cret");
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.db_max_connections, 4);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("DATABASE_URL", "  "), ("API_KEY", "")]).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.api_key, DEV_API_KEY);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(config(&[("LOCK_TIMEOUT_MS", "soon")]).is_err());
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = config(&[("API_KEY", "s3cret"), ("DATABASE_URL", "postgres://u:pw@h/db")]).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("pw@"));
    }
}
