use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use verser_gateway::heartbeat::HEARTBEAT_INTERVAL;

/// Placeholder JWT secrets that MUST NOT be used with persistent storage.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Sqlite(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub storage: StorageBackend,
    pub jwt_secret: String,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("VERSER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("VERSER_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("VERSER_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let storage = match get("VERSER_STORAGE").as_deref().unwrap_or("sqlite") {
            "sqlite" => StorageBackend::Sqlite(
                get("VERSER_DB_PATH").unwrap_or_else(|| "verser.db".into()).into(),
            ),
            "memory" => StorageBackend::Memory,
            other => bail!("VERSER_STORAGE must be 'sqlite' or 'memory', got '{}'", other),
        };

        let jwt_secret = get("VERSER_JWT_SECRET").unwrap_or_default();
        let jwt_secret = if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            if storage != StorageBackend::Memory {
                bail!("VERSER_JWT_SECRET is unset or still a placeholder");
            }
            warn!("VERSER_JWT_SECRET not set, using the development secret");
            "dev-secret-change-me".to_string()
        } else {
            jwt_secret
        };

        let heartbeat = match get("VERSER_HEARTBEAT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().context("VERSER_HEARTBEAT_SECS must be an integer")?;
                if secs == 0 {
                    bail!("VERSER_HEARTBEAT_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => HEARTBEAT_INTERVAL,
        };

        Ok(Self {
            addr,
            storage,
            jwt_secret,
            heartbeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_a_real_secret() {
        let cfg = config(&[("VERSER_JWT_SECRET", "s3cr3t-value")]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.storage, StorageBackend::Sqlite("verser.db".into()));
        assert_eq!(cfg.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn sqlite_requires_a_non_placeholder_secret() {
        assert!(config(&[]).is_err());
        assert!(config(&[("VERSER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn memory_mode_falls_back_to_dev_secret() {
        let cfg = config(&[("VERSER_STORAGE", "memory")]).unwrap();
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.jwt_secret, "dev-secret-change-me");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("VERSER_STORAGE", "mongo"), ("VERSER_JWT_SECRET", "x1")]).is_err());
        assert!(config(&[("VERSER_PORT", "http"), ("VERSER_JWT_SECRET", "x1")]).is_err());
        assert!(config(&[("VERSER_HEARTBEAT_SECS", "0"), ("VERSER_JWT_SECRET", "x1")]).is_err());
    }

    #[test]
    fn heartbeat_is_configurable() {
        let cfg = config(&[("VERSER_STORAGE", "memory"), ("VERSER_HEARTBEAT_SECS", "5")]).unwrap();
        assert_eq!(cfg.heartbeat, Duration::from_secs(5));
    }
}
