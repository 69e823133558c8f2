use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use tandem_gateway::store::DEFAULT_STORE_TIMEOUT;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Upper bound on every durable store call.
    pub store_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("TANDEM_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TANDEM_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = lookup("TANDEM_DB_PATH")
            .unwrap_or_else(|| "tandem.db".into())
            .into();
        let host = lookup("TANDEM_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("TANDEM_PORT") {
            Some(v) => v.parse().with_context(|| format!("TANDEM_PORT is not a port: {v}"))?,
            None => 3000,
        };
        let store_timeout = match lookup("TANDEM_STORE_TIMEOUT_MS") {
            Some(v) => {
                let ms: u64 = v
                    .parse()
                    .with_context(|| format!("TANDEM_STORE_TIMEOUT_MS is not a number: {v}"))?;
                if ms == 0 {
                    bail!("TANDEM_STORE_TIMEOUT_MS must be positive");
                }
                Duration::from_millis(ms)
            }
            None => DEFAULT_STORE_TIMEOUT,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            store_timeout,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let cfg = config(&[("TANDEM_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("tandem.db"));
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert_eq!(cfg.addr().unwrap().port(), 3000);
    }

    #[test]
    fn placeholder_or_missing_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("TANDEM_JWT_SECRET", "")]).is_err());
        assert!(config(&[("TANDEM_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("TANDEM_JWT_SECRET", "a-real-secret"),
            ("TANDEM_DB_PATH", "/tmp/chat.db"),
            ("TANDEM_HOST", "127.0.0.1"),
            ("TANDEM_PORT", "8080"),
            ("TANDEM_STORE_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(cfg.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let secret = ("TANDEM_JWT_SECRET", "a-real-secret");
        assert!(config(&[secret, ("TANDEM_PORT", "http")]).is_err());
        assert!(config(&[secret, ("TANDEM_PORT", "70000")]).is_err());
        assert!(config(&[secret, ("TANDEM_STORE_TIMEOUT_MS", "soon")]).is_err());
        assert!(config(&[secret, ("TANDEM_STORE_TIMEOUT_MS", "0")]).is_err());
    }
}
