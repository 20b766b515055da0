use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// Push is disabled when unset.
    pub fcm_server_key: Option<String>,
    pub fcm_endpoint: String,
    pub push_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = get("COURIER_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("COURIER_PORT must be a port number")?;
        let token_ttl_days: i64 = get("COURIER_TOKEN_TTL_DAYS")
            .unwrap_or_else(|| "30".into())
            .parse()
            .context("COURIER_TOKEN_TTL_DAYS must be an integer")?;
        if token_ttl_days <= 0 {
            bail!("COURIER_TOKEN_TTL_DAYS must be positive");
        }
        let push_timeout_secs: u64 = get("COURIER_PUSH_TIMEOUT_SECS")
            .unwrap_or_else(|| "10".into())
            .parse()
            .context("COURIER_PUSH_TIMEOUT_SECS must be an integer")?;

        Ok(Self {
            host: get("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            jwt_secret,
            token_ttl_days,
            fcm_server_key: get("COURIER_FCM_SERVER_KEY").filter(|k| !k.trim().is_empty()),
            fcm_endpoint: get("COURIER_FCM_ENDPOINT").unwrap_or_else(|| DEFAULT_FCM_ENDPOINT.into()),
            push_timeout: Duration::from_secs(push_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let config = load(&[("COURIER_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("courier.db"));
        assert_eq!(config.token_ttl_days, 30);
        assert!(config.fcm_server_key.is_none());
        assert_eq!(config.fcm_endpoint, DEFAULT_FCM_ENDPOINT);
        assert_eq!(config.push_timeout, Duration::from_secs(10));
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("COURIER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_reported() {
        assert!(load(&[("COURIER_JWT_SECRET", "s"), ("COURIER_PORT", "http")]).is_err());
        assert!(load(&[("COURIER_JWT_SECRET", "s"), ("COURIER_TOKEN_TTL_DAYS", "0")]).is_err());
    }
}
