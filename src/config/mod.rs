use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::infra::store::TxnPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub store_driver: String,
    pub database_url: Option<String>,
    pub queue_enabled: bool,
    pub queue_endpoint: String,
    pub queue_region: String,
    pub queue_name: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub paseto_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub follower_limit: usize,
    pub txn_max_attempts: u32,
    pub txn_backoff_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        SocketAddr::from_str(&http_addr).map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let store_driver = env_or("STORE_DRIVER", "postgres");

        Ok(Self {
            http_addr,
            store_driver,
            database_url: std::env::var("DATABASE_URL").ok(),
            queue_enabled: env_or_parse("QUEUE_EVENTS_ENABLED", "false")?,
            queue_endpoint: env_or("QUEUE_ENDPOINT", "http://localhost:4566"),
            queue_region: env_or("QUEUE_REGION", "us-east-1"),
            queue_name: env_or("QUEUE_NAME", "relationship-events"),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            paseto_key: env_key_32("PASETO_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            follower_limit: env_or_parse("FOLLOWER_LIMIT", "5000")?,
            txn_max_attempts: env_or_parse("TXN_MAX_ATTEMPTS", "4")?,
            txn_backoff_ms: env_or_parse("TXN_BACKOFF_MS", "25")?,
        })
    }

    pub fn txn_policy(&self) -> TxnPolicy {
        TxnPolicy {
            max_attempts: self.txn_max_attempts,
            backoff: Duration::from_millis(self.txn_backoff_ms),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
