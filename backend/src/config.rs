use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub base_url: String,
    /// Skips TLS certificate verification. Off unless asked for.
    pub accept_invalid_certs: bool,
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// How long a worker waits on an empty queue before looping again.
    pub pop_timeout: Duration,
    /// Sleep after a cycle that ended offline or undelivered.
    pub backoff: Duration,
    /// Requeue failed records at the head instead of the tail.
    pub preserve_order: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            pop_timeout: Duration::from_secs(1),
            backoff: Duration::from_secs(5),
            preserve_order: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    pub remote: RemoteSettings,
    pub probe_addr: String,
    pub probe_timeout: Option<Duration>,
    pub retry: RetrySettings,
    pub recover_unsynced: bool,
    pub cors_origin: Option<String>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let retry_defaults = RetrySettings::default();

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "data.db".to_string()),
            listen_addr: var("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            remote: RemoteSettings {
                base_url: var("REMOTE_BASE_URL")
                    .unwrap_or_else(|| "https://100.24.202.224".to_string()),
                accept_invalid_certs: parse(&var, "ACCEPT_INVALID_CERTS")?.unwrap_or(false),
                request_timeout: parse(&var, "REQUEST_TIMEOUT_SECS")?.map(Duration::from_secs),
            },
            probe_addr: var("PROBE_ADDR").unwrap_or_else(|| "www.google.com:80".to_string()),
            probe_timeout: parse(&var, "PROBE_TIMEOUT_MS")?.map(Duration::from_millis),
            retry: RetrySettings {
                pop_timeout: parse(&var, "POP_TIMEOUT_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.pop_timeout),
                backoff: parse(&var, "RETRY_BACKOFF_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.backoff),
                preserve_order: parse(&var, "PRESERVE_ORDER")?
                    .unwrap_or(retry_defaults.preserve_order),
            },
            recover_unsynced: parse(&var, "RECOVER_UNSYNCED")?.unwrap_or(true),
            cors_origin: var("CORS_ORIGIN").filter(|origin| !origin.is_empty()),
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("invalid value {raw:?} for {key}: {e}")),
    }
}
