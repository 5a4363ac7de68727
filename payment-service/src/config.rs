use anyhow::{bail, Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::consumer::{DEFAULT_LOG_CHANNEL, DEFAULT_REQUEST_CHANNEL};
use crate::oracle::DEFAULT_SUCCESS_RATIO;
use crate::publisher::DEFAULT_STATUS_CHANNEL;
use crate::queue::QueueNames;
use crate::worker::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub kvstore_url: String,
    pub in_memory_store: bool,
    pub queue_prefix: String,
    pub status_channel: String,
    pub request_channel: String,
    pub log_channel: String,
    pub dequeue_timeout: Duration,
    pub retry: RetryPolicy,
    pub supervisor_restarts: u32,
    pub supervisor_pause: Duration,
    pub success_ratio: f64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let host: IpAddr = host.parse().with_context(|| format!("HOST {host:?} is not an IP address"))?;
        let port = parse_or(&lookup, "PORT", 8080u16)?;

        let kvstore_url = match lookup("KVSTORE_URI") {
            Some(uri) => uri,
            None => {
                let kv_host = lookup("KVSTORE_HOST").unwrap_or_else(|| "localhost".to_string());
                let kv_port = parse_or(&lookup, "KVSTORE_PORT", 6379u16)?;
                format!("redis://{kv_host}:{kv_port}")
            }
        };
        let in_memory_store = lookup("KVSTORE_IN_MEMORY")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let queue_prefix = lookup("PAYMENT_QUEUE_PREFIX").unwrap_or_else(|| "payment".to_string());
        if queue_prefix.trim().is_empty() {
            bail!("PAYMENT_QUEUE_PREFIX must not be empty");
        }
        let status_channel =
            lookup("PAYMENT_STATUS_CHANNEL").unwrap_or_else(|| DEFAULT_STATUS_CHANNEL.to_string());
        let request_channel =
            lookup("PAYMENT_REQUEST_CHANNEL").unwrap_or_else(|| DEFAULT_REQUEST_CHANNEL.to_string());
        let log_channel = lookup("PAYMENT_LOG_CHANNEL").unwrap_or_else(|| DEFAULT_LOG_CHANNEL.to_string());

        let dequeue_timeout_secs = parse_or(&lookup, "PAYMENT_DEQUEUE_TIMEOUT_SECONDS", 3600u64)?;
        let max_retries = parse_or(&lookup, "PAYMENT_RETRY_MAX", 3u32)?;
        let base_delay_ms = parse_or(&lookup, "PAYMENT_RETRY_BASE_MS", 1000u64)?;
        let supervisor_restarts = parse_or(&lookup, "PAYMENT_SUPERVISOR_RESTARTS", 3u32)?;
        let supervisor_pause_secs = parse_or(&lookup, "PAYMENT_SUPERVISOR_PAUSE_SECONDS", 5u64)?;
        let success_ratio = parse_or(&lookup, "PAYMENT_SUCCESS_RATIO", DEFAULT_SUCCESS_RATIO)?;
        if !(0.0..=1.0).contains(&success_ratio) {
            bail!("PAYMENT_SUCCESS_RATIO must be within 0.0..=1.0, got {success_ratio}");
        }

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            kvstore_url,
            in_memory_store,
            queue_prefix,
            status_channel,
            request_channel,
            log_channel,
            dequeue_timeout: Duration::from_secs(dequeue_timeout_secs.max(1)),
            retry: RetryPolicy { max_retries, base_delay: Duration::from_millis(base_delay_ms) },
            supervisor_restarts,
            supervisor_pause: Duration::from_secs(supervisor_pause_secs),
            success_ratio,
        })
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames::with_prefix(&self.queue_prefix)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}")),
        None => Ok(default),
    }
}
