use std::env;
use std::time::Duration;

use clap::Parser;
use feed_mcp_core::error::AppError;

use crate::cache::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    HttpSse,
}

impl Transport {
    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "stdio" => Ok(Transport::Stdio),
            "http+sse" => Ok(Transport::HttpSse),
            other => Err(AppError::configuration(
                "transport",
                format!("unsupported transport {other:?}; expected \"stdio\" or \"http+sse\""),
            )),
        }
    }
}

/// CLI overrides for the environment-sourced configuration, mirroring the
/// aggregator's own `clap`-derived surface.
#[derive(Debug, Parser)]
#[command(name = "feed-mcp", about = "MCP server exposing aggregated syndication feeds")]
pub struct CliArgs {
    /// "stdio" or "http+sse"; overrides FEED_MCP_TRANSPORT.
    #[arg(long)]
    pub transport: Option<String>,
    /// Bind address for the http+sse transport; overrides FEED_MCP_HTTP_BIND.
    #[arg(long)]
    pub http_bind: Option<String>,
    /// Change-detection ticker interval in seconds; overrides FEED_MCP_CHANGE_DETECTION_INTERVAL_SECS.
    #[arg(long)]
    pub change_detection_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub http_bind: String,
    pub change_detection_interval: Duration,
    pub cache: CacheConfig,
    pub image_circuit_breaker_cooldown_secs: u64,
    pub image_fetch_max_bytes: usize,
    pub image_cache_max_entries: usize,
}

const DEFAULT_CHANGE_DETECTION_INTERVAL_SECS: u64 = 30;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8787";
const DEFAULT_IMAGE_CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 60;
const DEFAULT_IMAGE_FETCH_MAX_BYTES: usize = 1024 * 1024;
const DEFAULT_IMAGE_CACHE_MAX_ENTRIES: usize = 1000;

impl Config {
    /// Assembles configuration from environment variables, then applies any
    /// CLI overrides. Validation happens here, before any transport starts;
    /// an invalid required setting (only `transport`) is a fatal startup
    /// error. Non-positive TTL/size/threshold overrides fall back to their
    /// documented defaults rather than erroring.
    pub fn load(cli: CliArgs) -> Result<Self, AppError> {
        let transport_raw = cli
            .transport
            .or_else(|| env::var("FEED_MCP_TRANSPORT").ok())
            .unwrap_or_else(|| "stdio".to_string());
        let transport = Transport::parse(&transport_raw)?;

        let http_bind = cli
            .http_bind
            .or_else(|| env::var("FEED_MCP_HTTP_BIND").ok())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());

        let change_detection_interval_secs = cli
            .change_detection_interval_secs
            .or_else(|| env::var("FEED_MCP_CHANGE_DETECTION_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()))
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_CHANGE_DETECTION_INTERVAL_SECS);

        let cache = CacheConfig::from_overrides(
            env_i64("FEED_MCP_CACHE_ALL_TTL_SECS"),
            env_i64("FEED_MCP_CACHE_ITEMS_TTL_SECS"),
            env_i64("FEED_MCP_CACHE_META_TTL_SECS"),
            env_i64("FEED_MCP_CACHE_MAX_COST"),
        );

        let image_circuit_breaker_cooldown_secs = env_i64("FEED_MCP_IMAGE_CIRCUIT_BREAKER_COOLDOWN_SECS")
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_IMAGE_CIRCUIT_BREAKER_COOLDOWN_SECS);

        let image_fetch_max_bytes = env_i64("FEED_MCP_IMAGE_FETCH_MAX_BYTES")
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_IMAGE_FETCH_MAX_BYTES);

        let image_cache_max_entries = env_i64("FEED_MCP_IMAGE_CACHE_MAX_ENTRIES")
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_IMAGE_CACHE_MAX_ENTRIES);

        Ok(Self {
            transport,
            http_bind,
            change_detection_interval: Duration::from_secs(change_detection_interval_secs),
            cache,
            image_circuit_breaker_cooldown_secs,
            image_fetch_max_bytes,
            image_cache_max_entries,
        })
    }
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_transport() {
        let cli = CliArgs {
            transport: Some("carrier-pigeon".to_string()),
            http_bind: None,
            change_detection_interval_secs: None,
        };
        let err = Config::load(cli).unwrap_err();
        assert_eq!(err.kind, feed_mcp_core::error::ErrorKind::Configuration);
    }

    #[test]
    fn accepts_both_supported_transports() {
        for value in ["stdio", "http+sse"] {
            let cli = CliArgs {
                transport: Some(value.to_string()),
                http_bind: None,
                change_detection_interval_secs: None,
            };
            assert!(Config::load(cli).is_ok());
        }
    }

    #[test]
    fn non_positive_interval_override_falls_back_to_default() {
        let cli = CliArgs {
            transport: Some("stdio".to_string()),
            http_bind: None,
            change_detection_interval_secs: Some(0),
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.change_detection_interval, Duration::from_secs(DEFAULT_CHANGE_DETECTION_INTERVAL_SECS));
    }
}
