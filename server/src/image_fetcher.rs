use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use feed_mcp_core::error::AppError;
use feed_mcp_core::traits::{FetchedImage, ImageStore};
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Images larger than this are discarded and degraded to a link rather than
/// embedded.
pub const MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Consecutive failures against a single host before the breaker opens.
const FAILURE_THRESHOLD: u32 = 3;

/// State for one host's circuit breaker: an atomic failure counter plus the
/// epoch-millis timestamp the breaker opened at (0 = closed). Does not share
/// state with the feed fetcher's own rate limiter — different failure
/// domain, per-host image fetches fail independently of feed polling.
struct HostBreaker {
    failures: AtomicU32,
    opened_at_epoch_ms: AtomicI64,
}

impl HostBreaker {
    fn new() -> Self {
        Self {
            failures: AtomicU32::new(0),
            opened_at_epoch_ms: AtomicI64::new(0),
        }
    }

    fn is_open(&self, cooldown: Duration) -> bool {
        let opened_at = self.opened_at_epoch_ms.load(Ordering::Relaxed);
        if opened_at == 0 {
            return false;
        }
        let elapsed_ms = now_epoch_ms() - opened_at;
        if elapsed_ms >= cooldown.as_millis() as i64 {
            // cooldown elapsed: half-open, let the next attempt through and
            // reset bookkeeping so a string of successes closes it again.
            self.failures.store(0, Ordering::Relaxed);
            self.opened_at_epoch_ms.store(0, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        self.opened_at_epoch_ms.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= FAILURE_THRESHOLD {
            self.opened_at_epoch_ms.store(now_epoch_ms(), Ordering::Relaxed);
        }
    }
}

fn now_epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Bounded-size HTTP image fetch with MIME sniffing, an in-process
/// byte cache keyed by URL, and a per-host circuit breaker.
pub struct HttpImageFetcher {
    client: Client,
    cache: DashMap<String, FetchedImage>,
    breakers: DashMap<String, Arc<HostBreaker>>,
    cooldown: Duration,
    max_bytes: usize,
    max_cache_entries: usize,
}

impl HttpImageFetcher {
    pub fn new(cooldown_secs: u64, max_bytes: usize, max_cache_entries: usize) -> Self {
        let cooldown_secs = if cooldown_secs == 0 { 60 } else { cooldown_secs };
        let max_bytes = if max_bytes == 0 { MAX_IMAGE_BYTES } else { max_bytes };
        let max_cache_entries = if max_cache_entries == 0 { 1000 } else { max_cache_entries };
        Self {
            client: Client::builder()
                .user_agent("feed-mcp/0.1")
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build image fetcher http client"),
            cache: DashMap::new(),
            breakers: DashMap::new(),
            cooldown: Duration::from_secs(cooldown_secs),
            max_bytes,
            max_cache_entries,
        }
    }

    /// Crude but effective bound on the in-process cache: once full, clear
    /// it rather than track per-entry recency. Images are re-fetched on
    /// demand, so this only costs a round trip, never correctness.
    fn enforce_cache_bound(&self) {
        if self.cache.len() >= self.max_cache_entries {
            self.cache.clear();
        }
    }

    fn breaker_for(&self, host: &str) -> Arc<HostBreaker> {
        self.breakers.entry(host.to_string()).or_insert_with(|| Arc::new(HostBreaker::new())).clone()
    }

    fn sniff_mime(&self, url: &str, content_type: Option<&str>) -> String {
        if let Some(ct) = content_type {
            let ct = ct.split(';').next().unwrap_or(ct).trim();
            if ct.starts_with("image/") {
                return ct.to_string();
            }
        }
        mime_guess::from_path(url.split(['?', '#']).next().unwrap_or(url))
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

#[async_trait]
impl ImageStore for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError> {
        if let Some(cached) = self.cache.get(url) {
            return Ok(cached.clone());
        }

        let parsed = Url::parse(url).map_err(|e| AppError::network("image_fetch", "image_fetcher", url, e.to_string()))?;
        let host = parsed.host_str().unwrap_or("").to_string();
        let breaker = self.breaker_for(&host);

        if breaker.is_open(self.cooldown) {
            return Err(AppError::network(
                "image_fetch",
                "image_fetcher",
                url,
                format!("circuit breaker open for host {host}"),
            ));
        }

        match self.fetch_uncached(url).await {
            Ok(image) => {
                breaker.record_success();
                self.enforce_cache_bound();
                self.cache.insert(url.to_string(), image.clone());
                Ok(image)
            }
            Err(err) => {
                breaker.record_failure();
                Err(err)
            }
        }
    }
}

impl HttpImageFetcher {
    async fn fetch_uncached(&self, url: &str) -> Result<FetchedImage, AppError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::network("image_fetch", "image_fetcher", url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::network(
                "image_fetch",
                "image_fetcher",
                url,
                format!("unexpected status {}", response.status()),
            )
            .with_http_status(response.status().as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(AppError::network(
                    "image_fetch",
                    "image_fetcher",
                    url,
                    format!("declared size {len} exceeds {} byte cap", self.max_bytes),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response;
        while let Some(chunk) = stream
            .chunk()
            .await
            .map_err(|e| AppError::network("image_fetch", "image_fetcher", url, e.to_string()))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > self.max_bytes {
                return Err(AppError::network(
                    "image_fetch",
                    "image_fetcher",
                    url,
                    format!("response exceeded {} byte cap mid-stream", self.max_bytes),
                ));
            }
        }

        debug!(url, elapsed_ms = start.elapsed().as_millis() as u64, bytes = bytes.len(), "fetched image");

        let mime_type = self.sniff_mime(url, content_type.as_deref());
        Ok(FetchedImage { bytes, mime_type })
    }
}
