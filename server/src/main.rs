use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feed_mcp_server::cache::ResourceCache;
use feed_mcp_server::config::{CliArgs, Config, Transport};
use feed_mcp_server::feed_store::InMemoryFeedStore;
use feed_mcp_server::image_fetcher::HttpImageFetcher;
use feed_mcp_server::protocol::{log_startup_error, run_change_detection_loop};
use feed_mcp_server::resource_manager::ResourceManager;
use feed_mcp_server::tools::FeedMcpServer;
use rmcp::ServiceExt;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = match Config::load(CliArgs::parse()) {
        Ok(config) => config,
        Err(err) => {
            log_startup_error(&err);
            return ExitCode::FAILURE;
        }
    };

    info!(transport = ?config.transport, "starting feed-mcp");

    let feed_store: Arc<InMemoryFeedStore> = Arc::new(InMemoryFeedStore::new());
    let image_store = Arc::new(HttpImageFetcher::new(
        config.image_circuit_breaker_cooldown_secs,
        config.image_fetch_max_bytes,
        config.image_cache_max_entries,
    ));
    let cache = Arc::new(ResourceCache::new(config.cache.clone()));
    let resource_manager = Arc::new(ResourceManager::new(feed_store.clone(), image_store, cache.clone()));
    wire_cache_invalidation(&cache, &resource_manager);
    let server = FeedMcpServer::new(resource_manager.clone(), feed_store.clone(), feed_store);

    tokio::spawn(run_change_detection_loop(server.clone(), config.change_detection_interval));

    let result = match config.transport {
        Transport::Stdio => run_stdio(server).await,
        Transport::HttpSse => run_http_sse(server, &config.http_bind).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

/// Installs the cache-invalidation hook that marks pending notifications on
/// the resource manager: every real `cache.delete()`/`cache.clear()` now
/// drives change detection, not just the hand-invoked test path.
fn wire_cache_invalidation(cache: &Arc<ResourceCache>, resource_manager: &Arc<ResourceManager>) {
    let resource_manager = resource_manager.clone();
    cache.register_hook(Arc::new(move |identifier: &str| {
        let resource_manager = resource_manager.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move {
            resource_manager.on_cache_invalidated(&identifier).await;
        });
    }));
}

async fn run_stdio(server: FeedMcpServer) -> Result<()> {
    let service = server.serve(rmcp::transport::stdio()).await.context("failed to start stdio transport")?;
    service.waiting().await.context("stdio transport terminated with an error")?;
    Ok(())
}

async fn run_http_sse(server: FeedMcpServer, bind: &str) -> Result<()> {
    let addr = bind.parse().with_context(|| format!("invalid bind address {bind:?}"))?;

    let sse_server = rmcp::transport::sse_server::SseServer::serve(addr)
        .await
        .context("failed to start http+sse transport")?;

    let cancellation = sse_server.with_service(move || server.clone());
    info!(%bind, "serving http+sse transport");
    tokio::signal::ctrl_c().await.ok();
    cancellation.cancel();
    Ok(())
}
