use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_mcp_core::error::AppError;
use feed_mcp_core::traits::ResourceNotifier;
use rmcp::model::{
    Implementation, ListResourcesResult, PaginatedRequestParam, ProtocolVersion, ReadResourceRequestParam, ReadResourceResult,
    ResourceContents as McpResourceContents, ResourceUpdatedNotificationParam, ServerCapabilities, ServerInfo, SubscribeRequestParam,
    UnsubscribeRequestParam,
};
use rmcp::service::RequestContext;
use rmcp::{tool_handler, Peer, RoleServer, ServerHandler};
use tracing::{error, info, warn};

use crate::tools::{to_mcp_error, FeedMcpServer, McpError};

/// Adapts an `rmcp` peer handle to the core crate's transport-agnostic
/// [`ResourceNotifier`] seam, so `core::session::Session` can hold a real
/// delivery path without depending on `rmcp` itself.
struct PeerNotifier(Peer<RoleServer>);

#[async_trait]
impl ResourceNotifier for PeerNotifier {
    async fn notify_resource_updated(&self, uri: &str) -> Result<(), AppError> {
        self.0
            .notify_resource_updated(ResourceUpdatedNotificationParam { uri: uri.to_string() })
            .await
            .map_err(|e| AppError::transport(e.to_string()))
    }
}

#[tool_handler]
impl ServerHandler for FeedMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().enable_resources().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Exposes aggregated RSS/Atom/JSON feeds as feeds://all, feeds://feed/{id}, \
                 feeds://feed/{id}/items, and feeds://feed/{id}/meta resources, with filter \
                 parameters (since, until, limit, offset, category, author, search) on \
                 identifiers that carry items. Use all_syndication_feeds and \
                 get_syndication_feed_items for a tool-call equivalent of those reads, \
                 fetch_link for ad-hoc URL retrieval, add_feed/remove_feed/list_managed_feeds \
                 to manage the corpus at runtime, and daily_digest/feed_health_report/\
                 category_breakdown for deterministic analytical reports."
                    .into(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let descriptors = self.resource_manager.list_resources().await.map_err(to_mcp_error)?;
        let resources = descriptors
            .into_iter()
            .map(|d| rmcp::model::RawResource {
                uri: d.uri,
                name: d.name,
                description: Some(d.description),
                mime_type: Some(d.mime_type.to_string()),
                size: None,
            })
            .map(rmcp::model::Annotated::no_annotation)
            .collect();
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let contents = self.resource_manager.read(&request.uri).await.map_err(to_mcp_error)?;
        Ok(ReadResourceResult {
            contents: vec![McpResourceContents::text(contents.text, contents.uri)],
        })
    }

    async fn subscribe(&self, request: SubscribeRequestParam, context: RequestContext<RoleServer>) -> Result<(), McpError> {
        let session_id = session_id_for(&context);
        self.resource_manager.ensure_session(&session_id).await;
        self.resource_manager.subscribe(&session_id, &request.uri).await.map_err(to_mcp_error)?;
        let notifier: Arc<dyn ResourceNotifier> = Arc::new(PeerNotifier(context.peer.clone()));
        self.resource_manager.set_session_notifier(&session_id, notifier).await.map_err(to_mcp_error)
    }

    async fn unsubscribe(&self, request: UnsubscribeRequestParam, context: RequestContext<RoleServer>) -> Result<(), McpError> {
        let session_id = session_id_for(&context);
        self.resource_manager.unsubscribe(&session_id, &request.uri).await.map_err(to_mcp_error)
    }
}

/// The transport's own peer/session identity, reused as the resource
/// manager's session key rather than minting a second, parallel id.
fn session_id_for(context: &RequestContext<RoleServer>) -> String {
    context.peer.peer_info().map(|info| info.client_info.name.clone()).unwrap_or_else(|| "anonymous".to_string())
}

/// Runs the change-detection ticker as a single background task (not one
/// task per identifier, to keep concurrency bounded even when many
/// resources change in the same tick). Notification failures are logged
/// and skipped; the loop itself never stops on their account.
pub async fn run_change_detection_loop(server: FeedMcpServer, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let changed = server.resource_manager.detect_resource_changes().await;
        if changed.is_empty() {
            continue;
        }
        info!(count = changed.len(), "change detection tick");
        for uri in changed {
            let sessions = server.resource_manager.get_subscribed_sessions(&uri).await;
            for session_id in sessions {
                if let Err(err) = notify_resource_updated(&server, &session_id, &uri).await {
                    warn!(session_id, uri, error = %err, "failed to deliver resource update notification");
                }
            }
        }
    }
}

async fn notify_resource_updated(server: &FeedMcpServer, session_id: &str, uri: &str) -> Result<(), McpError> {
    server.resource_manager.notify_session(session_id, uri).await.map_err(to_mcp_error)
}

pub fn log_startup_error(err: &feed_mcp_core::error::AppError) {
    error!(correlation_id = %err.correlation_id, kind = %err.kind, message = %err.message, "fatal startup error");
}
