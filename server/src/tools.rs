use std::sync::Arc;

use feed_mcp_core::error::AppError;
use feed_mcp_core::traits::{AddFeedRequest, DynamicFeedManager, FeedStore};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::prompts;
use crate::resource_manager::ResourceManager;

pub type McpError = rmcp::ErrorData;

pub fn to_mcp_error(err: AppError) -> McpError {
    McpError::internal_error(err.to_string(), None)
}

fn parse_since(value: &str) -> Result<chrono::DateTime<chrono::Utc>, String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| format!("since must be an RFC3339 timestamp: {e}"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchLinkParams {
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetFeedItemsParams {
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddFeedParams {
    pub url: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveFeedParams {
    pub feed_id: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DailyDigestParams {
    pub since: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CategoryBreakdownParams {
    pub top_n: Option<u32>,
}

/// Binds every tool named in the tool dispatcher's table to a handler. The
/// `#[tool_router]` macro generates `Self::tool_router()` and wires each
/// `#[tool]` method into it; `FeedMcpServer`'s `ServerHandler` impl (in
/// `server.rs`) exposes that router to clients via `#[tool_handler]`.
#[derive(Clone)]
pub struct FeedMcpServer {
    pub(crate) resource_manager: Arc<ResourceManager>,
    pub(crate) feed_store: Arc<dyn FeedStore>,
    pub(crate) dynamic_feed_manager: Arc<dyn DynamicFeedManager>,
    pub(crate) http_client: reqwest::Client,
    pub(crate) tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FeedMcpServer {
    pub fn new(
        resource_manager: Arc<ResourceManager>,
        feed_store: Arc<dyn FeedStore>,
        dynamic_feed_manager: Arc<dyn DynamicFeedManager>,
    ) -> Self {
        Self {
            resource_manager,
            feed_store,
            dynamic_feed_manager,
            http_client: reqwest::Client::builder()
                .user_agent("feed-mcp/0.1")
                .build()
                .expect("failed to build fetch_link http client"),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Fetch an arbitrary URL and return its raw response body as text.")]
    async fn fetch_link(&self, Parameters(params): Parameters<FetchLinkParams>) -> Result<CallToolResult, McpError> {
        debug!(url = %params.url, "fetch_link");
        let response = self.http_client.get(&params.url).send().await.map_err(|e| {
            to_mcp_error(AppError::network("fetch_link", "tool_dispatcher", &params.url, e.to_string()))
        })?;
        if !response.status().is_success() {
            return Err(to_mcp_error(
                AppError::network("fetch_link", "tool_dispatcher", &params.url, format!("unexpected status {}", response.status()))
                    .with_http_status(response.status().as_u16()),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| to_mcp_error(AppError::network("fetch_link", "tool_dispatcher", &params.url, e.to_string())))?;
        Ok(CallToolResult::success(vec![Content::text(body)]))
    }

    #[tool(description = "Return the serialised list of every aggregated syndication feed.")]
    async fn all_syndication_feeds(&self, Parameters(_params): Parameters<EmptyParams>) -> Result<CallToolResult, McpError> {
        debug!("all_syndication_feeds");
        let contents = self.resource_manager.read("feeds://all").await.map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(contents.text)]))
    }

    #[tool(description = "Return the serialised feed descriptor and items for one feed id.")]
    async fn get_syndication_feed_items(&self, Parameters(params): Parameters<GetFeedItemsParams>) -> Result<CallToolResult, McpError> {
        debug!(id = %params.id, "get_syndication_feed_items");
        let identifier = format!("feeds://feed/{}", params.id);
        let contents = self.resource_manager.read(&identifier).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(contents.text)]))
    }

    #[tool(description = "Add a new feed to the managed corpus by URL.")]
    async fn add_feed(&self, Parameters(params): Parameters<AddFeedParams>) -> Result<CallToolResult, McpError> {
        debug!(url = %params.url, "add_feed");
        let info = self
            .dynamic_feed_manager
            .add_feed(AddFeedRequest {
                url: params.url,
                title: params.title,
                category: params.category,
                description: params.description,
            })
            .await
            .map_err(to_mcp_error)?;
        self.resource_manager.invalidate_feed(&info.id).await;
        info!(feed_id = %info.id, "feed added");
        let text = serde_json::to_string(&info).map_err(|e| {
            to_mcp_error(AppError::new(
                feed_mcp_core::error::ErrorKind::ResourceContent,
                "add_feed",
                "tool_dispatcher",
                e.to_string(),
            ))
        })?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Remove a managed feed by feed id or by its URL (exactly one must be given).")]
    async fn remove_feed(&self, Parameters(params): Parameters<RemoveFeedParams>) -> Result<CallToolResult, McpError> {
        debug!(feed_id = ?params.feed_id, url = ?params.url, "remove_feed");
        let result = match (params.feed_id, params.url) {
            (Some(id), None) => self.dynamic_feed_manager.remove_feed(&id).await,
            (None, Some(url)) => self.dynamic_feed_manager.remove_feed_by_url(&url).await,
            _ => Err(AppError::validation(
                "remove_feed",
                "tool_dispatcher",
                "feedId|url",
                "exactly one of feedId or url must be given",
            )),
        }
        .map_err(to_mcp_error)?;
        self.resource_manager.invalidate_feed(&result.id).await;
        info!(feed_id = %result.id, "feed removed");

        let text = serde_json::to_string(&result).map_err(|e| {
            to_mcp_error(AppError::new(
                feed_mcp_core::error::ErrorKind::ResourceContent,
                "remove_feed",
                "tool_dispatcher",
                e.to_string(),
            ))
        })?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "List every feed currently managed by the dynamic feed manager.")]
    async fn list_managed_feeds(&self, Parameters(_params): Parameters<EmptyParams>) -> Result<CallToolResult, McpError> {
        debug!("list_managed_feeds");
        let feeds = self.dynamic_feed_manager.list_managed_feeds().await.map_err(to_mcp_error)?;
        let text = serde_json::to_string(&feeds).map_err(|e| {
            to_mcp_error(AppError::new(
                feed_mcp_core::error::ErrorKind::ResourceContent,
                "list_managed_feeds",
                "tool_dispatcher",
                e.to_string(),
            ))
        })?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Plain-text digest of items published since a given time (default 24h ago), newest first.")]
    async fn daily_digest(&self, Parameters(params): Parameters<DailyDigestParams>) -> Result<CallToolResult, McpError> {
        debug!(since = ?params.since, limit = ?params.limit, "daily_digest");
        let since = params
            .since
            .as_deref()
            .map(parse_since)
            .transpose()
            .map_err(|e| to_mcp_error(AppError::validation("daily_digest", "tool_dispatcher", "since", e)))?;
        let text = prompts::daily_digest(self.feed_store.as_ref(), since, params.limit).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Per-feed health report: fetch errors, circuit breaker state, newest-item freshness.")]
    async fn feed_health_report(&self, Parameters(_params): Parameters<EmptyParams>) -> Result<CallToolResult, McpError> {
        debug!("feed_health_report");
        let text = prompts::feed_health_report(self.feed_store.as_ref()).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Most frequent item categories across the whole corpus, with counts.")]
    async fn category_breakdown(&self, Parameters(params): Parameters<CategoryBreakdownParams>) -> Result<CallToolResult, McpError> {
        debug!(top_n = ?params.top_n, "category_breakdown");
        let text = prompts::category_breakdown(self.feed_store.as_ref(), params.top_n).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}
