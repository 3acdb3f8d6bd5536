use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// The semantic classification of an [`AppError`], per the error handling design.
///
/// These names are contract-level, not Rust type identifiers: several kinds below
/// correspond to the same underlying `AppError` shape but are distinguished by
/// `kind` so that callers across the resource manager, cache, and session map can
/// match on a stable vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("validation")]
    Validation,
    #[error("invalid_resource_uri")]
    InvalidResourceUri,
    #[error("resource_not_found")]
    ResourceNotFound,
    #[error("resource_unavailable")]
    ResourceUnavailable,
    #[error("resource_content")]
    ResourceContent,
    #[error("session")]
    Session,
    #[error("session_not_found")]
    SessionNotFound,
    #[error("subscription")]
    Subscription,
    #[error("subscription_exists")]
    SubscriptionExists,
    #[error("subscription_not_found")]
    SubscriptionNotFound,
    #[error("resource_cache")]
    ResourceCache,
    #[error("cache_invalidation")]
    CacheInvalidation,
    #[error("transport")]
    Transport,
    #[error("configuration")]
    Configuration,
    #[error("network")]
    Network,
    #[error("internal")]
    Internal,
}

/// Every error surfaced by the resource layer carries this envelope: a stable
/// correlation id, a timestamp, a kind, a human message, an actionable
/// suggestion, and the operation/component/offending-key that produced it.
///
/// Errors compose via `source`, so a chain of `AppError`s (or an `AppError`
/// wrapping a foreign error) preserves the full cause chain for logging.
#[derive(Debug, Error)]
#[error("[{correlation_id}] {kind} ({component}::{operation}): {message}")]
pub struct AppError {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: String,
    pub operation: String,
    pub component: String,
    pub key: Option<String>,
    pub http_status: Option<u16>,
    pub network_error: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AppError {
    pub fn new(
        kind: ErrorKind,
        operation: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            suggestion: default_suggestion(kind),
            operation: operation.into(),
            component: component.into(),
            key: None,
            http_status: None,
            network_error: None,
            source: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_network_error(mut self, network_error: impl Into<String>) -> Self {
        self.network_error = Some(network_error.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn invalid_resource_uri(uri: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::InvalidResourceUri,
            operation,
            "resource_identifier_grammar",
            "URI does not match any supported resource patterns",
        )
        .with_key(uri)
    }

    pub fn validation(operation: &str, component: &str, field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, operation, component, message).with_key(field)
    }

    pub fn resource_not_found(uri: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::ResourceNotFound,
            operation,
            "resource_manager",
            format!("resource {uri} was not found"),
        )
        .with_key(uri)
    }

    pub fn resource_unavailable(
        uri: &str,
        operation: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::ResourceUnavailable, operation, "resource_manager", message)
            .with_key(uri)
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            ErrorKind::SessionNotFound,
            "session_lookup",
            "resource_manager",
            format!("session {session_id} does not exist"),
        )
        .with_key(session_id)
    }

    pub fn internal(operation: &str, component: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, operation, component, message)
    }

    pub fn network(operation: &str, component: &str, url: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, operation, component, message).with_key(url)
    }

    pub fn configuration(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, "startup", "configuration", message).with_key(field)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, "startup", "protocol_server", message)
    }
}

fn default_suggestion(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Validation => "check the filter parameters and resubmit".to_string(),
        ErrorKind::InvalidResourceUri => {
            "use one of feeds://all, feeds://feed/{id}, feeds://feed/{id}/items, feeds://feed/{id}/meta".to_string()
        }
        ErrorKind::ResourceNotFound => "verify the feed id against all_syndication_feeds".to_string(),
        ErrorKind::ResourceUnavailable => "retry after the feed store recovers".to_string(),
        ErrorKind::ResourceContent => "report this as a serialisation bug".to_string(),
        ErrorKind::Session | ErrorKind::SessionNotFound => "create a session before subscribing".to_string(),
        ErrorKind::Subscription | ErrorKind::SubscriptionExists | ErrorKind::SubscriptionNotFound => {
            "check the current subscription set before mutating it".to_string()
        }
        ErrorKind::ResourceCache | ErrorKind::CacheInvalidation => {
            "cache failures are non-fatal; the read falls back to the feed store".to_string()
        }
        ErrorKind::Transport => "check the configured transport value".to_string(),
        ErrorKind::Configuration => "check the environment configuration".to_string(),
        ErrorKind::Network => "the upstream host may be unreachable or rate limiting".to_string(),
        ErrorKind::Internal => "this indicates a bug; please file a report".to_string(),
    }
}

/// Short unique id, generated per error instance, used to correlate a
/// client-visible error with server-side logs.
fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Raised when an externally-facing operation is cancelled via its deadline or
/// cancellation token. Deliberately a distinct type, not an `ErrorKind`
/// variant: cancellation is plumbing, not a feed error, and must never be
/// logged or counted as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;
