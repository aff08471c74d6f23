// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP and SSE edge for the Relay bus.
//!
//! The edge is a thin translator: it validates request shapes (structured
//! 400s), converts stable error codes to HTTP statuses, and forwards bus
//! events over SSE. All kernel behavior lives below this crate.

/// Conversations projection.
pub mod conversations;
/// Request-id and logging middleware.
pub mod middleware;
/// SSE streaming.
pub mod sse;
/// Body parsing and payload guards.
pub mod validation;

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use chrono::Utc;
use relay_adapters::{AdapterError, AdapterManager};
use relay_config::RelayConfig;
use relay_core::MessageStatus;
use relay_core::binding::{Binding, SessionStrategy};
use relay_engine::{PublishError, PublishRequest, RelayEngine};
use relay_error::ErrorCode;
use relay_store::{MessageQuery, Store, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use conversations::{NullResolver, project};
use validation::{check_payload, parse_body};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

/// Shared state behind every route.
pub struct AppState {
    /// Kernel configuration.
    pub config: RelayConfig,
    /// Opened store (handles are cheap).
    pub store: Store,
    /// The delivery engine.
    pub engine: RelayEngine,
    /// The adapter manager.
    pub manager: AdapterManager,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

// ---------------------------------------------------------------------------
// API error
// ---------------------------------------------------------------------------

/// Structured API error: HTTP status plus a stable machine code.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to answer with.
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Build an error from parts.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// 400 — malformed request shape.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// 400 — subject grammar violation.
    pub fn invalid_subject(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidSubject.as_str(),
            message,
        )
    }

    /// 404 — resource not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound.as_str(),
            message,
        )
    }

    /// 500 — unexpected internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal.as_str(),
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "code": self.code }));
        (self.status, body).into_response()
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidSubject
        | ErrorCode::UnknownType
        | ErrorCode::MultiInstanceDenied
        | ErrorCode::RemoveBuiltinDenied
        | ErrorCode::ConfigInvalid => StatusCode::BAD_REQUEST,
        ErrorCode::DuplicateId
        | ErrorCode::DuplicateEndpoint
        | ErrorCode::InvalidTransition
        | ErrorCode::SessionLocked => StatusCode::CONFLICT,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FeatureDisabled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::PublishFailed | ErrorCode::StorageError | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if matches!(err, StoreError::InvalidCursor) {
            return Self::invalid_request(err.to_string());
        }
        let code = match &err {
            StoreError::DuplicateId(_) => ErrorCode::DuplicateId,
            StoreError::DuplicateEndpoint(_) => ErrorCode::DuplicateEndpoint,
            StoreError::MessageNotFound(_) => ErrorCode::NotFound,
            StoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            _ => ErrorCode::StorageError,
        };
        Self::new(status_for(code), code.as_str(), err.to_string())
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::InvalidSubject(e) => Self::invalid_subject(e.to_string()),
            PublishError::Cancelled => Self::internal("publish cancelled"),
            PublishError::Storage(e) => e.into(),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match &err {
            AdapterError::Unauthorized => Self::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                err.to_string(),
            ),
            _ => {
                let code = err.code();
                Self::new(status_for(code), code.as_str(), err.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Routers
// ---------------------------------------------------------------------------

/// Build the Axum router with all Relay routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/messages", post(cmd_publish).get(cmd_list_messages))
        .route("/messages/{id}", get(cmd_get_message))
        .route("/messages/{id}/trace", get(cmd_get_trace))
        .route("/trace/metrics", get(cmd_trace_metrics))
        .route("/conversations", get(cmd_conversations))
        .route("/endpoints", get(cmd_list_endpoints).post(cmd_register_endpoint))
        .route("/endpoints/{subject}", delete(cmd_unregister_endpoint))
        .route("/endpoints/{subject}/inbox", get(cmd_inbox))
        .route("/dead-letters", get(cmd_dead_letters))
        .route("/metrics", get(cmd_metrics))
        .route("/stream", get(sse::stream))
        .route("/adapters", get(cmd_list_adapters).post(cmd_add_adapter))
        .route("/adapters/catalog", get(cmd_catalog))
        .route("/adapters/test", post(cmd_test_adapter))
        .route("/adapters/reload", post(cmd_reload_adapters))
        .route(
            "/adapters/{id}",
            get(cmd_adapter_status).delete(cmd_remove_adapter),
        )
        .route("/adapters/{id}/config", patch(cmd_update_adapter_config))
        .route("/adapters/{id}/enable", post(cmd_enable_adapter))
        .route("/adapters/{id}/disable", post(cmd_disable_adapter))
        .route("/bindings", get(cmd_list_bindings).post(cmd_add_binding))
        .route("/bindings/{id}", delete(cmd_remove_binding))
        .route("/webhooks/{adapter_id}", post(cmd_webhook))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Router served while the feature gate is off: everything answers 503.
pub fn build_disabled_app() -> Router {
    Router::new().fallback(|| async {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::FeatureDisabled.as_str(),
            "relay kernel is disabled",
        )
    })
}

// ---------------------------------------------------------------------------
// Health & metrics
// ---------------------------------------------------------------------------

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": relay_core::CONTRACT_VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "enabled": state.config.enabled,
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn cmd_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.metrics())
}

async fn cmd_trace_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.traces().metrics()?))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublishBody {
    subject: String,
    payload: serde_json::Value,
    from: String,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    budget: Option<relay_core::BudgetOverrides>,
}

async fn cmd_publish(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: PublishBody = parse_body(body)?;
    check_payload(&body.payload)?;

    let receipt = state
        .engine
        .publish(PublishRequest {
            subject: body.subject,
            from: body.from,
            reply_to: body.reply_to,
            payload: body.payload,
            budget: body.budget.unwrap_or_default(),
            parent: None,
        })
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    subject: Option<String>,
    status: Option<String>,
    from: Option<String>,
    cursor: Option<String>,
    limit: Option<usize>,
}

async fn cmd_list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = parse_status(query.status.as_deref())?;
    let page = state.store.messages().list(&MessageQuery {
        subject: query.subject,
        status,
        from: query.from,
        cursor: query.cursor,
        limit: query.limit,
    })?;
    Ok(Json(json!({
        "messages": page.messages,
        "next_cursor": page.next_cursor,
    })))
}

fn parse_status(raw: Option<&str>) -> Result<Option<MessageStatus>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => MessageStatus::parse(s)
            .map(Some)
            .ok_or_else(|| ApiError::invalid_request(format!("unknown status '{s}'"))),
    }
}

async fn cmd_get_message(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_message_id(&id)?;
    let envelope = state
        .store
        .messages()
        .get(id)?
        .ok_or_else(|| ApiError::not_found(format!("message {id} not found")))?;
    Ok(Json(envelope))
}

async fn cmd_get_trace(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_message_id(&id)?;
    let envelope = state
        .store
        .messages()
        .get(id)?
        .ok_or_else(|| ApiError::not_found(format!("message {id} not found")))?;
    let spans = state.store.traces().get_trace(envelope.trace_id)?;
    Ok(Json(json!({
        "trace_id": envelope.trace_id,
        "spans": spans,
    })))
}

fn parse_message_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid_request(format!("invalid message id '{raw}'")))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

async fn cmd_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.store.messages().list(&MessageQuery {
        limit: Some(relay_store::messages::MAX_LIMIT),
        ..Default::default()
    })?;
    let dead_letters = state.store.dead_letters().list(None)?;
    let conversations = project(&page.messages, &dead_letters, &NullResolver);
    Ok(Json(json!({ "conversations": conversations })))
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterBody {
    subject: String,
}

async fn cmd_list_endpoints(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.endpoints().list()?))
}

async fn cmd_register_endpoint(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: RegisterBody = parse_body(body)?;
    relay_subject::validate_pattern(&body.subject)
        .map_err(|e| ApiError::invalid_subject(e.to_string()))?;
    let endpoint = state.store.endpoints().register(&body.subject, None)?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

async fn cmd_unregister_endpoint(
    State(state): State<Arc<AppState>>,
    AxPath(subject): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.store.endpoints().unregister(&subject)?;
    Ok(Json(json!({ "success": removed })))
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    status: Option<String>,
    cursor: Option<String>,
    limit: Option<usize>,
}

async fn cmd_inbox(
    State(state): State<Arc<AppState>>,
    AxPath(subject): AxPath<String>,
    Query(query): Query<InboxQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = state
        .store
        .endpoints()
        .get(&subject)?
        .ok_or_else(|| ApiError::not_found(format!("endpoint '{subject}' not found")))?;

    let status = parse_status(query.status.as_deref())?;
    let exact = relay_subject::is_literal(&endpoint.subject);
    let page = state.store.messages().list(&MessageQuery {
        subject: exact.then(|| endpoint.subject.clone()),
        status,
        from: None,
        cursor: query.cursor,
        limit: query.limit,
    })?;

    // Pattern endpoints filter the page in memory; the cursor stays stable
    // because filtering is deterministic over the fixed newest-first order.
    let messages: Vec<_> = if exact {
        page.messages
    } else {
        page.messages
            .into_iter()
            .filter(|m| relay_subject::matches(&endpoint.subject, &m.subject))
            .collect()
    };

    Ok(Json(json!({
        "messages": messages,
        "next_cursor": page.next_cursor,
    })))
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeadLetterQuery {
    endpoint_hash: Option<u64>,
}

async fn cmd_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.dead_letters().list(query.endpoint_hash)?))
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

async fn cmd_list_adapters(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut out = Vec::new();
    for record in state.manager.records()? {
        let status = state.manager.status(&record.id).await;
        out.push(json!({ "config": record, "status": status }));
    }
    Ok(Json(out))
}

async fn cmd_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.catalog().await)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddAdapterBody {
    #[serde(rename = "type")]
    adapter_type: String,
    id: String,
    config: serde_json::Value,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn cmd_add_adapter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: AddAdapterBody = parse_body(body)?;
    state
        .manager
        .add(&body.adapter_type, &body.id, body.config, body.enabled)
        .await?;
    Ok(Json(json!({ "ok": true, "id": body.id })))
}

async fn cmd_adapter_status(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .manager
        .status(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("adapter '{id}' not found")))
}

async fn cmd_remove_adapter(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.remove(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateConfigBody {
    config: serde_json::Value,
}

async fn cmd_update_adapter_config(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: UpdateConfigBody = parse_body(body)?;
    state.manager.update_config(&id, body.config).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn cmd_enable_adapter(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.enable(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn cmd_disable_adapter(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.disable(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestAdapterBody {
    #[serde(rename = "type")]
    adapter_type: String,
    config: serde_json::Value,
}

async fn cmd_test_adapter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: TestAdapterBody = parse_body(body)?;
    let outcome = state
        .manager
        .test_connection(&body.adapter_type, body.config)
        .await?;
    Ok(Json(outcome))
}

async fn cmd_reload_adapters(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let loaded = state.manager.reload().await?;
    Ok(Json(json!({ "ok": true, "loaded": loaded })))
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BindingBody {
    id: String,
    adapter_id: String,
    agent_id: String,
    agent_dir: String,
    session_strategy: SessionStrategy,
    label: String,
}

async fn cmd_list_bindings(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.list_bindings()?))
}

async fn cmd_add_binding(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: BindingBody = parse_body(body)?;
    let binding = Binding {
        id: body.id,
        adapter_id: body.adapter_id,
        agent_id: body.agent_id,
        agent_dir: body.agent_dir,
        session_strategy: body.session_strategy,
        label: body.label,
    };
    state.manager.add_binding(binding.clone()).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn cmd_remove_binding(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.remove_binding(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

async fn cmd_webhook(
    State(state): State<Arc<AppState>>,
    AxPath(adapter_id): AxPath<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok());
    let receipt = state
        .manager
        .handle_webhook(&adapter_id, &body, signature)
        .await?;
    Ok(Json(json!({ "ok": true, "message_id": receipt.message_id })))
}
