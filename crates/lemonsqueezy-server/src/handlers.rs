//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use lemonsqueezy_gateway::{
    CheckoutRequest, IndicatorColor, IngestOutcome, PaymentError, PaymentRequest,
    PaymentRequestStore, ProcessingResult, SIGNATURE_HEADER, Subscription, SubscriptionStore,
    WebhookLog, WebhookLogEntry,
};

use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateways_configured: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    /// Gateway name; defaults to the first enabled gateway
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(flatten)]
    pub request: CheckoutRequest,
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub is_active: bool,
    pub status_color: IndicatorColor,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

const fn default_log_limit() -> usize {
    50
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateways_configured: state.gateways.iter().filter(|g| g.enabled).count(),
    })
}

/// LemonSqueezy webhook endpoint
///
/// Acknowledges every verified delivery with 200, whatever the business
/// outcome, so the provider does not retry.
pub async fn lemonsqueezy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.dispatcher.ingest(&state.gateways, &body, signature) {
        IngestOutcome::Accepted(outcome) => (
            StatusCode::OK,
            Json(WebhookResponse {
                status: "success",
                result: Some(outcome.result),
                message: outcome.error,
            }),
        ),
        IngestOutcome::Unauthorized(reason) => (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse {
                status: "error",
                result: None,
                message: Some(reason),
            }),
        ),
        IngestOutcome::Malformed(_) => (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse {
                status: "error",
                result: None,
                message: Some("Invalid JSON".into()),
            }),
        ),
    }
}

/// Create a LemonSqueezy checkout from explicit parameters
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    checkout(&state, payload.gateway.as_deref(), &payload.request).await
}

/// Register a payment request (host application stand-in)
pub async fn register_payment_request(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .payment_requests
        .insert(request)
        .map_err(|e| error_response(&e))?;
    Ok(StatusCode::CREATED)
}

/// Get a payment request
pub async fn get_payment_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRequest>, ApiError> {
    state
        .payment_requests
        .get(&id)
        .map_err(|e| error_response(&e))?
        .map(Json)
        .ok_or_else(|| error_response(&PaymentError::NotFound(format!("payment request {id}"))))
}

/// Create a checkout for a stored payment request
pub async fn payment_request_checkout(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let request = state
        .payment_requests
        .get(&id)
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| error_response(&PaymentError::NotFound(format!("payment request {id}"))))?;

    let checkout_request = CheckoutRequest::for_payment_request(&request);
    checkout(&state, query.gateway.as_deref(), &checkout_request).await
}

/// Get a mirrored subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = find_subscription(&state, &id)?;
    Ok(Json(SubscriptionResponse {
        is_active: subscription.is_active(),
        status_color: subscription.status_color(),
        subscription,
    }))
}

/// Customer portal URL, fetched from LemonSqueezy when not cached
pub async fn subscription_portal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<PortalResponse>, ApiError> {
    let subscription = find_subscription(&state, &id)?;

    let portal_url = match state.gateway(query.gateway.as_deref()) {
        Some(settings) => state.client.portal_url_for(settings, &subscription).await,
        None => subscription.portal_url().map(str::to_string),
    };

    Ok(Json(PortalResponse { portal_url }))
}

/// Validate a gateway's API credentials
pub async fn test_connection(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let settings = require_gateway(&state, query.gateway.as_deref())?;

    state.client.test_connection(settings).await.map_err(|e| {
        tracing::warn!(gateway = %settings.gateway_name, error = %e, "Connection test failed");
        error_response(&e)
    })?;

    Ok(Json(ConnectionResponse {
        success: true,
        message: "Connection successful".into(),
    }))
}

/// Recent webhook log entries, newest first
pub async fn webhook_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<WebhookLogEntry>>, ApiError> {
    state
        .dispatcher
        .stores()
        .log
        .recent(query.limit)
        .map(Json)
        .map_err(|e| error_response(&e))
}

// ============================================================================
// Helpers
// ============================================================================

async fn checkout(
    state: &AppState,
    gateway: Option<&str>,
    request: &CheckoutRequest,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let settings = require_gateway(state, gateway)?;

    let checkout_url = state
        .client
        .create_checkout_url(settings, request)
        .await
        .map_err(|e| {
            tracing::error!(gateway = %settings.gateway_name, error = %e, "Checkout error");
            error_response(&e)
        })?;

    Ok(Json(CheckoutResponse { checkout_url }))
}

fn require_gateway<'a>(
    state: &'a AppState,
    name: Option<&str>,
) -> Result<&'a lemonsqueezy_gateway::GatewaySettings, ApiError> {
    state.gateway(name).ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Payments not configured".into(),
                code: "PAYMENTS_DISABLED".into(),
            }),
        )
    })
}

fn find_subscription(state: &AppState, id: &str) -> Result<Subscription, ApiError> {
    state
        .dispatcher
        .stores()
        .subscriptions
        .get(id)
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| error_response(&PaymentError::NotFound(format!("subscription {id}"))))
}

fn error_response(error: &PaymentError) -> ApiError {
    let (status, code, message) = match error {
        // admin-actionable, so the detail is shown
        PaymentError::Configuration(_) => {
            (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR", error.to_string())
        }
        PaymentError::Upstream(_) => (
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_ERROR",
            error.user_message().to_string(),
        ),
        PaymentError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            error.user_message().to_string(),
        ),
        PaymentError::Verification(_) => (
            StatusCode::UNAUTHORIZED,
            "INVALID_SIGNATURE",
            error.user_message().to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            error.user_message().to_string(),
        ),
    };

    (
        status,
        Json(ErrorResponse {
            error: message,
            code: code.into(),
        }),
    )
}
