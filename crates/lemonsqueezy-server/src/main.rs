//! lemonsqueezy-server
//!
//! Axum-based server exposing the LemonSqueezy webhook endpoint, checkout
//! creation and read access to mirrored subscription state.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lemonsqueezy_gateway::{
    GatewaySettings, JsonlWebhookLog, LemonSqueezyClient, MemoryCustomerDirectory,
    MemoryOrderStore, MemoryPaymentRequestStore, MemorySubscriptionStore, MemoryWebhookLog,
    Stores, WebhookDispatcher, WebhookLog,
};

use crate::handlers::{
    create_checkout, get_payment_request, get_subscription, health_check, lemonsqueezy_webhook,
    payment_request_checkout, register_payment_request, subscription_portal, test_connection,
    webhook_logs,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Gateway configuration
    let mut gateways = Vec::new();
    match GatewaySettings::from_env() {
        Ok(settings) => {
            tracing::info!("✓ LemonSqueezy configured (gateway: {})", settings.gateway_name);
            if settings.default_variant_id.is_none() {
                tracing::warn!("  No default variant; checkouts must name a variant_id");
            }
            gateways.push(settings);
        }
        Err(e) => {
            tracing::warn!("⚠ LemonSqueezy not configured - payments disabled ({e})");
            tracing::warn!("  Set LEMONSQUEEZY_API_KEY, _STORE_ID and _WEBHOOK_SECRET in .env");
        }
    }

    // Webhook log backend
    let log: Arc<dyn WebhookLog> = match std::env::var("WEBHOOK_LOG_PATH") {
        Ok(path) => {
            let log = JsonlWebhookLog::open(&path)?;
            tracing::info!("✓ Webhook log: {}", log.path().display());
            Arc::new(log)
        }
        Err(_) => {
            tracing::info!("Webhook log kept in memory (set WEBHOOK_LOG_PATH to persist)");
            Arc::new(MemoryWebhookLog::new())
        }
    };

    let payment_requests = Arc::new(MemoryPaymentRequestStore::new());
    let stores = Stores {
        subscriptions: Arc::new(MemorySubscriptionStore::new()),
        payment_requests: payment_requests.clone(),
        orders: Arc::new(MemoryOrderStore::new()),
        customers: Arc::new(MemoryCustomerDirectory::new()),
        log,
    };

    // Build application state
    let state = AppState {
        client: LemonSqueezyClient::new(),
        gateways: Arc::new(gateways),
        dispatcher: Arc::new(WebhookDispatcher::new(stores)),
        payment_requests,
    };

    let app = build_router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🍋 lemonsqueezy-server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                             - Health check");
    tracing::info!("  POST /webhook                            - LemonSqueezy webhook");
    tracing::info!("  POST /api/checkout                       - Create checkout");
    tracing::info!("  POST /api/payment-requests/{{id}}/checkout - Checkout for payment request");
    tracing::info!("  GET  /api/subscriptions/{{id}}             - Subscription state");
    tracing::info!("  GET  /api/subscriptions/{{id}}/portal      - Customer portal URL");
    tracing::info!("  POST /api/settings/test-connection       - Validate credentials");
    tracing::info!("  GET  /api/webhook-logs                   - Recent deliveries");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Webhook
        .route("/webhook", post(lemonsqueezy_webhook))
        // Checkout
        .route("/api/checkout", post(create_checkout))
        .route("/api/payment-requests", post(register_payment_request))
        .route("/api/payment-requests/{id}", get(get_payment_request))
        .route(
            "/api/payment-requests/{id}/checkout",
            post(payment_request_checkout),
        )
        // Subscriptions
        .route("/api/subscriptions/{id}", get(get_subscription))
        .route("/api/subscriptions/{id}/portal", get(subscription_portal))
        // Admin
        .route("/api/settings/test-connection", post(test_connection))
        .route("/api/webhook-logs", get(webhook_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
