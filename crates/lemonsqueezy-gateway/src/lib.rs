//! # lemonsqueezy-gateway
//!
//! LemonSqueezy checkout links, webhook verification and local mirroring of
//! subscription state for a host business application.
//!
//! ## Webhook flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ POST /webhook│──▶│   Verifier   │──▶│  Dispatcher  │──▶│  Webhook Log │
//! │  X-Signature │   │ HMAC-SHA256  │   │ event → state│   │ append-only  │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Every delivery, accepted or rejected, leaves exactly one log entry.
//! Business failures (unknown payment request, unreadable status) are
//! recorded in the entry and still acknowledged, so the provider does not
//! retry them.
//!
//! Subscription records are last-writer-wins: there is no ordering guard
//! between deliveries, so an older event arriving late can overwrite a
//! newer status.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lemonsqueezy_gateway::{CheckoutRequest, GatewaySettings, LemonSqueezyClient};
//!
//! let settings = GatewaySettings::from_env()?;
//! let client = LemonSqueezyClient::new();
//!
//! let url = client.create_checkout_url(&settings, &CheckoutRequest {
//!     payer_email: Some("user@example.com".into()),
//!     order_id: Some("PR-001".into()),
//!     ..Default::default()
//! }).await?;
//!
//! // Redirect user to: url
//! ```

mod checkout;
mod error;
mod order;
mod payment_request;
mod settings;
mod subscription;
mod verify;
mod webhook;
mod webhook_log;

pub use checkout::{CheckoutRequest, LemonSqueezyClient, build_checkout_payload};
pub use error::{PaymentError, Result};
pub use order::{BillingInterval, MemoryOrderStore, Order, OrderStatus, OrderStore};
pub use payment_request::{
    CustomerDirectory, MemoryCustomerDirectory, MemoryPaymentRequestStore, PaymentRequest,
    PaymentRequestStatus, PaymentRequestStore,
};
pub use settings::{DEFAULT_API_BASE, GatewaySettings};
pub use subscription::{
    IndicatorColor, MemorySubscriptionStore, Subscription, SubscriptionStatus, SubscriptionStore,
};
pub use verify::{SIGNATURE_HEADER, select_gateway, sign, verify_signature};
pub use webhook::{
    DispatchOutcome, EventKind, IngestOutcome, OrderAttributes, OrderData, OrderItem, Stores,
    SubscriptionAttributes, SubscriptionItem, SubscriptionUrls, WebhookDispatcher, WebhookEvent,
};
pub use webhook_log::{
    JsonlWebhookLog, MemoryWebhookLog, ProcessingResult, Verification, WebhookLog,
    WebhookLogEntry,
};
