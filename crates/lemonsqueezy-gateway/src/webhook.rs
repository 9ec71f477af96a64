//! LemonSqueezy Webhook Handling
//!
//! Parses verified webhook payloads into [`WebhookEvent`]s and reconciles
//! them with local state. Every delivery produces exactly one
//! [`WebhookLogEntry`].

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, de::IgnoredAny};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{PaymentError, Result};
use crate::order::{BillingInterval, Order, OrderStatus, OrderStore, from_cents};
use crate::payment_request::{CustomerDirectory, PaymentRequestStatus, PaymentRequestStore};
use crate::settings::GatewaySettings;
use crate::subscription::{Subscription, SubscriptionStatus, SubscriptionStore};
use crate::verify::select_gateway;
use crate::webhook_log::{ProcessingResult, Verification, WebhookLog, WebhookLogEntry};

/// Event types with a handler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    OrderCreated,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    SubscriptionExpired,
    SubscriptionPaused,
    SubscriptionUnpaused,
    SubscriptionResumed,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "order_created" => Some(Self::OrderCreated),
            "subscription_created" => Some(Self::SubscriptionCreated),
            "subscription_updated" => Some(Self::SubscriptionUpdated),
            "subscription_cancelled" => Some(Self::SubscriptionCancelled),
            "subscription_expired" => Some(Self::SubscriptionExpired),
            "subscription_paused" => Some(Self::SubscriptionPaused),
            "subscription_unpaused" => Some(Self::SubscriptionUnpaused),
            "subscription_resumed" => Some(Self::SubscriptionResumed),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::SubscriptionCreated => "subscription_created",
            Self::SubscriptionUpdated => "subscription_updated",
            Self::SubscriptionCancelled => "subscription_cancelled",
            Self::SubscriptionExpired => "subscription_expired",
            Self::SubscriptionPaused => "subscription_paused",
            Self::SubscriptionUnpaused => "subscription_unpaused",
            Self::SubscriptionResumed => "subscription_resumed",
        }
    }

    /// Status a lifecycle event implies when the payload carries none
    pub const fn implied_status(self) -> Option<SubscriptionStatus> {
        match self {
            Self::SubscriptionCancelled => Some(SubscriptionStatus::Cancelled),
            Self::SubscriptionExpired => Some(SubscriptionStatus::Expired),
            Self::SubscriptionPaused => Some(SubscriptionStatus::Paused),
            Self::SubscriptionUnpaused | Self::SubscriptionResumed => {
                Some(SubscriptionStatus::Active)
            }
            Self::OrderCreated | Self::SubscriptionCreated | Self::SubscriptionUpdated => None,
        }
    }
}

/// Parsed webhook event
#[derive(Clone, Debug)]
pub enum WebhookEvent {
    /// Order paid - flip the payment request and record the order
    OrderCreated {
        payment_request_id: Option<String>,
        order: Option<OrderData>,
    },

    /// Any subscription lifecycle event
    Subscription {
        kind: EventKind,
        subscription_id: Option<String>,
        attributes: SubscriptionAttributes,
    },

    /// Unhandled event type
    Other { event_type: String },
}

impl WebhookEvent {
    /// Parse a raw payload
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        let event_type = envelope.event_type();

        let Some(kind) = event_type.as_deref().and_then(EventKind::from_name) else {
            return Ok(Self::Other {
                event_type: event_type.unwrap_or_else(|| UNKNOWN_EVENT.into()),
            });
        };

        let resource = envelope.data.unwrap_or_default();

        if kind == EventKind::OrderCreated {
            let payment_request_id = envelope
                .meta
                .custom_data
                .and_then(|c| c.payment_request_id)
                .or(envelope.payment_request_id)
                .or(envelope.order_id);

            let order = match resource.id {
                Some(order_id) => match parse_attributes::<OrderAttributes>(resource.attributes) {
                    Ok(attributes) => Some(OrderData {
                        order_id,
                        attributes,
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unreadable order attributes");
                        None
                    }
                },
                None => None,
            };

            return Ok(Self::OrderCreated {
                payment_request_id,
                order,
            });
        }

        Ok(Self::Subscription {
            kind,
            subscription_id: resource.id,
            attributes: parse_attributes(resource.attributes)?,
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::OrderCreated { .. } => EventKind::OrderCreated.as_str(),
            Self::Subscription { kind, .. } => kind.as_str(),
            Self::Other { event_type } => event_type,
        }
    }
}

const UNKNOWN_EVENT: &str = "unknown";

/// Order resource from `order_created`
#[derive(Clone, Debug)]
pub struct OrderData {
    pub order_id: String,
    pub attributes: OrderAttributes,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderAttributes {
    pub status: Option<String>,
    pub user_email: Option<String>,
    pub currency: Option<String>,
    pub total: Option<i64>,
    pub subtotal: Option<i64>,
    pub discount_total: Option<i64>,
    pub tax: Option<i64>,
    #[serde(default, deserialize_with = "opt_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    pub first_order_item: Option<OrderItem>,
    pub first_subscription_item: Option<SubscriptionItem>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderItem {
    #[serde(default, deserialize_with = "opt_id")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub variant_id: Option<String>,
    pub product_name: Option<String>,
    pub variant_name: Option<String>,
    pub price_id: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default, deserialize_with = "opt_id")]
    pub subscription_id: Option<String>,
}

/// Subscription resource attributes; every field is optional
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscriptionAttributes {
    pub status: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub customer_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub variant_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub order_id: Option<String>,
    pub product_name: Option<String>,
    pub variant_name: Option<String>,
    pub user_email: Option<String>,
    #[serde(default, deserialize_with = "opt_datetime")]
    pub renews_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_datetime")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_datetime")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urls: Option<SubscriptionUrls>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscriptionUrls {
    pub update_payment_method: Option<String>,
    pub customer_portal: Option<String>,
}

// Wire envelope. `meta.*` is the LemonSqueezy shape; the flat keys are
// accepted for hand-built deliveries.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    data: Option<Resource>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    order_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    payment_request_id: Option<String>,
}

impl Envelope {
    fn event_type(&self) -> Option<String> {
        self.meta
            .event_name
            .clone()
            .or_else(|| self.event_name.clone())
            .or_else(|| self.event.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    custom_data: Option<CustomData>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomData {
    #[serde(default, deserialize_with = "opt_id")]
    payment_request_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default, deserialize_with = "opt_id")]
    id: Option<String>,
    #[serde(default)]
    attributes: Value,
}

fn parse_attributes<T: for<'de> Deserialize<'de> + Default>(value: Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value)?)
}

/// Ids arrive as strings or numbers depending on the field
fn opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// RFC 3339 timestamps; a bare date is read as midnight UTC
fn opt_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    let Some(value) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(timestamp.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Some(Utc.from_utc_datetime(&midnight)))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}")))
}

/// Best-effort event name from an unverified or malformed body, for logging
fn peek_event_type(raw: &[u8]) -> String {
    serde_json::from_slice::<Envelope>(raw)
        .ok()
        .and_then(|e| e.event_type())
        .unwrap_or_else(|| UNKNOWN_EVENT.into())
}

/// Result of dispatching one verified delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub event_type: String,
    pub result: ProcessingResult,
    pub error: Option<String>,
}

/// Result of receiving one HTTP delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Verified and logged; business outcome inside
    Accepted(DispatchOutcome),
    /// Missing or invalid signature, or no enabled gateway
    Unauthorized(String),
    /// Verified but not valid JSON
    Malformed(String),
}

/// Storage collaborators owned by the host application
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub payment_requests: Arc<dyn PaymentRequestStore>,
    pub orders: Arc<dyn OrderStore>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub log: Arc<dyn WebhookLog>,
}

/// Webhook dispatcher
pub struct WebhookDispatcher {
    stores: Stores,
}

impl WebhookDispatcher {
    pub const fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Verify a delivery against the configured gateways, then dispatch it
    pub fn ingest(
        &self,
        gateways: &[GatewaySettings],
        raw: &[u8],
        signature: Option<&str>,
    ) -> IngestOutcome {
        let reason = match signature {
            None => Some("no signature provided"),
            Some(_) if !gateways.iter().any(|g| g.enabled) => Some("no enabled gateway"),
            Some(sig) => match select_gateway(gateways, raw, sig) {
                Some(gateway) => {
                    tracing::debug!(gateway = %gateway.gateway_name, "Webhook signature verified");
                    None
                }
                None => Some("invalid signature"),
            },
        };

        if let Some(reason) = reason {
            tracing::warn!(reason, "Rejected LemonSqueezy webhook");
            self.append_log(WebhookLogEntry::new(
                peek_event_type(raw),
                raw,
                Verification::Invalid,
                ProcessingResult::Rejected,
                Some(reason.to_string()),
            ));
            return IngestOutcome::Unauthorized(reason.to_string());
        }

        let outcome = self.dispatch(raw);
        if outcome.result == ProcessingResult::Rejected {
            return IngestOutcome::Malformed(outcome.error.unwrap_or_default());
        }
        IngestOutcome::Accepted(outcome)
    }

    /// Process a verified payload and write its log entry
    pub fn dispatch(&self, raw: &[u8]) -> DispatchOutcome {
        let event = match WebhookEvent::parse(raw) {
            Ok(event) => event,
            Err(e) if serde_json::from_slice::<IgnoredAny>(raw).is_err() => {
                tracing::warn!(error = %e, "Invalid JSON in LemonSqueezy webhook");
                return self.finish(
                    peek_event_type(raw),
                    raw,
                    ProcessingResult::Rejected,
                    Some(e.to_string()),
                );
            }
            Err(e) => {
                let event_type = peek_event_type(raw);
                tracing::error!(
                    event_type = %event_type,
                    error = %e,
                    "Unreadable webhook payload"
                );
                return self.finish(
                    event_type,
                    raw,
                    ProcessingResult::Failed,
                    Some(e.to_string()),
                );
            }
        };

        let event_type = event.event_type().to_string();
        tracing::info!(event_type = %event_type, "Processing LemonSqueezy webhook");

        match self.handle(event) {
            Ok(result) => self.finish(event_type, raw, result, None),
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "Webhook processing failed");
                self.finish(event_type, raw, ProcessingResult::Failed, Some(e.to_string()))
            }
        }
    }

    fn handle(&self, event: WebhookEvent) -> Result<ProcessingResult> {
        match event {
            WebhookEvent::OrderCreated {
                payment_request_id,
                order,
            } => self.handle_order_created(payment_request_id.as_deref(), order),

            WebhookEvent::Subscription {
                kind,
                subscription_id,
                attributes,
            } => {
                let subscription_id = subscription_id.ok_or_else(|| {
                    PaymentError::WebhookParse("no subscription id in webhook data".into())
                })?;
                self.handle_subscription_event(kind, &subscription_id, attributes)
            }

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                Ok(ProcessingResult::Ignored)
            }
        }
    }

    fn handle_order_created(
        &self,
        payment_request_id: Option<&str>,
        order: Option<OrderData>,
    ) -> Result<ProcessingResult> {
        let mut result = ProcessingResult::Processed;

        match payment_request_id {
            Some(id) => match self.stores.payment_requests.get(id)? {
                None => {
                    tracing::warn!(payment_request_id = %id, "Payment request not found");
                    result = ProcessingResult::NotFound;
                }
                Some(request) if request.status == PaymentRequestStatus::Paid => {
                    tracing::debug!(payment_request_id = %id, "Payment request already paid");
                }
                Some(_) => {
                    self.stores
                        .payment_requests
                        .set_status(id, PaymentRequestStatus::Paid)?;
                    tracing::info!(payment_request_id = %id, "Marked payment request paid");
                }
            },
            None => tracing::debug!("Order carries no payment request reference"),
        }

        // Order mirroring never fails the delivery
        if let Some(order) = order {
            if let Err(e) = self.record_order(order) {
                tracing::error!(error = %e, "Failed to store order data");
            }
        }

        Ok(result)
    }

    fn record_order(&self, data: OrderData) -> Result<()> {
        if self.stores.orders.get(&data.order_id)?.is_some() {
            tracing::debug!(order_id = %data.order_id, "Order already recorded");
            return Ok(());
        }

        let attrs = data.attributes;
        let item = attrs.first_order_item.unwrap_or_default();

        let mut order = Order::new(data.order_id);
        order.status = match attrs.status.as_deref() {
            Some("pending") => OrderStatus::Pending,
            Some("refunded") => OrderStatus::Refunded,
            Some("failed") => OrderStatus::Failed,
            _ => OrderStatus::Paid,
        };
        order.total = from_cents(attrs.total.unwrap_or_default());
        order.subtotal = from_cents(attrs.subtotal.unwrap_or_default());
        order.discount_total = from_cents(attrs.discount_total.unwrap_or_default());
        order.tax = from_cents(attrs.tax.unwrap_or_default());
        order.currency = attrs
            .currency
            .as_deref()
            .unwrap_or("USD")
            .to_uppercase();
        order.order_date = attrs.created_at;
        order.first_order = item.price_id.as_ref().is_some_and(|p| !p.is_null());
        order.product_id = item.product_id;
        order.variant_id = item.variant_id;
        order.product_name = item.product_name;
        order.variant_name = item.variant_name;

        if let Some(subscription_id) = attrs
            .first_subscription_item
            .and_then(|s| s.subscription_id)
        {
            let subscription_variant = self
                .stores
                .subscriptions
                .get(&subscription_id)?
                .and_then(|s| s.variant_name);
            order.billing_interval = subscription_variant
                .as_deref()
                .or(order.variant_name.as_deref())
                .and_then(BillingInterval::detect);
            order.subscription_id = Some(subscription_id);
            order.is_subscription = true;
        }

        if let Some(email) = attrs.user_email {
            order.customer = self.stores.customers.find_by_email(&email)?;
            order.customer_email = Some(email);
        }

        if self.stores.orders.insert(&order)? {
            tracing::info!(
                order_id = %order.order_id,
                total = %order.total,
                currency = %order.currency,
                "Recorded order"
            );
        }
        Ok(())
    }

    fn handle_subscription_event(
        &self,
        kind: EventKind,
        subscription_id: &str,
        attrs: SubscriptionAttributes,
    ) -> Result<ProcessingResult> {
        let status = attrs
            .status
            .as_deref()
            .map(str::parse::<SubscriptionStatus>)
            .transpose()?
            .or_else(|| kind.implied_status());

        let existing = self.stores.subscriptions.get(subscription_id)?;
        let mut subscription = match existing.clone() {
            Some(subscription) => subscription,
            None => {
                let status = status.ok_or_else(|| {
                    PaymentError::WebhookParse("status is required for new subscription".into())
                })?;
                Subscription::new(subscription_id, status)
            }
        };

        if let Some(status) = status {
            subscription.status = status;
        }
        apply_attributes(&mut subscription, attrs);

        if subscription.customer.is_none() {
            if let Some(email) = subscription.customer_email.as_deref() {
                subscription.customer = self.stores.customers.find_by_email(email)?;
            }
        }

        if existing.as_ref() == Some(&subscription) {
            tracing::debug!(subscription_id, "Subscription already up to date");
            return Ok(ProcessingResult::Processed);
        }

        subscription.updated_at = Utc::now();
        self.stores.subscriptions.upsert(&subscription)?;

        tracing::info!(
            subscription_id,
            event = kind.as_str(),
            status = %subscription.status,
            "Updated subscription"
        );
        Ok(ProcessingResult::Processed)
    }

    fn finish(
        &self,
        event_type: String,
        raw: &[u8],
        result: ProcessingResult,
        error: Option<String>,
    ) -> DispatchOutcome {
        self.append_log(WebhookLogEntry::new(
            event_type.clone(),
            raw,
            Verification::Valid,
            result,
            error.clone(),
        ));
        DispatchOutcome {
            event_type,
            result,
            error,
        }
    }

    fn append_log(&self, entry: WebhookLogEntry) {
        if let Err(e) = self.stores.log.append(entry) {
            tracing::error!(error = %e, "Failed to write webhook log entry");
        }
    }
}

fn apply_attributes(subscription: &mut Subscription, attrs: SubscriptionAttributes) {
    fn set<T>(field: &mut Option<T>, value: Option<T>) {
        if value.is_some() {
            *field = value;
        }
    }

    set(&mut subscription.customer_email, attrs.user_email);
    set(&mut subscription.lemonsqueezy_customer_id, attrs.customer_id);
    set(&mut subscription.product_id, attrs.product_id);
    set(&mut subscription.variant_id, attrs.variant_id);
    set(&mut subscription.product_name, attrs.product_name);
    set(&mut subscription.variant_name, attrs.variant_name);
    set(&mut subscription.order_id, attrs.order_id);
    set(&mut subscription.renews_at, attrs.renews_at);
    set(&mut subscription.ends_at, attrs.ends_at);
    set(&mut subscription.trial_ends_at, attrs.trial_ends_at);

    if let Some(urls) = attrs.urls {
        set(&mut subscription.update_payment_url, urls.update_payment_method);
        set(&mut subscription.portal_url, urls.customer_portal);
    }
}
