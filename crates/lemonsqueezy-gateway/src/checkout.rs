//! LemonSqueezy Checkout Integration
//!
//! Creates hosted checkouts through the LemonSqueezy REST API and fetches
//! customer portal URLs. Settings are passed into every call.

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{PaymentError, Result};
use crate::payment_request::PaymentRequest;
use crate::settings::GatewaySettings;
use crate::subscription::Subscription;

const JSON_API: &str = "application/vnd.api+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// LemonSqueezy API client
#[derive(Clone)]
pub struct LemonSqueezyClient {
    http: Client,
}

impl Default for LemonSqueezyClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LemonSqueezyClient {
    /// Create a new client
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self { http }
    }

    /// Create a hosted checkout and return its URL
    ///
    /// The variant is resolved before any request is made, so a missing
    /// variant never reaches the network.
    pub async fn create_checkout_url(
        &self,
        settings: &GatewaySettings,
        request: &CheckoutRequest,
    ) -> Result<String> {
        let payload = build_checkout_payload(settings, request)?;

        let response = self
            .http
            .post(settings.endpoint("checkouts"))
            .bearer_auth(settings.api_key())
            .header(reqwest::header::ACCEPT, JSON_API)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
            .body(payload.to_string())
            .send()
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "LemonSqueezy checkout request failed");
            })?;

        let document: ResourceDocument<CheckoutAttributes> =
            read_document(response, "create checkout").await?;

        let url = document.data.attributes.url.ok_or_else(|| {
            PaymentError::Upstream("No checkout URL returned".into())
        })?;

        tracing::info!(
            gateway = %settings.gateway_name,
            order_id = ?request.order_id,
            "Created LemonSqueezy checkout"
        );
        Ok(url)
    }

    /// Fetch the customer portal URL for a subscription
    pub async fn customer_portal_url(
        &self,
        settings: &GatewaySettings,
        subscription_id: &str,
    ) -> Result<String> {
        let response = self
            .http
            .get(settings.endpoint(&format!("subscriptions/{subscription_id}")))
            .bearer_auth(settings.api_key())
            .header(reqwest::header::ACCEPT, JSON_API)
            .send()
            .await?;

        let document: ResourceDocument<RemoteSubscriptionAttributes> =
            read_document(response, "get subscription").await?;

        document
            .data
            .attributes
            .urls
            .and_then(|u| u.customer_portal)
            .ok_or_else(|| PaymentError::Upstream("No customer portal URL returned".into()))
    }

    /// Portal URL for a subscription: the cached one, else a fresh fetch.
    ///
    /// Failures are logged and yield `None`.
    pub async fn portal_url_for(
        &self,
        settings: &GatewaySettings,
        subscription: &Subscription,
    ) -> Option<String> {
        if let Some(url) = subscription.portal_url() {
            return Some(url.to_string());
        }

        match self
            .customer_portal_url(settings, &subscription.subscription_id)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(
                    subscription_id = %subscription.subscription_id,
                    error = %e,
                    "Error getting portal URL"
                );
                None
            }
        }
    }

    /// Validate credentials by fetching the configured store
    pub async fn test_connection(&self, settings: &GatewaySettings) -> Result<()> {
        let response = self
            .http
            .get(settings.endpoint(&format!("stores/{}", settings.store_id)))
            .bearer_auth(settings.api_key())
            .header(reqwest::header::ACCEPT, JSON_API)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(PaymentError::Configuration(
                "Invalid API key. Please check your credentials.".into(),
            )),
            StatusCode::NOT_FOUND => Err(PaymentError::Configuration(
                "Store ID not found. Please check your Store ID.".into(),
            )),
            status => Err(PaymentError::Upstream(format!("API error: {status}"))),
        }
    }
}

/// Request to create a checkout
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Custom price; the variant must allow it
    #[serde(default)]
    pub amount: Option<Decimal>,

    /// Informational only; the variant's store currency is what gets charged
    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub payer_email: Option<String>,

    #[serde(default)]
    pub payer_name: Option<String>,

    #[serde(default)]
    pub reference_doctype: Option<String>,

    #[serde(default)]
    pub reference_docname: Option<String>,

    /// Payment request id, echoed back in `order_created`
    #[serde(default)]
    pub order_id: Option<String>,

    /// Falls back to the gateway's default variant
    #[serde(default)]
    pub variant_id: Option<String>,
}

impl CheckoutRequest {
    /// Build a request for a host payment request
    pub fn for_payment_request(request: &PaymentRequest) -> Self {
        Self {
            amount: Some(request.amount),
            currency: Some(request.currency.clone()),
            payer_email: request.email.clone(),
            payer_name: request.payer_name.clone(),
            reference_doctype: request.reference_doctype.clone(),
            reference_docname: request.reference_docname.clone(),
            order_id: Some(request.id.clone()),
            variant_id: None,
        }
    }
}

/// JSON:API document for `POST /checkouts`
pub fn build_checkout_payload(
    settings: &GatewaySettings,
    request: &CheckoutRequest,
) -> Result<Value> {
    let variant_id = settings.resolve_variant(request.variant_id.as_deref())?;

    let mut checkout_data = json!({
        "custom": {
            "reference_doctype": request.reference_doctype,
            "reference_docname": request.reference_docname,
            "payment_request_id": request.order_id,
        }
    });

    if let Some(email) = request.payer_email.as_deref().filter(|e| !e.is_empty()) {
        checkout_data["email"] = json!(email);
    }
    if let Some(name) = request.payer_name.as_deref().filter(|n| !n.is_empty()) {
        checkout_data["name"] = json!(name);
    }
    if let Some(amount) = request.amount.filter(|a| !a.is_zero()) {
        checkout_data["custom_price"] = json!(to_cents(amount)?);
    }

    Ok(json!({
        "data": {
            "type": "checkouts",
            "attributes": { "checkout_data": checkout_data },
            "relationships": {
                "store": { "data": { "type": "stores", "id": settings.store_id } },
                "variant": { "data": { "type": "variants", "id": variant_id } }
            }
        }
    }))
}

fn to_cents(amount: Decimal) -> Result<i64> {
    if amount.is_sign_negative() {
        return Err(PaymentError::Configuration(format!(
            "amount must not be negative: {amount}"
        )));
    }
    (amount * dec!(100))
        .round()
        .to_i64()
        .ok_or_else(|| PaymentError::Configuration(format!("amount out of range: {amount}")))
}

async fn read_document<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    action: &str,
) -> Result<ResourceDocument<T>> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::error!(%status, action, detail = %detail, "LemonSqueezy API error");
        return Err(PaymentError::Upstream(format!(
            "failed to {action}: HTTP {status}"
        )));
    }
    Ok(response.json().await?)
}

#[derive(Debug, Deserialize)]
struct ResourceDocument<T> {
    data: Resource<T>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct CheckoutAttributes {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteSubscriptionAttributes {
    urls: Option<RemoteSubscriptionUrls>,
}

#[derive(Debug, Deserialize)]
struct RemoteSubscriptionUrls {
    customer_portal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionStatus;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> GatewaySettings {
        GatewaySettings::new("main", "sk_test_123", "7", "whsec_test")
            .with_default_variant("42")
            .with_api_base(server.uri())
    }

    #[test]
    fn test_payload_shape() {
        let settings =
            GatewaySettings::new("main", "key", "7", "secret").with_default_variant("42");
        let request = CheckoutRequest {
            amount: Some(dec!(19.99)),
            currency: Some("USD".into()),
            payer_email: Some("jane@example.com".into()),
            payer_name: Some("Jane".into()),
            reference_doctype: Some("Sales Invoice".into()),
            reference_docname: Some("SINV-0001".into()),
            order_id: Some("PR-001".into()),
            variant_id: None,
        };

        let payload = build_checkout_payload(&settings, &request).unwrap();
        let data = &payload["data"];
        let checkout = &data["attributes"]["checkout_data"];

        assert_eq!(data["type"], "checkouts");
        assert_eq!(data["relationships"]["store"]["data"]["id"], "7");
        assert_eq!(data["relationships"]["variant"]["data"]["id"], "42");
        assert_eq!(checkout["email"], "jane@example.com");
        assert_eq!(checkout["name"], "Jane");
        assert_eq!(checkout["custom_price"], 1999);
        assert_eq!(checkout["custom"]["payment_request_id"], "PR-001");
        assert_eq!(checkout["custom"]["reference_docname"], "SINV-0001");
    }

    #[test]
    fn test_payload_omits_empty_optionals() {
        let settings = GatewaySettings::new("main", "key", "7", "secret");
        let request = CheckoutRequest {
            variant_id: Some("9".into()),
            ..Default::default()
        };

        let payload = build_checkout_payload(&settings, &request).unwrap();
        let checkout = &payload["data"]["attributes"]["checkout_data"];
        assert!(checkout.get("email").is_none());
        assert!(checkout.get("custom_price").is_none());
        assert_eq!(payload["data"]["relationships"]["variant"]["data"]["id"], "9");
    }

    #[test]
    fn test_negative_amount_rejected() {
        let settings = GatewaySettings::new("main", "key", "7", "secret").with_default_variant("1");
        let request = CheckoutRequest {
            amount: Some(dec!(-5)),
            ..Default::default()
        };
        assert!(matches!(
            build_checkout_payload(&settings, &request),
            Err(PaymentError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_from_payment_request() {
        let pr = PaymentRequest::new("PR-9", dec!(5.5), "EUR").with_email("a@b.c");
        let request = CheckoutRequest::for_payment_request(&pr);
        assert_eq!(request.order_id.as_deref(), Some("PR-9"));
        assert_eq!(request.amount, Some(dec!(5.5)));
        assert_eq!(request.payer_email.as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn test_create_checkout_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkouts"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("accept", JSON_API))
            .and(body_partial_json(json!({
                "data": { "relationships": { "variant": { "data": { "id": "42" } } } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {
                    "type": "checkouts",
                    "id": "abc",
                    "attributes": { "url": "https://shop.lemonsqueezy.com/checkout/custom/abc" }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LemonSqueezyClient::new();
        let url = client
            .create_checkout_url(&settings(&server), &CheckoutRequest::default())
            .await
            .unwrap();

        assert_eq!(url, "https://shop.lemonsqueezy.com/checkout/custom/abc");
    }

    #[tokio::test]
    async fn test_missing_variant_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let settings =
            GatewaySettings::new("main", "key", "7", "secret").with_api_base(server.uri());
        let err = LemonSqueezyClient::new()
            .create_checkout_url(&settings, &CheckoutRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_upstream_error_hides_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkouts"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_string(r#"{"errors":[{"detail":"bad variant"}]}"#),
            )
            .mount(&server)
            .await;

        let err = LemonSqueezyClient::new()
            .create_checkout_url(&settings(&server), &CheckoutRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Upstream(_)));
        assert!(!err.to_string().contains("sk_test_123"));
    }

    #[tokio::test]
    async fn test_portal_url_prefers_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut subscription = Subscription::new("55", SubscriptionStatus::Active);
        subscription.portal_url = Some("https://cached.example/portal".into());

        let url = LemonSqueezyClient::new()
            .portal_url_for(&settings(&server), &subscription)
            .await;
        assert_eq!(url.as_deref(), Some("https://cached.example/portal"));
    }

    #[tokio::test]
    async fn test_portal_url_refreshes_from_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/55"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "type": "subscriptions",
                    "id": "55",
                    "attributes": { "urls": { "customer_portal": "https://fresh.example/portal" } }
                }
            })))
            .mount(&server)
            .await;

        let subscription = Subscription::new("55", SubscriptionStatus::Active);
        let client = LemonSqueezyClient::new();

        let url = client.portal_url_for(&settings(&server), &subscription).await;
        assert_eq!(url.as_deref(), Some("https://fresh.example/portal"));

        let missing = Subscription::new("56", SubscriptionStatus::Active);
        assert!(client.portal_url_for(&settings(&server), &missing).await.is_none());
    }

    #[tokio::test]
    async fn test_connection_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stores/7"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = LemonSqueezyClient::new()
            .test_connection(&settings(&server))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid API key"));

        let other = GatewaySettings::new("main", "key", "8", "secret").with_api_base(server.uri());
        let err = LemonSqueezyClient::new()
            .test_connection(&other)
            .await
            .unwrap_err();
        // unmatched wiremock requests answer 404
        assert!(err.to_string().contains("Store ID not found"));
    }
}
