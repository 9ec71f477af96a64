//! Gateway Settings
//!
//! One `GatewaySettings` per configured LemonSqueezy store. Loaded once and
//! passed by reference into every outbound call and into the verifier.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{PaymentError, Result};

/// Default LemonSqueezy API base URL
pub const DEFAULT_API_BASE: &str = "https://api.lemonsqueezy.com/v1";

/// Credentials and defaults for one gateway instance
#[derive(Debug)]
pub struct GatewaySettings {
    /// Display name of this gateway instance
    pub gateway_name: String,

    /// Disabled gateways never verify webhooks
    pub enabled: bool,

    api_key: SecretString,

    /// LemonSqueezy store id
    pub store_id: String,

    webhook_secret: SecretString,

    /// Variant used when a checkout request does not name one
    pub default_variant_id: Option<String>,

    /// API base URL, overridable for tests and proxies
    pub api_base: String,
}

impl GatewaySettings {
    /// Create enabled settings against the public API
    pub fn new(
        gateway_name: impl Into<String>,
        api_key: impl Into<String>,
        store_id: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            gateway_name: gateway_name.into(),
            enabled: true,
            api_key: SecretString::from(api_key.into()),
            store_id: store_id.into(),
            webhook_secret: SecretString::from(webhook_secret.into()),
            default_variant_id: None,
            api_base: DEFAULT_API_BASE.into(),
        }
    }

    /// Set the default variant id
    #[must_use]
    pub fn with_default_variant(mut self, variant_id: impl Into<String>) -> Self {
        self.default_variant_id = Some(variant_id.into());
        self
    }

    /// Point the settings at a different API base URL
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Required: `LEMONSQUEEZY_API_KEY`, `LEMONSQUEEZY_STORE_ID`,
    /// `LEMONSQUEEZY_WEBHOOK_SECRET`. Optional: `LEMONSQUEEZY_GATEWAY_NAME`,
    /// `LEMONSQUEEZY_DEFAULT_VARIANT_ID`, `LEMONSQUEEZY_ENABLED`,
    /// `LEMONSQUEEZY_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let api_key = required_env("LEMONSQUEEZY_API_KEY")?;
        let store_id = required_env("LEMONSQUEEZY_STORE_ID")?;
        let webhook_secret = required_env("LEMONSQUEEZY_WEBHOOK_SECRET")?;
        let gateway_name =
            std::env::var("LEMONSQUEEZY_GATEWAY_NAME").unwrap_or_else(|_| "default".into());

        let mut settings = Self::new(gateway_name, api_key, store_id, webhook_secret);

        if let Some(variant) = optional_env("LEMONSQUEEZY_DEFAULT_VARIANT_ID") {
            settings = settings.with_default_variant(variant);
        }
        if let Some(base) = optional_env("LEMONSQUEEZY_API_BASE") {
            settings = settings.with_api_base(base);
        }
        if let Some(enabled) = optional_env("LEMONSQUEEZY_ENABLED") {
            settings.enabled = parse_flag(&enabled);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot possibly work
    pub fn validate(&self) -> Result<()> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(PaymentError::Configuration("API key is empty".into()));
        }
        if self.store_id.trim().is_empty() {
            return Err(PaymentError::Configuration("store id is empty".into()));
        }
        Ok(())
    }

    /// Resolve the variant for a checkout, falling back to the default
    pub fn resolve_variant<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        requested
            .filter(|v| !v.trim().is_empty())
            .or(self.default_variant_id.as_deref())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::Configuration(
                    "variant id is required; set a default variant id or provide one".into(),
                )
            })
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// The webhook signing secret, `None` when unset
    pub(crate) fn webhook_secret(&self) -> Option<&str> {
        let secret = self.webhook_secret.expose_secret();
        (!secret.is_empty()).then_some(secret)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

fn required_env(name: &str) -> Result<String> {
    optional_env(name).ok_or_else(|| PaymentError::Configuration(format!("{name} not set")))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_variant_wins_over_default() {
        let settings =
            GatewaySettings::new("main", "key", "1", "secret").with_default_variant("42");
        assert_eq!(settings.resolve_variant(Some("7")).unwrap(), "7");
        assert_eq!(settings.resolve_variant(None).unwrap(), "42");
        assert_eq!(settings.resolve_variant(Some("  ")).unwrap(), "42");
    }

    #[test]
    fn test_missing_variant_is_configuration_error() {
        let settings = GatewaySettings::new("main", "key", "1", "secret");
        let err = settings.resolve_variant(None).unwrap_err();
        assert!(matches!(err, PaymentError::Configuration(_)));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let settings = GatewaySettings::new("main", "sk_live_abc", "1", "whsec_xyz");
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk_live_abc"));
        assert!(!debug.contains("whsec_xyz"));
    }

    #[test]
    fn test_endpoint_joins_base_and_path() {
        let settings = GatewaySettings::new("main", "key", "1", "secret")
            .with_api_base("http://localhost:9/v1/");
        assert_eq!(
            settings.endpoint("/checkouts"),
            "http://localhost:9/v1/checkouts"
        );
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }
}
