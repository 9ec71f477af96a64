//! Application State

use std::sync::Arc;

use lemonsqueezy_gateway::{
    GatewaySettings, LemonSqueezyClient, MemoryPaymentRequestStore, WebhookDispatcher,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// LemonSqueezy API client
    pub client: LemonSqueezyClient,

    /// Configured gateway instances; read-only after startup
    pub gateways: Arc<Vec<GatewaySettings>>,

    /// Webhook dispatcher with its stores
    pub dispatcher: Arc<WebhookDispatcher>,

    /// Stand-in for the host application's payment requests
    pub payment_requests: Arc<MemoryPaymentRequestStore>,
}

impl AppState {
    /// Named gateway, or the first enabled one
    pub fn gateway(&self, name: Option<&str>) -> Option<&GatewaySettings> {
        match name {
            Some(name) => self.gateways.iter().find(|g| g.gateway_name == name),
            None => self.gateways.iter().find(|g| g.enabled),
        }
    }
}
