//! Gateway Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or invalid gateway settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Webhook signature did not match any enabled gateway
    #[error("Webhook verification failed: {0}")]
    Verification(String),

    /// LemonSqueezy API returned a failure or could not be reached
    #[error("LemonSqueezy error: {0}")]
    Upstream(String),

    /// Webhook payload could not be interpreted
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Local record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::Configuration(_) => "Payment gateway is not configured correctly.",
            Self::Verification(_) => "Webhook signature invalid.",
            Self::Upstream(_) => "Failed to reach the payment provider. Please try again.",
            Self::NotFound(_) => "Requested record not found.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream("request timeout".into())
        } else {
            Self::Upstream(err.without_url().to_string())
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::WebhookParse(err.to_string())
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
