//! Subscription Mirroring
//!
//! Local copy of LemonSqueezy subscription state. Records are only ever
//! written by inbound webhook events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::{PaymentError, Result};

/// Remote subscription status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    OnTrial,
    Paused,
    PastDue,
    Unpaid,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnTrial => "on_trial",
            Self::Paused => "paused",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Status indicator for display
    pub const fn color(self) -> IndicatorColor {
        match self {
            Self::Active => IndicatorColor::Green,
            Self::OnTrial => IndicatorColor::Blue,
            Self::Paused | Self::PastDue => IndicatorColor::Orange,
            Self::Unpaid | Self::Cancelled => IndicatorColor::Red,
            Self::Expired => IndicatorColor::Gray,
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "on_trial" => Ok(Self::OnTrial),
            "paused" => Ok(Self::Paused),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(PaymentError::WebhookParse(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display indicator color
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Green,
    Blue,
    Orange,
    Red,
    Gray,
}

/// A mirrored subscription record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// LemonSqueezy subscription id
    pub subscription_id: String,

    pub status: SubscriptionStatus,

    /// Local customer reference, linked by email
    pub customer: Option<String>,

    /// LemonSqueezy customer id
    pub lemonsqueezy_customer_id: Option<String>,

    pub customer_email: Option<String>,

    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub product_name: Option<String>,
    pub variant_name: Option<String>,

    /// Order that started the subscription
    pub order_id: Option<String>,

    /// Next renewal date
    pub renews_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,

    /// Hosted page for updating the payment method
    pub update_payment_url: Option<String>,

    /// Cached customer portal URL
    pub portal_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a new subscription record
    pub fn new(subscription_id: impl Into<String>, status: SubscriptionStatus) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: subscription_id.into(),
            status,
            customer: None,
            lemonsqueezy_customer_id: None,
            customer_email: None,
            product_id: None,
            variant_id: None,
            product_name: None,
            variant_name: None,
            order_id: None,
            renews_at: None,
            ends_at: None,
            trial_ends_at: None,
            update_payment_url: None,
            portal_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active or on trial
    pub const fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::OnTrial
        )
    }

    pub const fn status_color(&self) -> IndicatorColor {
        self.status.color()
    }

    /// Cached portal URL; may be stale or missing.
    ///
    /// See `LemonSqueezyClient::portal_url_for` for the refreshing variant.
    pub fn portal_url(&self) -> Option<&str> {
        self.portal_url.as_deref()
    }
}

/// Subscription storage trait
pub trait SubscriptionStore: Send + Sync {
    /// Get subscription by remote id
    fn get(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// Insert or replace by remote id
    fn upsert(&self, subscription: &Subscription) -> Result<()>;
}

/// In-memory subscription store (for development)
#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(subscriptions.get(subscription_id).cloned())
    }

    fn upsert(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        subscriptions.insert(subscription.subscription_id.clone(), subscription.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(Subscription::new("1", SubscriptionStatus::Active).is_active());
        assert!(Subscription::new("1", SubscriptionStatus::OnTrial).is_active());

        for status in [
            SubscriptionStatus::Paused,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert!(!Subscription::new("1", status).is_active(), "{status}");
        }
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(SubscriptionStatus::Active.color(), IndicatorColor::Green);
        assert_eq!(SubscriptionStatus::OnTrial.color(), IndicatorColor::Blue);
        assert_eq!(SubscriptionStatus::PastDue.color(), IndicatorColor::Orange);
        assert_eq!(SubscriptionStatus::Cancelled.color(), IndicatorColor::Red);
        assert_eq!(SubscriptionStatus::Expired.color(), IndicatorColor::Gray);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "on_trial".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::OnTrial
        );
        assert_eq!(
            " Past_Due ".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::PastDue
        );
        assert!("trialing".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_wire_names() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }

    #[test]
    fn test_upsert_replaces() {
        let store = MemorySubscriptionStore::new();
        let mut sub = Subscription::new("sub_1", SubscriptionStatus::Active);
        store.upsert(&sub).unwrap();

        sub.status = SubscriptionStatus::Cancelled;
        store.upsert(&sub).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("sub_1").unwrap().unwrap().status,
            SubscriptionStatus::Cancelled
        );
        assert!(store.get("missing").unwrap().is_none());
    }
}
