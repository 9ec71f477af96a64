//! Order Mirroring
//!
//! Orders are recorded once per LemonSqueezy order id when `order_created`
//! arrives. Amounts arrive in cents and are stored as decimals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::subscription::IndicatorColor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Paid,
    Pending,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub const fn color(self) -> IndicatorColor {
        match self {
            Self::Paid => IndicatorColor::Green,
            Self::Pending => IndicatorColor::Orange,
            Self::Refunded | Self::Failed => IndicatorColor::Red,
        }
    }
}

/// Billing interval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Weekly,
    Monthly,
    Yearly,
}

impl BillingInterval {
    /// Guess the interval from a variant name such as "Pro (Monthly)"
    pub fn detect(variant_name: &str) -> Option<Self> {
        let lower = variant_name.to_lowercase();
        if lower.contains("month") {
            Some(Self::Monthly)
        } else if lower.contains("year") {
            Some(Self::Yearly)
        } else if lower.contains("week") {
            Some(Self::Weekly)
        } else {
            None
        }
    }
}

/// A mirrored order record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub status: OrderStatus,
    pub customer: Option<String>,
    pub customer_email: Option<String>,

    pub total: Decimal,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax: Decimal,

    /// ISO currency code, upper case
    pub currency: String,

    pub order_date: Option<DateTime<Utc>>,

    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub product_name: Option<String>,
    pub variant_name: Option<String>,

    pub subscription_id: Option<String>,
    pub is_subscription: bool,
    pub billing_interval: Option<BillingInterval>,
    pub billing_interval_count: u32,

    pub first_order: bool,
}

impl Order {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Paid,
            customer: None,
            customer_email: None,
            total: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            tax: Decimal::ZERO,
            currency: "USD".into(),
            order_date: None,
            product_id: None,
            variant_id: None,
            product_name: None,
            variant_name: None,
            subscription_id: None,
            is_subscription: false,
            billing_interval: None,
            billing_interval_count: 1,
            first_order: false,
        }
    }

    /// Normalised monthly value for MRR; zero unless a paid subscription order
    pub fn monthly_value(&self) -> Decimal {
        if !self.is_subscription || self.status != OrderStatus::Paid {
            return Decimal::ZERO;
        }

        let count = Decimal::from(self.billing_interval_count.max(1));
        match self.billing_interval {
            Some(BillingInterval::Monthly) => self.total / count,
            Some(BillingInterval::Yearly) => self.total / dec!(12) / count,
            // average weeks per month
            Some(BillingInterval::Weekly) => self.total * dec!(4.33) / count,
            None => Decimal::ZERO,
        }
    }

    pub const fn status_color(&self) -> IndicatorColor {
        self.status.color()
    }
}

/// Convert provider cents to a currency amount
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Order storage trait
pub trait OrderStore: Send + Sync {
    fn get(&self, order_id: &str) -> Result<Option<Order>>;

    /// Insert a new order; returns `false` when the id is already recorded
    fn insert(&self, order: &Order) -> Result<bool>;
}

/// In-memory order store (for development)
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.read().map_or(0, |o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderStore for MemoryOrderStore {
    fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let orders = self
            .orders
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(orders.get(order_id).cloned())
    }

    fn insert(&self, order: &Order) -> Result<bool> {
        let mut orders = self
            .orders
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        if orders.contains_key(&order.order_id) {
            return Ok(false);
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(true)
    }
}
