//! Payment Requests and Customers
//!
//! Both are owned by the host application. The gateway reads payment
//! requests to build checkouts and flips them to `Paid` on `order_created`;
//! customers are only looked up by email.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{PaymentError, Result};

/// Host payment request status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentRequestStatus {
    Draft,
    Requested,
    Initiated,
    Unpaid,
    Paid,
    Failed,
    Cancelled,
}

/// A host payment request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub email: Option<String>,
    pub payer_name: Option<String>,
    pub reference_doctype: Option<String>,
    pub reference_docname: Option<String>,
    pub status: PaymentRequestStatus,
}

impl PaymentRequest {
    pub fn new(id: impl Into<String>, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            amount,
            currency: currency.into(),
            email: None,
            payer_name: None,
            reference_doctype: None,
            reference_docname: None,
            status: PaymentRequestStatus::Unpaid,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Payment request storage trait
pub trait PaymentRequestStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<PaymentRequest>>;

    /// Set the status of an existing request, `NotFound` otherwise
    fn set_status(&self, id: &str, status: PaymentRequestStatus) -> Result<()>;
}

/// Customer lookup owned by the host application
pub trait CustomerDirectory: Send + Sync {
    /// Customer reference for an email address
    fn find_by_email(&self, email: &str) -> Result<Option<String>>;
}

/// In-memory payment request store (for development)
#[derive(Default)]
pub struct MemoryPaymentRequestStore {
    requests: RwLock<HashMap<String, PaymentRequest>>,
}

impl MemoryPaymentRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, replacing any with the same id
    pub fn insert(&self, request: PaymentRequest) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        requests.insert(request.id.clone(), request);
        Ok(())
    }
}

impl PaymentRequestStore for MemoryPaymentRequestStore {
    fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
        let requests = self
            .requests
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(requests.get(id).cloned())
    }

    fn set_status(&self, id: &str, status: PaymentRequestStatus) -> Result<()> {
        let mut requests = self
            .requests
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment request {id}")))?;
        request.status = status;
        Ok(())
    }
}

/// In-memory customer directory keyed by lower-cased email
#[derive(Default)]
pub struct MemoryCustomerDirectory {
    by_email: RwLock<HashMap<String, String>>,
}

impl MemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: &str, customer: impl Into<String>) -> Result<()> {
        let mut by_email = self
            .by_email
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        by_email.insert(email.trim().to_lowercase(), customer.into());
        Ok(())
    }
}

impl CustomerDirectory for MemoryCustomerDirectory {
    fn find_by_email(&self, email: &str) -> Result<Option<String>> {
        let by_email = self
            .by_email
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(by_email.get(&email.trim().to_lowercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_set_status_on_missing_request() {
        let store = MemoryPaymentRequestStore::new();
        let err = store
            .set_status("PR-404", PaymentRequestStatus::Paid)
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }

    #[test]
    fn test_set_status() {
        let store = MemoryPaymentRequestStore::new();
        store
            .insert(PaymentRequest::new("PR-001", dec!(19.99), "USD"))
            .unwrap();
        store.set_status("PR-001", PaymentRequestStatus::Paid).unwrap();
        assert_eq!(
            store.get("PR-001").unwrap().unwrap().status,
            PaymentRequestStatus::Paid
        );
    }

    #[test]
    fn test_customer_lookup_ignores_case() {
        let directory = MemoryCustomerDirectory::new();
        directory.insert("Jane@Example.com", "CUST-0001").unwrap();
        assert_eq!(
            directory.find_by_email("jane@example.com").unwrap().as_deref(),
            Some("CUST-0001")
        );
        assert!(directory.find_by_email("john@example.com").unwrap().is_none());
    }
}
