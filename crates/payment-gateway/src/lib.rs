//! External payment provider adapter.
//!
//! Checkout creates a gateway order for the reservation amount, the patient
//! pays on the provider's side, and verification re-fetches the order to
//! check its status and receipt server-side. The gateway never moves wallet
//! funds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use booking_domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway order not found")]
    OrderNotFound,
    #[error("http error: {0}")]
    Http(String),
    #[error("gateway rejected request: {0}")]
    Api(String),
    #[error("lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOrderStatus {
    Created,
    Attempted,
    Paid,
}

/// Provider-side order. The receipt carries the reservation id so
/// verification can tie the payment back to exactly one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: Money,
    pub receipt: String,
    pub status: GatewayOrderStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, GatewayError>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        (**self).create_order(amount, receipt).await
    }

    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, GatewayError> {
        (**self).fetch_order(order_id).await
    }
}

/// Talks to a REST payment provider. Amounts go over the wire in minor
/// units, matching [`Money`].
#[derive(Debug, Clone)]
pub struct RestPaymentGateway {
    endpoint: String,
    key_id: String,
    key_secret: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: u64,
    receipt: String,
    status: String,
}

fn status_from_wire(raw: &str) -> Result<GatewayOrderStatus, GatewayError> {
    match raw {
        "created" => Ok(GatewayOrderStatus::Created),
        "attempted" => Ok(GatewayOrderStatus::Attempted),
        "paid" => Ok(GatewayOrderStatus::Paid),
        other => Err(GatewayError::Api(format!("unknown order status {other}"))),
    }
}

impl RestPaymentGateway {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            client: reqwest::Client::new(),
        }
    }

    fn order_from_response(response: OrderResponse) -> Result<GatewayOrder, GatewayError> {
        Ok(GatewayOrder {
            order_id: response.id,
            amount: Money(response.amount),
            receipt: response.receipt,
            status: status_from_wire(&response.status)?,
        })
    }
}

#[async_trait]
impl PaymentGateway for RestPaymentGateway {
    async fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        let response = self
            .client
            .post(format!("{}/orders", self.endpoint))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount: amount.0,
                currency: "INR",
                receipt,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Api(format!(
                "create order failed with {}",
                response.status()
            )));
        }
        let payload: OrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Self::order_from_response(payload)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, GatewayError> {
        let response = self
            .client
            .get(format!("{}/orders/{order_id}", self.endpoint))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::OrderNotFound);
        }
        if !response.status().is_success() {
            return Err(GatewayError::Api(format!(
                "fetch order failed with {}",
                response.status()
            )));
        }
        let payload: OrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Self::order_from_response(payload)
    }
}

/// Test double. `mark_paid` plays the role of the provider-side payment
/// page; flows drive it explicitly.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPaymentGateway {
    orders: Arc<Mutex<HashMap<String, GatewayOrder>>>,
}

impl InMemoryPaymentGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_paid(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut orders = self.orders.lock().map_err(|_| GatewayError::LockPoisoned)?;
        let order = orders
            .get_mut(order_id)
            .ok_or(GatewayError::OrderNotFound)?;
        order.status = GatewayOrderStatus::Paid;
        Ok(())
    }

    pub fn mark_attempted(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut orders = self.orders.lock().map_err(|_| GatewayError::LockPoisoned)?;
        let order = orders
            .get_mut(order_id)
            .ok_or(GatewayError::OrderNotFound)?;
        order.status = GatewayOrderStatus::Attempted;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_order(
        &self,
        amount: Money,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        let order = GatewayOrder {
            order_id: format!("order_{}", Uuid::now_v7().simple()),
            amount,
            receipt: receipt.to_string(),
            status: GatewayOrderStatus::Created,
        };
        let mut orders = self.orders.lock().map_err(|_| GatewayError::LockPoisoned)?;
        orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, GatewayError> {
        let orders = self.orders.lock().map_err(|_| GatewayError::LockPoisoned)?;
        orders
            .get(order_id)
            .cloned()
            .ok_or(GatewayError::OrderNotFound)
    }
}
