use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::payment::Payment;
use crate::CoreResult;

/// What the gateway hands back when a payment is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub reference: String,
    pub checkout_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout for the payment with the provider
    async fn create_checkout(&self, payment: &Payment) -> CoreResult<CheckoutSession>;

    /// Return the captured amount to the customer
    async fn refund(&self, payment: &Payment) -> CoreResult<()>;
}
