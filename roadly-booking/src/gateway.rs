use async_trait::async_trait;
use roadly_core::gateway::{CheckoutSession, PaymentGateway};
use roadly_core::{CoreError, CoreResult, Payment};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Gateway stand-in for development and tests: hands out checkout links under
/// `checkout_base_url` and remembers refunds.
pub struct MockPaymentGateway {
    checkout_base_url: String,
    refunds: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new(checkout_base_url: impl Into<String>) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into(),
            refunds: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Payment codes refunded so far, in order.
    pub fn refunds(&self) -> Vec<String> {
        self.refunds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes every call fail until switched back, to simulate an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CoreError::GatewayError("mock gateway unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout(&self, payment: &Payment) -> CoreResult<CheckoutSession> {
        self.check_available()?;
        Ok(CheckoutSession {
            reference: format!("mock_{}", payment.payment_code.to_lowercase()),
            checkout_url: Some(format!(
                "{}/{}",
                self.checkout_base_url.trim_end_matches('/'),
                payment.payment_code
            )),
        })
    }

    async fn refund(&self, payment: &Payment) -> CoreResult<()> {
        self.check_available()?;
        info!("Mock refund of {} {} for {}", payment.amount, payment.currency, payment.payment_code);
        self.refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payment.payment_code.clone());
        Ok(())
    }
}
