use async_trait::async_trait;
use roadly_core::repository::EventPublisher;
use roadly_core::CoreResult;
use roadly_shared::DomainEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::Metrics;

/// Hands every domain event to the SSE subscribers and the metrics before
/// forwarding it to the downstream publisher (Kafka or the log).
pub struct FanoutPublisher {
    sse_tx: broadcast::Sender<DomainEvent>,
    metrics: Arc<Metrics>,
    downstream: Arc<dyn EventPublisher>,
}

impl FanoutPublisher {
    pub fn new(
        sse_tx: broadcast::Sender<DomainEvent>,
        metrics: Arc<Metrics>,
        downstream: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { sse_tx, metrics, downstream }
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        self.metrics.observe(event);
        // Err only means nobody is listening
        let _ = self.sse_tx.send(event.clone());
        self.downstream.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadly_shared::models::events::SeatsHeldEvent;
    use roadly_store::MemoryEventLog;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_event_reaches_subscribers_and_downstream() {
        let (tx, mut rx) = broadcast::channel(8);
        let log = Arc::new(MemoryEventLog::new());
        let publisher = FanoutPublisher::new(tx, Arc::new(Metrics::new().unwrap()), log.clone());

        let trip_id = Uuid::new_v4();
        publisher
            .publish(&DomainEvent::SeatsHeld(SeatsHeldEvent {
                trip_id,
                seat_numbers: vec!["A1".to_string()],
                expires_at: 0,
                timestamp: 0,
            }))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seat_trip_id(), Some(trip_id));
        assert_eq!(log.topics(), vec!["seats.held"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let (tx, _) = broadcast::channel(8);
        let log = Arc::new(MemoryEventLog::new());
        let publisher = FanoutPublisher::new(tx, Arc::new(Metrics::new().unwrap()), log.clone());
        let event = DomainEvent::SeatsHeld(SeatsHeldEvent {
            trip_id: Uuid::new_v4(),
            seat_numbers: vec![],
            expires_at: 0,
            timestamp: 0,
        });
        assert!(publisher.publish(&event).await.is_ok());
        assert_eq!(log.events().len(), 1);
    }
}
