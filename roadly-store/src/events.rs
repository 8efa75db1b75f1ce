use async_trait::async_trait;
use roadly_core::repository::EventPublisher;
use roadly_core::CoreResult;
use roadly_shared::DomainEvent;
use tracing::info;

/// Publisher used when no broker is configured: every event goes to the log.
#[derive(Clone, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event)?;
        info!(topic = event.topic(), key = %event.key(), "event: {}", payload);
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::EventProducer;

#[cfg(feature = "kafka")]
mod kafka {
    use super::*;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use roadly_core::CoreError;
    use std::time::Duration;
    use tracing::error;

    #[derive(Clone)]
    pub struct EventProducer {
        producer: FutureProducer,
    }

    impl EventProducer {
        pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .create()?;

            Ok(Self { producer })
        }
    }

    #[async_trait]
    impl EventPublisher for EventProducer {
        async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
            let topic = event.topic();
            let key = event.key();
            let payload = serde_json::to_string(event)?;
            let record = FutureRecord::to(topic).key(&key).payload(&payload);

            match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
                Ok(delivery) => {
                    info!(
                        "Sent message to {}/{}: partition {} offset {}",
                        topic, key, delivery.partition, delivery.offset
                    );
                    Ok(())
                }
                Err((e, _msg)) => {
                    error!("Failed to send message to {}: {}", topic, e);
                    Err(CoreError::InternalError(format!("kafka: {}", e)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roadly_shared::models::events::BookingExpiredEvent;

    #[tokio::test]
    async fn test_log_publisher_accepts_events() {
        let event = DomainEvent::BookingExpired(BookingExpiredEvent {
            booking_code: "BK23456789".to_string(),
            trip_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now().timestamp(),
        });
        assert!(LogEventPublisher.publish(&event).await.is_ok());
    }
}
