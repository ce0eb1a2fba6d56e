//! Domain events emitted after confirmed directory writes

use async_trait::async_trait;
use spsh_core::types::DirectoryEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{DirectoryError, DirectoryResult};

/// Receives events once the directory write they describe succeeded
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DirectoryEvent) -> DirectoryResult<()>;
}

/// Queues events on a bounded channel for a consumer task
#[derive(Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<DirectoryEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DirectoryEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: DirectoryEvent) -> DirectoryResult<()> {
        debug!("Queueing {} for person {}", event.name(), event.person_id());
        self.sender
            .send(event)
            .await
            .map_err(|e| DirectoryError::EventPublish(format!("Failed to queue event: {}", e)))
    }
}

/// Writes events to the log only; used when nothing consumes them
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DirectoryEvent) -> DirectoryResult<()> {
        info!(event_id = %event.id, "Event {} for person {}", event.name(), event.person_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spsh_core::types::DirectoryEventKind;

    fn password_changed() -> DirectoryEvent {
        DirectoryEvent::new(DirectoryEventKind::PasswordChanged {
            person_id: "p-1".to_string(),
            username: "mmustermann".to_string(),
        })
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers() {
        let (publisher, mut receiver) = ChannelEventPublisher::new(4);
        let event = password_changed();

        publisher.publish(event.clone()).await.unwrap();
        assert_eq!(receiver.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_channel_publisher_closed_receiver() {
        let (publisher, receiver) = ChannelEventPublisher::new(1);
        drop(receiver);

        let err = publisher.publish(password_changed()).await.unwrap_err();
        assert_eq!(err.code(), "EventPublishFailed");
    }

    #[tokio::test]
    async fn test_logging_publisher_accepts_everything() {
        LoggingEventPublisher.publish(password_changed()).await.unwrap();
    }
}
