use meditation_types::OutboundMessage;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::events::{GenerationId, SessionId, TranscriptEvent};

/// Forwards transcript text to the client's outbound channel.
///
/// Events are sent in the order `publish` is awaited, and the channel keeps
/// that order, so a generation's text reaches the client in production order.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    session_id: SessionId,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl EventPublisher {
    pub fn new(session_id: SessionId, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            session_id,
            outbound,
        }
    }

    pub fn event(&self, generation: GenerationId, sequence: u64, text: &str) -> TranscriptEvent {
        TranscriptEvent {
            session_id: self.session_id.clone(),
            generation,
            sequence,
            text: text.to_string(),
        }
    }

    pub async fn publish(&self, event: TranscriptEvent) -> Result<(), ProviderError> {
        tracing::debug!(
            session = %event.session_id,
            generation = %event.generation,
            sequence = event.sequence,
            "Publishing transcript"
        );
        self.outbound
            .send(OutboundMessage::transcript(event.text))
            .await
            .map_err(|_| ProviderError::Network("outbound channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let publisher = EventPublisher::new(SessionId::new(), tx);

        for (i, text) in ["Breathe ", "in ", "slowly."].iter().enumerate() {
            let event = publisher.event(GenerationId(1), i as u64, text);
            publisher.publish(event).await.unwrap();
        }

        let mut received = Vec::new();
        while let Ok(OutboundMessage::Transcript { text }) = rx.try_recv() {
            received.push(text);
        }
        assert_eq!(received, vec!["Breathe ", "in ", "slowly."]);
    }

    #[tokio::test]
    async fn closed_channel_is_a_network_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let publisher = EventPublisher::new(SessionId::new(), tx);

        let event = publisher.event(GenerationId(1), 0, "hello");
        assert!(matches!(
            publisher.publish(event).await,
            Err(ProviderError::Network(_))
        ));
    }
}
