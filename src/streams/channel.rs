//! In-process message source.

use crate::streams::{MessageSource, Outcome};
use crate::types::SourceMessage;
use crate::utils::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Reads messages pushed through a tokio channel.
///
/// Outcomes are forwarded, keyed by `source_id`, to an optional ack channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<SourceMessage>,
    acks: Option<mpsc::UnboundedSender<(String, Outcome)>>,
    batch_size: usize,
}

impl ChannelSource {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<SourceMessage>, batch_size: usize) -> Self {
        Self {
            rx,
            acks: None,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn with_acks(mut self, acks: mpsc::UnboundedSender<(String, Outcome)>) -> Self {
        self.acks = Some(acks);
        self
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<SourceMessage>>> {
        let Some(first) = self.rx.recv().await else {
            return Ok(None);
        };
        let mut batch = vec![first];
        while batch.len() < self.batch_size {
            match self.rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        Ok(Some(batch))
    }

    async fn ack(&mut self, message: &SourceMessage, outcome: Outcome) -> Result<()> {
        if let Some(acks) = &self.acks {
            // A dropped receiver only means nobody is listening.
            let _ = acks.send((message.source_id.clone(), outcome));
        }
        Ok(())
    }

    fn source_name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn message(id: &str) -> SourceMessage {
        SourceMessage {
            source_id: id.to_string(),
            topic: "t".into(),
            partition: "p".into(),
            message: Message {
                id: id.to_string(),
                chain_id: "c".into(),
                body: vec![],
                timestamp: 0,
                nanosecond: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_batches_then_exhausts() {
        let (tx, rx) = mpsc::channel(8);
        let mut source = ChannelSource::new(rx, 2);
        for id in ["a", "b", "c"] {
            tx.send(message(id)).await.unwrap();
        }
        drop(tx);

        let first = source.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = source.next_batch().await.unwrap().unwrap();
        assert_eq!(second[0].source_id, "c");
        assert!(source.next_batch().await.unwrap().is_none());
    }
}
