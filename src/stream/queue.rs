//! Outward queue between agent callbacks and the consuming stream
//!
//! Unbounded MPSC: any task may push, only the session's consumption loop
//! receives. Delivery is strictly FIFO.

use tokio::sync::mpsc;
use tracing::debug;

use super::message::OutwardMessage;

/// Item travelling through the outward queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Message(OutwardMessage),
    /// Sentinel pushed once the agent reports completion
    EndOfStream,
}

/// Create a connected sender/receiver pair
pub fn outward_queue() -> (OutwardSender, OutwardReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutwardSender { tx }, OutwardReceiver { rx })
}

/// Producer half, cheap to clone and safe to use from any task
#[derive(Debug, Clone)]
pub struct OutwardSender {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl OutwardSender {
    /// Enqueue a message. Returns `false` if the consumer is gone.
    pub fn push(&self, message: OutwardMessage) -> bool {
        self.send(QueueItem::Message(message))
    }

    /// Enqueue messages in order
    pub fn push_all<I>(&self, messages: I) -> bool
    where
        I: IntoIterator<Item = OutwardMessage>,
    {
        messages.into_iter().all(|message| self.push(message))
    }

    /// Enqueue the end-of-stream sentinel
    pub fn end(&self) -> bool {
        self.send(QueueItem::EndOfStream)
    }

    fn send(&self, item: QueueItem) -> bool {
        match self.tx.send(item) {
            Ok(()) => true,
            Err(_) => {
                debug!("Outward queue consumer dropped, discarding item");
                false
            }
        }
    }
}

/// Consumer half, owned by the consumption loop
#[derive(Debug)]
pub struct OutwardReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
}

impl OutwardReceiver {
    /// Wait for the next item. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Take the next item if one is already queued
    pub fn try_recv(&mut self) -> Option<QueueItem> {
        self.rx.try_recv().ok()
    }
}
