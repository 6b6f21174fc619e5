//! Push-style entry streams.
//!
//! An [`EntrySink`] writes items and at most one error, then closes. The
//! paired [`EntryStream`] ends once the sink is closed or dropped.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;
use uvfs_traits::{BridgeError, Result};

/// Create a connected sink/stream pair.
pub fn entry_channel<T>() -> (EntrySink<T>, EntryStream<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        EntrySink {
            sender: Some(sender),
        },
        EntryStream { receiver },
    )
}

/// Producer half.
#[derive(Debug)]
pub struct EntrySink<T> {
    sender: Option<mpsc::UnboundedSender<Result<T>>>,
}

impl<T> EntrySink<T> {
    /// Push one item. Returns `false` if the sink is closed or nobody listens.
    pub fn write(&self, item: T) -> bool {
        match &self.sender {
            Some(sender) => sender.send(Ok(item)).is_ok(),
            None => {
                trace!("Write to closed entry sink ignored");
                false
            }
        }
    }

    /// Emit an error event and close.
    pub fn error(&mut self, err: BridgeError) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(err));
        }
    }

    pub fn close(&mut self) {
        self.sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.as_ref().map_or(true, |sender| sender.is_closed())
    }
}

/// Consumer half; yields `Ok` items in arrival order and at most one `Err`.
#[derive(Debug)]
pub struct EntryStream<T> {
    receiver: mpsc::UnboundedReceiver<Result<T>>,
}

impl<T> EntryStream<T> {
    /// Receive the next event, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.receiver.recv().await
    }

    /// Drain the stream, failing on the first error event.
    pub async fn collect_entries(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            items.push(event?);
        }
        Ok(items)
    }
}

impl<T> Stream for EntryStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
