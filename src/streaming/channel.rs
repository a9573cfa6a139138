//! Channel types for the section codec.
//!
//! Encoder -> frames -> Decoder -> sections -> elements
//! Every hop is an unbuffered handoff: a send completes only once the
//! receiving side has taken the item, so the producer can never run ahead
//! of the consumer by more than one item.

use crate::error::{CodecError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Handoff queue
// =============================================================================

type Envelope<T> = (T, oneshot::Sender<()>);

/// Sending half of a rendezvous queue.
#[derive(Debug)]
pub struct HandoffSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

/// Receiving half of a rendezvous queue.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

/// Create an unbuffered, strictly-ordered handoff queue.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Hand `item` over, waiting until the receiver has taken it.
    pub async fn send(&self, item: T) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((item, ack_tx))
            .await
            .map_err(|_| CodecError::Closed)?;
        // Dropped unacknowledged: the receiver went away with the item queued
        ack_rx.await.map_err(|_| CodecError::Closed)
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> HandoffReceiver<T> {
    /// Take the next item. `None` once the sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        let (item, ack) = self.rx.recv().await?;
        let _ = ack.send(());
        Some(item)
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx).map(|envelope| {
            envelope.map(|(item, ack)| {
                let _ = ack.send(());
                item
            })
        })
    }
}

// =============================================================================
// Frame source / sink
// =============================================================================

/// Ordered, backpressured destination for encoded frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()>;
}

/// Ordered source of frames. `None` means the source is closed.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Bytes>;
}

/// Frame sink for the encoder side of a frame channel
pub type FrameSender = HandoffSender<Bytes>;

/// Frame source for the decoder side of a frame channel
pub type FrameReceiver = HandoffReceiver<Bytes>;

/// Create an unbuffered frame channel connecting an encoder to a decoder
pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    handoff()
}

#[async_trait]
impl FrameSink for HandoffSender<Bytes> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.send(frame).await
    }
}

#[async_trait]
impl FrameSource for HandoffReceiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

#[async_trait]
impl FrameSink for mpsc::Sender<Bytes> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.send(frame).await.map_err(|_| CodecError::Closed)
    }
}

#[async_trait]
impl FrameSource for mpsc::Receiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

#[async_trait]
impl FrameSink for mpsc::UnboundedSender<Bytes> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.send(frame).map_err(|_| CodecError::Closed)
    }
}

#[async_trait]
impl FrameSource for mpsc::UnboundedReceiver<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

/// Pre-recorded frames, mostly useful for replaying captured streams.
#[async_trait]
impl FrameSource for std::vec::IntoIter<Bytes> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        self.next()
    }
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn next_frame(&mut self) -> Option<Bytes> {
        (**self).next_frame().await
    }
}

#[async_trait]
impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        (**self).send_frame(frame).await
    }
}

// =============================================================================
// Tests
// =============================================================================
