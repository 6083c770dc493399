use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use nulpipe_frame::Message;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Something observable that happened on a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport is ready for sends. Always the first event.
    Open,
    /// A complete inbound message.
    Message(Message),
    /// A sink or source fault. The transport stays open; closing is up to
    /// the owner.
    Error(TransportError),
    /// The source reached end of stream and the transport was torn down.
    /// Always the last event.
    Close,
    /// How long one backpressure episode lasted.
    DrainTime(Duration),
}

/// Receiving side of a transport's event channel.
///
/// Yields `None` once the transport is closed and every event emitted
/// before that has been received.
///
/// The channel is unbounded: the driver keeps reading its source whether
/// or not anyone is receiving, so a consumer that stops polling lets
/// `Message` events pile up in memory. Keep receiving, or close the
/// transport once no more messages are wanted.
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Events {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next inbound message, skipping other events.
    ///
    /// Returns the fault if an error event arrives first, and `None` once
    /// the transport has closed.
    pub async fn next_message(&mut self) -> Option<Result<Message, TransportError>> {
        loop {
            match self.rx.recv().await? {
                TransportEvent::Message(message) => return Some(Ok(message)),
                TransportEvent::Error(err) => return Some(Err(err)),
                TransportEvent::Close => return None,
                TransportEvent::Open | TransportEvent::DrainTime(_) => {}
            }
        }
    }
}

impl Stream for Events {
    type Item = TransportEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
