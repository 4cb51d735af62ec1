//! This module defines two enums, [`Sender`] and [`Receiver`], which wrap either a bounded or
//! unbounded Tokio sender or receiver, respectively.
//!
//! These types implement the subset of the sender/receiver API necessary for this crate, not the
//! full API, most of which is not used.
use tokio::sync::mpsc::{
    self,
    error::{SendError, TrySendError},
};

/// A Tokio [`mpsc`] sender that could be either bounded or unbounded at runtime.
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub enum Sender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

/// A Tokio [`mpsc`] receiver that could be either bounded or unbounded at runtime.
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

/// A reserved slot in a [`Sender`], which can be filled without waiting.
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub enum Permit<'a, T> {
    Bounded(mpsc::Permit<'a, T>),
    Unbounded(&'a mpsc::UnboundedSender<T>),
}

/// Create a Tokio [`mpsc`] sender/receiver pair that is either bounded or unbounded, depending on
/// whether a buffer size is specified.
pub fn channel<T>(buffer: Option<usize>) -> (Sender<T>, Receiver<T>) {
    if let Some(buffer) = buffer {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Sender::Bounded(tx), Receiver::Bounded(rx))
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (Sender::Unbounded(tx), Receiver::Unbounded(rx))
    }
}

impl<T> Sender<T> {
    /// Send a message over the channel, waiting for capacity if it is bounded and full.
    pub async fn send(&self, message: T) -> Result<(), SendError<T>> {
        match self {
            Sender::Bounded(tx) => tx.send(message).await,
            Sender::Unbounded(tx) => tx.send(message),
        }
    }

    /// Try to send a message over the channel, returning an error if the channel is full or closed.
    pub fn try_send(&self, message: T) -> Result<(), TrySendError<T>> {
        match self {
            Sender::Bounded(tx) => tx.try_send(message),
            Sender::Unbounded(tx) => tx
                .send(message)
                .map_err(|SendError(t)| TrySendError::Closed(t)),
        }
    }

    /// Wait for a free slot in the channel. Unlike [`send`](Sender::send), this is cancel-safe with
    /// respect to the message: if the future is dropped, nothing has been taken from the caller.
    pub async fn reserve(&self) -> Result<Permit<'_, T>, SendError<()>> {
        match self {
            Sender::Bounded(tx) => tx.reserve().await.map(Permit::Bounded),
            Sender::Unbounded(tx) if tx.is_closed() => Err(SendError(())),
            Sender::Unbounded(tx) => Ok(Permit::Unbounded(tx)),
        }
    }
}

impl<T> Permit<'_, T> {
    /// Fill the reserved slot.
    pub fn send(self, message: T) {
        match self {
            Permit::Bounded(permit) => permit.send(message),
            // The receiver may have closed since the reservation; the message is then dropped, just
            // as it would have been had it been queued and never received
            Permit::Unbounded(tx) => drop(tx.send(message)),
        }
    }
}

impl<T> Receiver<T> {
    /// Receive the next value for this receiver, returning `None` if all `Sender` halves have
    /// dropped.
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Close the receiving half, so that no more values can be sent, while still permitting those
    /// already buffered to be received.
    pub fn close(&mut self) {
        match self {
            Receiver::Bounded(rx) => rx.close(),
            Receiver::Unbounded(rx) => rx.close(),
        }
    }
}
