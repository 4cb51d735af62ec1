//! A [`Connection`] is one live instance of some underlying duplex transport: an outbound sink, an
//! inbound source, a one-shot error source, and an idempotent release action. Its far side, the
//! [`Transport`], is held by whatever actually moves bytes (a socket pump, a test harness, ...).
//!
//! Once the error source of a [`Connection`] has yielded, the connection is dead: nothing more
//! should be sent or received on it, and it should be released and discarded. Outbound messages
//! its transport never took can still be reclaimed from it, to be offered to the next connection.

use std::{
    collections::VecDeque,
    error::Error as StdError,
    fmt::{self, Debug},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// A boxed error from some underlying transport.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// One boxed attempt at producing a live [`Connection`].
pub type Attempt<M> = Pin<Box<dyn Future<Output = Option<Connection<M>>> + Send>>;

/// A type-erased connection builder: each invocation makes exactly one attempt to produce a live
/// [`Connection`], or returns `None` to signal that no connection will ever be available again.
pub type Build<M> = dyn Fn() -> Attempt<M> + Send + Sync;

/// The terminal error of a single [`Connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The far side of the connection went away without reporting a reason.
    #[error("connection closed")]
    Closed,
    /// An I/O error in the underlying transport.
    #[error("connection i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other error in the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

impl ConnectionError {
    /// Wrap an arbitrary transport error.
    pub fn transport(error: impl Into<BoxError>) -> Self {
        ConnectionError::Transport(error.into())
    }
}

type Release = Box<dyn FnOnce() + Send>;

/// One live instance of an underlying duplex transport carrying messages of type `M`.
///
/// Dropping a [`Connection`] releases it.
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Connection<M> {
    pub(crate) outbound: mpsc::Sender<M>,
    pub(crate) inbound: mpsc::Receiver<M>,
    pub(crate) errors: ErrorSource,
    /// The number of messages placed on `outbound` before the connection was handed to its user.
    pub(crate) preamble: usize,
    #[derivative(Debug = "ignore")]
    unsent: Arc<Mutex<Unsent<M>>>,
    #[derivative(Debug = "ignore")]
    release: Option<Release>,
}

impl<M> Connection<M> {
    /// Create a [`Connection`] together with the [`Transport`] that serves it, each direction
    /// buffering up to `capacity` messages.
    pub fn channel(capacity: usize) -> (Connection<M>, Transport<M>) {
        let (outbound, outgoing) = mpsc::channel(capacity.max(1));
        let (incoming, inbound) = mpsc::channel(capacity.max(1));
        let (error_tx, error_rx) = oneshot::channel();
        let unsent = Arc::new(Mutex::new(Unsent {
            buffer: outgoing,
            taken: 0,
        }));
        let connection = Connection {
            outbound,
            inbound,
            errors: ErrorSource(Some(error_rx)),
            preamble: 0,
            unsent: unsent.clone(),
            release: None,
        };
        let transport = Transport {
            outgoing: Outgoing(unsent),
            incoming,
            failure: Failure(Arc::new(Mutex::new(Some(error_tx)))),
        };
        (connection, transport)
    }

    /// Create a [`Connection`] which is dead on arrival: its error source has already yielded
    /// `error`. This is how a builder reports a transient failure that happened before any real
    /// connection could be made.
    pub fn failed(error: ConnectionError) -> Self {
        let (connection, transport) = Connection::channel(1);
        let _ = transport.failure.fail(error);
        connection
    }

    /// Attach a release action, to be run (at most once) when the connection is released or
    /// dropped. Any previously attached action still runs, after this one.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        let previous = self.release.take();
        self.release = Some(Box::new(move || {
            release();
            if let Some(previous) = previous {
                previous();
            }
        }));
        self
    }

    /// Take back, in order, every outbound message the transport has not yet taken, and close the
    /// transport's outgoing stream. Messages of the preamble are never handed back.
    pub(crate) fn reclaim(&mut self) -> VecDeque<M> {
        let mut unsent = self.unsent.lock().unwrap_or_else(PoisonError::into_inner);
        unsent.buffer.close();
        let mut reclaimed = VecDeque::new();
        while let Ok(message) = unsent.buffer.try_recv() {
            reclaimed.push_back(message);
        }
        let skip = self.preamble.saturating_sub(unsent.taken).min(reclaimed.len());
        drop(reclaimed.drain(..skip));
        reclaimed
    }

    /// Run the release action, if it has not already been run.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<M> Drop for Connection<M> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The error source of a [`Connection`], which yields at most once.
#[derive(Debug)]
pub(crate) struct ErrorSource(Option<oneshot::Receiver<ConnectionError>>);

impl ErrorSource {
    /// Wait for the connection to fail. A dropped reporter counts as [`ConnectionError::Closed`].
    /// After this has returned once, it never returns again.
    pub(crate) async fn failed(&mut self) -> ConnectionError {
        match self.0.as_mut() {
            Some(errors) => {
                let result = errors.await;
                self.0 = None;
                result.unwrap_or(ConnectionError::Closed)
            }
            None => std::future::pending().await,
        }
    }
}

/// The outbound buffer of a [`Connection`], shared between its transport and the connection itself.
struct Unsent<M> {
    buffer: mpsc::Receiver<M>,
    /// How many messages the transport has taken so far.
    taken: usize,
}

/// The stream of messages a [`Transport`] should write to the wire.
///
/// Whatever is still buffered here when the connection fails is handed back to the connection's
/// user, so a transport should take a message only when it is ready to write it.
pub struct Outgoing<M>(Arc<Mutex<Unsent<M>>>);

impl<M> Outgoing<M> {
    /// Take the next message, waiting until there is one. Returns `None` once the [`Connection`]
    /// has been dropped or its unsent messages reclaimed.
    pub async fn recv(&mut self) -> Option<M> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Poll for the next message.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<M>> {
        let mut unsent = self.lock();
        let polled = unsent.buffer.poll_recv(cx);
        if let Poll::Ready(Some(_)) = polled {
            unsent.taken += 1;
        }
        polled
    }

    fn lock(&self) -> MutexGuard<'_, Unsent<M>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Debug for Outgoing<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("taken", &self.lock().taken)
            .finish()
    }
}

/// The far side of a [`Connection`] created by [`Connection::channel`].
#[derive(Debug)]
pub struct Transport<M> {
    /// Messages sent by the user of the [`Connection`], to be written to the wire.
    pub outgoing: Outgoing<M>,
    /// Messages read from the wire, to be delivered to the user of the [`Connection`].
    pub incoming: mpsc::Sender<M>,
    /// The handle through which the transport reports its terminal error.
    pub failure: Failure,
}

/// A cloneable handle for reporting the terminal error of a [`Connection`]. Only the first report
/// is delivered; later ones are ignored.
#[derive(Clone)]
pub struct Failure(Arc<Mutex<Option<oneshot::Sender<ConnectionError>>>>);

impl Failure {
    /// Report `error` as the terminal error of the connection, returning `true` if this was the
    /// first report and the connection was still listening for it.
    pub fn fail(&self, error: impl Into<ConnectionError>) -> bool {
        let reporter = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match reporter {
            Some(reporter) => reporter.send(error.into()).is_ok(),
            None => false,
        }
    }

    /// Check whether a failure has already been reported, or nobody is listening for one.
    pub fn is_failed(&self) -> bool {
        match &*self.0.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(reporter) => reporter.is_closed(),
            None => true,
        }
    }
}

impl Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("failed", &self.is_failed())
            .finish()
    }
}
