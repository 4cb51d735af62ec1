//! The [`RelentlessChannel`]: a duplex message channel which, from the caller's point of view,
//! never closes.
//!
//! A single background task, the *supervisor*, owns the current underlying [`Connection`]. It
//! repeatedly invokes a connection builder, relays messages between the live connection and the
//! channel's long-lived queues, watches the connection's error source, and on failure releases the
//! connection, sleeps according to a [`Backoff`], and builds another. Callers only ever touch the
//! queues.
//!
//! # States
//!
//! ```text
//! Acquiring ──▶ Connected ──▶ Failed ──(backoff)──▶ Acquiring ...
//!     │
//!     └──(builder yields None, or explicit shutdown)──▶ Shutdown
//! ```
//!
//! # Ordering and loss
//!
//! Messages are delivered in the order they were submitted, per direction, across any number of
//! reconnections. When a connection fails, the supervisor reclaims every outbound message its
//! transport never took, together with the one it was about to hand over, and offers them to the
//! next connection ahead of anything still queued. A handshake's startup message is never
//! reclaimed.
//!
//! Whenever the supervisor is waiting on a connection, its error source is checked first: when an
//! error and some other progress are ready together, the connection counts as failed. A message
//! which the transport took but did not finish writing before failing is lost with it.
//!
//! # Shutdown
//!
//! Once the channel is [`Shutdown`](State::Shutdown), [`send`](RelentlessChannel::send) fails
//! immediately, handing back the message, while [`recv`](RelentlessChannel::recv) yields whatever
//! had already been received and then `None`.

use std::{
    fmt::{self, Debug},
    future::Future,
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    backoff::Backoff,
    config::Config,
    connection::{Attempt, Build, Connection, ConnectionError},
    context::Context,
    handshake::with_handshake,
    maybe_bounded,
};

mod supervisor;
use supervisor::Supervisor;

/// The lifecycle state of a [`RelentlessChannel`], as last published by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Waiting for the connection builder (and handshake) to produce a connection.
    Acquiring,
    /// Relaying messages over a live connection.
    Connected,
    /// The last connection failed; waiting out the backoff delay.
    Failed,
    /// Permanently inert: the builder signalled that no connection will ever be available, or the
    /// channel was shut down explicitly.
    Shutdown,
}

/// The error returned by [`RelentlessChannel::send`] once the channel is shut down. It hands back
/// the message which could not be sent.
#[derive(Error, PartialEq, Eq)]
#[error("relentless channel is shut down")]
pub struct SendError<M>(pub M);

impl<M> Debug for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SendError").finish()
    }
}

/// The error returned by [`RelentlessChannel::try_send`]. It hands back the message which could
/// not be sent.
#[derive(Error, PartialEq, Eq)]
pub enum TrySendError<M> {
    /// The outbound queue is bounded and currently full.
    #[error("relentless channel outbound queue is full")]
    Full(M),
    /// The channel is shut down.
    #[error("relentless channel is shut down")]
    Shutdown(M),
}

impl<M> Debug for TrySendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.debug_tuple("Full").finish(),
            TrySendError::Shutdown(_) => f.debug_tuple("Shutdown").finish(),
        }
    }
}

impl<M> TrySendError<M> {
    /// Recover the message which could not be sent.
    pub fn into_inner(self) -> M {
        match self {
            TrySendError::Full(message) | TrySendError::Shutdown(message) => message,
        }
    }
}

/// A long-lived duplex channel of messages of type `M`, transparently carried over a succession of
/// underlying [`Connection`]s.
///
/// All methods take `&self`, so a channel can be shared (e.g. in an [`Arc`]) between any number of
/// sending and receiving tasks. Dropping the channel shuts its supervisor down.
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub struct RelentlessChannel<M> {
    outbound: maybe_bounded::Sender<M>,
    inbound: Mutex<maybe_bounded::Receiver<M>>,
    errors: Mutex<mpsc::Receiver<ConnectionError>>,
    state: watch::Receiver<State>,
    shutdown: CancellationToken,
    #[derivative(Debug = "ignore")]
    _shutdown_on_drop: DropGuard,
}

type WrapBuild<M> = Box<dyn FnOnce(Arc<Build<M>>, Backoff) -> Arc<Build<M>> + Send>;

/// A builder for a [`RelentlessChannel`], created by [`RelentlessChannel::builder`].
#[derive(derivative::Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ChannelBuilder<M> {
    #[derivative(Debug = "ignore")]
    build: Arc<Build<M>>,
    #[derivative(Debug = "ignore")]
    handshake: Option<WrapBuild<M>>,
    context: Option<Context>,
    config: Config,
}

impl<M: Send + 'static> RelentlessChannel<M> {
    /// Start a [`RelentlessChannel`] over connections made by `build`, using the default
    /// [`Config`] and no handshake.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<F, Fut>(build: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Connection<M>>> + Send + 'static,
    {
        Self::builder(build).spawn()
    }

    /// Begin configuring a [`RelentlessChannel`] over connections made by `build`.
    ///
    /// Each invocation of `build` must make a single attempt to produce a [`Connection`]. A
    /// transient failure should be reported through the connection's error source (see
    /// [`Connection::failed`]); returning `None` shuts the channel down for good.
    pub fn builder<F, Fut>(build: F) -> ChannelBuilder<M>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Connection<M>>> + Send + 'static,
    {
        ChannelBuilder {
            build: Arc::new(move || -> Attempt<M> { Box::pin(build()) }),
            handshake: None,
            context: None,
            config: Config::default(),
        }
    }
}

impl<M: Send + 'static> ChannelBuilder<M> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the pacing of reconnection after an established connection fails.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the pacing of reconnection after a connection fails during its handshake.
    pub fn handshake_backoff(mut self, backoff: Backoff) -> Self {
        self.config.handshake_backoff = backoff;
        self
    }

    /// Set the capacity of the outbound queue, or `None` for an unbounded queue.
    pub fn outbound_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Set the capacity of the inbound queue, or `None` for an unbounded queue.
    pub fn inbound_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Set how many connection errors are retained for observation.
    pub fn errors_capacity(mut self, capacity: usize) -> Self {
        self.config.errors_capacity = capacity;
        self
    }

    /// Send `startup` as the first message on every new connection, before the connection is put
    /// to any other use. See [`with_handshake`].
    pub fn handshake(mut self, startup: M) -> Self
    where
        M: Clone + Sync,
    {
        self.handshake = Some(Box::new(
            move |build: Arc<Build<M>>, retry: Backoff| -> Arc<Build<M>> {
                Arc::new(with_handshake(move || build(), startup, retry))
            },
        ));
        self
    }

    /// Shut the channel down as soon as `ctx` is done.
    pub fn context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Spawn the supervisor and return the channel.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(self) -> RelentlessChannel<M> {
        let ChannelBuilder {
            build,
            handshake,
            context,
            config,
        } = self;
        let build = match handshake {
            Some(wrap) => wrap(build, config.handshake_backoff),
            None => build,
        };

        let (outbound_tx, outbound_rx) = maybe_bounded::channel(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = maybe_bounded::channel(config.inbound_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(config.errors_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(State::Acquiring);
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor::new(
            build,
            config.backoff,
            outbound_rx,
            inbound_tx,
            errors_tx,
            state_tx,
            shutdown.clone(),
        );
        drop(tokio::spawn(supervisor.run()));

        if let Some(ctx) = context {
            let shutdown = shutdown.clone();
            drop(tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = ctx.done() => shutdown.cancel(),
                }
            }));
        }

        RelentlessChannel {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            errors: Mutex::new(errors_rx),
            state: state_rx,
            _shutdown_on_drop: shutdown.clone().drop_guard(),
            shutdown,
        }
    }
}

impl<M> RelentlessChannel<M> {
    /// Queue a message for delivery over the current or a future connection.
    ///
    /// This returns as soon as the message is queued, whatever the state of the underlying
    /// connection. It waits only if the outbound queue is bounded and full. It fails, handing back
    /// the message, only if the channel is shut down.
    pub async fn send(&self, message: M) -> Result<(), SendError<M>> {
        self.outbound
            .send(message)
            .await
            .map_err(|mpsc::error::SendError(message)| SendError(message))
    }

    /// Queue a message without waiting, failing if the outbound queue is full.
    pub fn try_send(&self, message: M) -> Result<(), TrySendError<M>> {
        self.outbound.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(message) => TrySendError::Full(message),
            mpsc::error::TrySendError::Closed(message) => TrySendError::Shutdown(message),
        })
    }

    /// Receive the next inbound message, waiting until one arrives.
    ///
    /// Returns `None` only once the channel is shut down and every message received before then has
    /// been taken.
    pub async fn recv(&self) -> Option<M> {
        self.inbound.lock().await.recv().await
    }

    /// Wait for the next connection error observed by the supervisor.
    ///
    /// This is an observability stream, not a correctness one: errors which nobody waits for are
    /// dropped once [`Config::errors_capacity`] of them are pending. Returns `None` once the
    /// channel is shut down and no errors remain.
    pub async fn next_error(&self) -> Option<ConnectionError> {
        self.errors.lock().await.recv().await
    }

    /// Take the next pending connection error, if there is one.
    pub fn try_next_error(&self) -> Option<ConnectionError> {
        self.errors.try_lock().ok()?.try_recv().ok()
    }

    /// The current state of the channel.
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Wait until the channel's state satisfies `predicate`, and return that state.
    ///
    /// Only the most recent state is observed: a state which the supervisor passes through quickly
    /// may be missed entirely.
    pub async fn wait_for_state(&self, mut predicate: impl FnMut(State) -> bool) -> State {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if predicate(current) {
                return current;
            }
            if state.changed().await.is_err() {
                // The supervisor has exited, so this is final
                return *state.borrow();
            }
        }
    }

    /// Shut the channel down: stop relaying, release the current connection, and never build
    /// another. This is idempotent, and does not wait; see [`closed`](RelentlessChannel::closed).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the channel has reached [`State::Shutdown`].
    pub async fn closed(&self) {
        let _ = self.wait_for_state(|state| state == State::Shutdown).await;
    }

    /// Check whether the channel has reached [`State::Shutdown`].
    pub fn is_shutdown(&self) -> bool {
        self.state() == State::Shutdown
    }
}
