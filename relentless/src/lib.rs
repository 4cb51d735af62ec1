//! `relentless` provides a duplex message channel which, from its user's point of view, never
//! closes. Underneath, it is carried over a succession of short-lived [`Connection`]s: whenever one
//! fails, the channel releases it, waits according to a [`Backoff`] policy, and asks its connection
//! builder for another, all without losing or reordering queued messages.
//!
//! # Building connections
//!
//! A [`RelentlessChannel`] is constructed from a *connection builder*: an async function which
//! makes one attempt at producing a [`Connection`]. A [`Connection`] is an outbound sink, an
//! inbound source, a one-shot error source, and a release action. The easiest way to make one is
//! [`Connection::channel`], which also returns the far-side [`Transport`] for whatever task
//! actually moves messages over the wire.
//!
//! A builder reports a transient failure by handing back a connection which has already failed
//! ([`Connection::failed`]), and signals that no connection will ever be available again by
//! returning `None`, which shuts the channel down.
//!
//! ```
//! use relentless::{Connection, ConnectionError, RelentlessChannel, State};
//!
//! # #[tokio::main]
//! # async fn main() {
//! // An in-memory "server" which echoes every message back, doubled
//! let channel = RelentlessChannel::new(|| async {
//!     let (connection, mut transport) = Connection::channel(8);
//!     tokio::spawn(async move {
//!         while let Some(n) = transport.outgoing.recv().await {
//!             if transport.incoming.send(n * 2).await.is_err() {
//!                 break;
//!             }
//!         }
//!         transport.failure.fail(ConnectionError::Closed);
//!     });
//!     Some(connection)
//! });
//!
//! channel.send(21).await.unwrap();
//! assert_eq!(channel.recv().await, Some(42));
//! assert_eq!(channel.state(), State::Connected);
//!
//! channel.shutdown();
//! channel.closed().await;
//! assert!(channel.send(1).await.is_err());
//! # }
//! ```
//!
//! # Handshakes
//!
//! Many protocols require a fixed startup message before anything else. Wrapping a builder with
//! [`with_handshake`] (or calling [`ChannelBuilder::handshake`]) sends such a message on every new
//! connection, discarding and rebuilding connections which fail before it is accepted.
//!
//! # Cancellation
//!
//! The [`context`] module adapts a one-shot "done" signal into a cloneable, cancellable [`Context`]
//! which connection builders can consult to learn when to give up for good.

#![warn(missing_docs)]
#![warn(missing_copy_implementations, missing_debug_implementations)]
#![warn(unused_qualifications, unused_results)]
#![warn(future_incompatible)]
#![warn(unused)]
#![forbid(rustdoc::broken_intra_doc_links)]

mod backoff;
mod channel;
mod config;
mod connection;
pub mod context;
pub mod handshake;
mod maybe_bounded;
mod util;

pub use backoff::Backoff;
pub use channel::{ChannelBuilder, RelentlessChannel, SendError, State, TrySendError};
pub use config::{Config, DEFAULT_ERRORS_CAPACITY, DEFAULT_QUEUE_CAPACITY};
pub use connection::{
    Attempt, BoxError, Build, Connection, ConnectionError, Failure, Outgoing, Transport,
};
pub use context::{CancelFunc, Context, ContextError};
pub use handshake::with_handshake;
