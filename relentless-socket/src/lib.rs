//! This crate connects a service process to a local daemon over a Unix-domain socket, using a
//! [`RelentlessChannel`] so that the service never has to notice when the daemon restarts.
//!
//! Each frame on the socket is a 4-byte big-endian length followed by a [`Message`] serialized in
//! one of the supported [`format`]s ([`Bincode`](format::Bincode) by default, or
//! [`Json`](format::Json)). The first frame on every connection is a startup message carrying the
//! service's [`StartupData`]: its process id and version.
//!
//! ```no_run
//! use relentless::context;
//! use relentless_socket::{open_channel, Address, Message, SocketConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), relentless_socket::Error> {
//! let (closer, done) = context::done_signal();
//! let (ctx, _cancel) = context::from_done_signal(done.closed_owned());
//!
//! let channel = open_channel(SocketConfig::new("/run/daemon.sock", "0.1.0"), ctx)?;
//! let ping = Message {
//!     message_type: "Ping".to_string(),
//!     destination: Address { service_name: "pinger".to_string() },
//!     data: Vec::new(),
//! };
//! channel.send(ping).await.ok();
//! let reply = channel.recv().await;
//!
//! // Shut the channel down
//! closer.close();
//! channel.closed().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_copy_implementations, missing_debug_implementations)]
#![warn(unused_qualifications, unused_results)]
#![warn(future_incompatible)]
#![warn(unused)]
// Documentation configuration
#![forbid(rustdoc::broken_intra_doc_links)]

use relentless::{Context, RelentlessChannel};
use tracing::info;

#[cfg(unix)]
mod builder;
mod codec;
mod config;
mod error;
pub mod format;
mod message;

#[cfg(unix)]
pub use builder::SocketBuilder;
pub use codec::{MessageCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use config::{SocketConfig, DEFAULT_CONNECTION_CAPACITY};
pub use error::{CodecError, Error};
pub use format::{Format, FormatKind};
pub use message::{Address, Message, StartupData, STARTUP_MESSAGE_TYPE, SYSTEM_SERVICE};

#[doc(no_inline)]
pub use tokio_util::codec::{Framed, FramedRead, FramedWrite};

/// Open a [`RelentlessChannel`] to the daemon listening at `config.socket_path`.
///
/// Every connection the channel makes begins with a startup message identifying this process. The
/// channel retries forever, until `ctx` is done or the channel is shut down or dropped.
///
/// This fails only if the configuration is unusable or the startup message cannot be encoded;
/// an absent or restarting daemon is never an error.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
#[cfg(unix)]
pub fn open_channel(
    config: SocketConfig,
    ctx: Context,
) -> Result<RelentlessChannel<Message>, Error> {
    config.validate()?;
    let startup = Message::startup(
        &StartupData::current(config.version.as_str()),
        &config.format,
    )?;
    let builder = SocketBuilder::new(&config, ctx.clone());
    info!(path = %config.socket_path.display(), format = ?config.format, "opening channel");

    Ok(RelentlessChannel::builder(move || {
        let builder = builder.clone();
        async move { builder.build().await }
    })
    .config(config.channel)
    .handshake(startup)
    .context(ctx)
    .spawn())
}
