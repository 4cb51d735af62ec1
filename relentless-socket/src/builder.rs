use futures::{SinkExt, StreamExt};
use relentless::{Connection, ConnectionError, Context, Failure, Outgoing, Transport};
use std::path::PathBuf;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixStream,
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::{codec::MessageCodec, config::SocketConfig, format::FormatKind, message::Message};

/// A connection builder which makes one attempt to connect to a Unix socket each time it is
/// invoked.
///
/// A failed connect is reported as a connection which has already failed, so that the channel
/// backs off before trying again. Once the [`Context`] is done, every invocation yields `None`.
#[derive(Debug, Clone)]
pub struct SocketBuilder {
    path: PathBuf,
    format: FormatKind,
    max_frame_length: usize,
    capacity: usize,
    ctx: Context,
}

impl SocketBuilder {
    /// A builder for the socket described by `config`, which gives up once `ctx` is done.
    pub fn new(config: &SocketConfig, ctx: Context) -> Self {
        SocketBuilder {
            path: config.socket_path.clone(),
            format: config.format,
            max_frame_length: config.max_frame_length,
            capacity: config.connection_capacity,
            ctx,
        }
    }

    /// Make a single connection attempt.
    pub async fn build(&self) -> Option<Connection<Message>> {
        if self.ctx.is_done() {
            return None;
        }
        let connected = tokio::select! {
            biased;
            _ = self.ctx.done() => return None,
            connected = UnixStream::connect(&self.path) => connected,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(error) => {
                debug!(path = %self.path.display(), %error, "unable to connect");
                return Some(Connection::failed(error.into()));
            }
        };
        debug!(path = %self.path.display(), "connected");

        let (reader, writer) = stream.into_split();
        let codec = MessageCodec::new(self.format, self.max_frame_length);
        let (connection, transport) = Connection::channel(self.capacity);
        let Transport {
            outgoing,
            incoming,
            failure,
        } = transport;

        let reading = tokio::spawn(read_pump(
            FramedRead::new(reader, codec.clone()),
            incoming,
            failure.clone(),
        ));
        let writing = tokio::spawn(write_pump(
            FramedWrite::new(writer, codec),
            outgoing,
            failure,
        ));

        // Aborting the pumps drops both halves of the stream, which closes the socket
        Some(connection.on_release(move || {
            reading.abort();
            writing.abort();
        }))
    }
}

async fn read_pump<R>(
    mut frames: FramedRead<R, MessageCodec<FormatKind>>,
    incoming: mpsc::Sender<Message>,
    failure: Failure,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        match frames.next().await {
            Some(Ok(message)) => {
                trace!(message_type = %message.message_type, "read message");
                if incoming.send(message).await.is_err() {
                    return;
                }
            }
            Some(Err(error)) => break ConnectionError::from(error),
            None => break ConnectionError::Closed,
        }
    };
    let _ = failure.fail(error);
}

async fn write_pump<W>(
    mut frames: FramedWrite<W, MessageCodec<FormatKind>>,
    mut outgoing: Outgoing<Message>,
    failure: Failure,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        trace!(message_type = %message.message_type, "writing message");
        if let Err(error) = frames.send(message).await {
            let _ = failure.fail(error);
            return;
        }
    }
}
