// This daemon is meant to be paired with the `service` example. It listens on a Unix socket,
// accepts one service at a time, logs the service's startup message, and echoes every other message
// back to it.
//
// To try it out, run `cargo run --example daemon` and `cargo run --example service` side by side.
// Kill and restart the daemon as often as you like: the service logs its connection errors, but
// keeps pinging, and picks up where it left off as soon as the daemon is back.

use anyhow::Error;
use futures::{SinkExt, StreamExt};
use relentless_socket::{
    Format, FormatKind, Framed, MessageCodec, StartupData, DEFAULT_MAX_FRAME_LENGTH,
};
use std::path::PathBuf;
use structopt::StructOpt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A toy daemon which echoes messages back to one service at a time.
#[derive(Debug, StructOpt)]
struct Options {
    /// The Unix socket to listen on
    #[structopt(short, long, default_value = "/tmp/relentless.sock")]
    socket: PathBuf,
    /// The serialization format: "bincode" or "json"
    #[structopt(short, long, default_value = "bincode", parse(try_from_str = parse_format))]
    format: FormatKind,
}

fn parse_format(s: &str) -> Result<FormatKind, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
}

async fn serve(stream: UnixStream, format: FormatKind) -> Result<(), Error> {
    let mut frames = Framed::new(stream, MessageCodec::new(format, DEFAULT_MAX_FRAME_LENGTH));
    while let Some(message) = frames.next().await {
        let message = message?;
        if message.is_startup() {
            let startup: StartupData = format.deserialize(&message.data)?;
            info!(pid = startup.pid, version = %startup.version, "service started");
        } else {
            info!(message_type = %message.message_type, "echoing");
            frames.send(message).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let options = Options::from_args();

    // Clear out a socket left behind by a previous run
    if options.socket.exists() {
        std::fs::remove_file(&options.socket)?;
    }
    let listener = UnixListener::bind(&options.socket)?;
    info!(socket = %options.socket.display(), "listening");

    loop {
        let (stream, _) = listener.accept().await?;
        info!("service connected");
        match serve(stream, options.format).await {
            Ok(()) => info!("service disconnected"),
            Err(error) => warn!(%error, "service failed"),
        }
    }
}
