// This service is meant to be paired with the `daemon` example. It sends a numbered ping to the
// daemon at regularly spaced intervals and prints each echo. The daemon can be stopped and
// restarted at any time; the channel reconnects, re-sends the startup message, and delivers the
// pings queued in the meantime, with no intervention from the code written in terms of the channel.
//
// Press Ctrl-C to shut the channel down cleanly.

use anyhow::Error;
use relentless::{context, Backoff};
use relentless_socket::{open_channel, Address, FormatKind, Message, SocketConfig};
use std::{path::PathBuf, sync::Arc, time::Duration};
use structopt::StructOpt;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A service which pings the daemon forever.
#[derive(Debug, StructOpt)]
struct Options {
    /// The Unix socket the daemon listens on
    #[structopt(short, long, default_value = "/tmp/relentless.sock")]
    socket: PathBuf,
    /// The serialization format: "bincode" or "json"
    #[structopt(short, long, default_value = "bincode", parse(try_from_str = parse_format))]
    format: FormatKind,
    /// Milliseconds between pings
    #[structopt(short, long, default_value = "500")]
    interval: u64,
}

fn parse_format(s: &str) -> Result<FormatKind, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let options = Options::from_args();

    let (closer, done) = context::done_signal();
    let (ctx, _cancel) = context::from_done_signal(done.closed_owned());

    let mut config = SocketConfig::new(&options.socket, env!("CARGO_PKG_VERSION"));
    config.format = options.format;
    config.channel.backoff = Backoff::default().jitter(Duration::from_millis(100));
    let channel = Arc::new(open_channel(config, ctx)?);

    // Report connection errors as they happen
    tokio::spawn({
        let channel = channel.clone();
        async move {
            while let Some(error) = channel.next_error().await {
                warn!(%error, "connection to daemon lost");
            }
        }
    });

    // Print every echo
    tokio::spawn({
        let channel = channel.clone();
        async move {
            while let Some(message) = channel.recv().await {
                info!(n = ?message.data, "pong");
            }
        }
    });

    let mut interval = tokio::time::interval(Duration::from_millis(options.interval));
    let mut n: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                let start = Instant::now();
                let ping = Message {
                    message_type: "Ping".to_string(),
                    destination: Address { service_name: "daemon".to_string() },
                    data: n.to_be_bytes().to_vec(),
                };
                if channel.send(ping).await.is_err() {
                    break;
                }
                info!(n, state = ?channel.state(), queued_in = ?start.elapsed(), "ping");
                n += 1;
            }
        }
    }

    closer.close();
    channel.closed().await;
    info!("shut down");
    Ok(())
}
