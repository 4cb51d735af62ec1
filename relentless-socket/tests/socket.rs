#![cfg(unix)]

use futures::{SinkExt, StreamExt};
use relentless::{context, Backoff, State};
use relentless_socket::{
    open_channel, Address, Error, Format, FormatKind, Framed, Message, MessageCodec, SocketConfig,
    StartupData, DEFAULT_MAX_FRAME_LENGTH,
};
use std::{path::Path, time::Duration};
use tempfile::TempDir;
use tokio::{
    net::{UnixListener, UnixStream},
    time::timeout,
};

type Daemon = Framed<UnixStream, MessageCodec<FormatKind>>;

const PATIENCE: Duration = Duration::from_secs(10);

fn config(path: &Path, format: FormatKind) -> SocketConfig {
    let mut config = SocketConfig::new(path, "9.9.9");
    config.format = format;
    config.channel.backoff = Backoff::with_delay(Duration::from_millis(20));
    config.channel.handshake_backoff = Backoff::with_delay(Duration::from_millis(20));
    config
}

fn ping(n: u8) -> Message {
    Message {
        message_type: "Ping".to_string(),
        destination: Address {
            service_name: "pinger".to_string(),
        },
        data: vec![n],
    }
}

/// Accept one service and check its startup message.
async fn accept(listener: &UnixListener, format: FormatKind) -> Daemon {
    let (stream, _) = timeout(PATIENCE, listener.accept())
        .await
        .expect("service never connected")
        .unwrap();
    let mut daemon = Framed::new(stream, MessageCodec::new(format, DEFAULT_MAX_FRAME_LENGTH));
    let startup = daemon.next().await.unwrap().unwrap();
    assert!(startup.is_startup());
    let data: StartupData = format.deserialize(&startup.data).unwrap();
    assert_eq!(data, StartupData::current("9.9.9"));
    daemon
}

async fn expect(daemon: &mut Daemon, message: Message) {
    let received = timeout(PATIENCE, daemon.next())
        .await
        .expect("no message arrived")
        .unwrap()
        .unwrap();
    assert_eq!(received, message);
}

#[tokio::test]
async fn exchanges_messages() {
    for format in [FormatKind::Bincode, FormatKind::Json] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let channel =
            open_channel(config(&path, format), context::Context::background()).unwrap();

        let mut daemon = accept(&listener, format).await;
        channel.send(ping(1)).await.unwrap();
        expect(&mut daemon, ping(1)).await;

        daemon.send(ping(2)).await.unwrap();
        assert_eq!(
            timeout(PATIENCE, channel.recv()).await.unwrap(),
            Some(ping(2))
        );
        assert_eq!(channel.state(), State::Connected);
    }
}

#[tokio::test]
async fn waits_for_a_daemon_to_appear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.sock");
    let channel = open_channel(
        config(&path, FormatKind::Bincode),
        context::Context::background(),
    )
    .unwrap();

    // Queued while nothing is listening
    channel.send(ping(1)).await.unwrap();
    channel.send(ping(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Failed connects are retried inside the handshake, before any connection is handed over
    assert_eq!(channel.state(), State::Acquiring);
    assert!(channel.try_next_error().is_none());

    let listener = UnixListener::bind(&path).unwrap();
    let mut daemon = accept(&listener, FormatKind::Bincode).await;
    expect(&mut daemon, ping(1)).await;
    expect(&mut daemon, ping(2)).await;
}

#[tokio::test]
async fn survives_daemon_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let channel = open_channel(
        config(&path, FormatKind::Bincode),
        context::Context::background(),
    )
    .unwrap();

    let mut daemon = accept(&listener, FormatKind::Bincode).await;
    channel.send(ping(1)).await.unwrap();
    expect(&mut daemon, ping(1)).await;

    // The daemon goes away entirely
    drop(daemon);
    drop(listener);
    std::fs::remove_file(&path).unwrap();
    let state = timeout(
        PATIENCE,
        channel.wait_for_state(|state| state != State::Connected),
    )
    .await
    .unwrap();
    assert_ne!(state, State::Shutdown);

    channel.send(ping(2)).await.unwrap();
    channel.send(ping(3)).await.unwrap();

    // A new daemon gets a fresh startup message, then everything queued in the meantime
    let listener = UnixListener::bind(&path).unwrap();
    let mut daemon = accept(&listener, FormatKind::Bincode).await;
    expect(&mut daemon, ping(2)).await;
    expect(&mut daemon, ping(3)).await;

    daemon.send(ping(4)).await.unwrap();
    assert_eq!(
        timeout(PATIENCE, channel.recv()).await.unwrap(),
        Some(ping(4))
    );
}

#[tokio::test]
async fn closing_the_context_shuts_down() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let (closer, done) = context::done_signal();
    let (ctx, _cancel) = context::from_done_signal(done.closed_owned());
    let channel = open_channel(config(&path, FormatKind::Bincode), ctx).unwrap();
    let mut daemon = accept(&listener, FormatKind::Bincode).await;

    closer.close();
    timeout(PATIENCE, channel.closed()).await.unwrap();
    assert!(channel.send(ping(1)).await.is_err());

    // The service hung up
    assert!(timeout(PATIENCE, daemon.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn rejects_unusable_config() {
    let mut config = SocketConfig::new("/nonexistent/daemon.sock", "1.0");
    config.connection_capacity = 0;
    assert!(matches!(
        open_channel(config, context::Context::background()),
        Err(Error::Config(_))
    ));
}
