use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::State;
use crate::{
    backoff::Backoff,
    connection::{Build, Connection, ConnectionError},
    maybe_bounded,
    util::sleep_until_or_cancelled,
};

/// The background task behind a [`RelentlessChannel`](super::RelentlessChannel). It is the only
/// owner of the live connection, the only writer of the channel's [`State`], and the only holder of
/// the current backoff delay.
pub(super) struct Supervisor<M> {
    /// The connection builder, possibly wrapped in a handshake.
    build: Arc<Build<M>>,
    backoff: Backoff,
    /// The caller-facing queues, which outlive every connection.
    outbound: maybe_bounded::Receiver<M>,
    inbound: maybe_bounded::Sender<M>,
    errors: mpsc::Sender<ConnectionError>,
    state: watch::Sender<State>,
    shutdown: CancellationToken,
    /// Outbound messages reclaimed from failed connections, to be sent before anything queued.
    replay: VecDeque<M>,
    /// An outbound message taken from `replay` or the queue but not yet accepted by any
    /// connection. It is carried over from a failed connection to the next one.
    held_outbound: Option<M>,
    /// An inbound message taken from a connection but not yet queued for callers.
    held_inbound: Option<M>,
}

/// Why the relay over a single connection stopped.
enum Ended {
    Failed(ConnectionError),
    Shutdown,
}

impl<M: Send + 'static> Supervisor<M> {
    pub(super) fn new(
        build: Arc<Build<M>>,
        backoff: Backoff,
        outbound: maybe_bounded::Receiver<M>,
        inbound: maybe_bounded::Sender<M>,
        errors: mpsc::Sender<ConnectionError>,
        state: watch::Sender<State>,
        shutdown: CancellationToken,
    ) -> Self {
        Supervisor {
            build,
            backoff,
            outbound,
            inbound,
            errors,
            state,
            shutdown,
            replay: VecDeque::new(),
            held_outbound: None,
            held_inbound: None,
        }
    }

    /// Acquire, relay, fail, back off, and acquire again, until the builder gives up or the channel
    /// is shut down.
    ///
    /// A connection whose error source has already fired when the builder hands it over never
    /// counts as established: the channel stays out of [`State::Connected`] and the backoff delay
    /// keeps growing. Any other connection resets the delay.
    pub(super) async fn run(mut self) {
        let mut delay = self.backoff.initial();

        loop {
            self.set_state(State::Acquiring);
            let built = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                built = (self.build)() => built,
            };
            let mut connection = match built {
                Some(connection) => connection,
                None => break,
            };

            let dead_on_arrival = tokio::select! {
                biased;
                error = connection.errors.failed() => Some(error),
                _ = std::future::ready(()) => None,
            };
            let ended = match dead_on_arrival {
                Some(error) => Ended::Failed(error),
                None => {
                    self.set_state(State::Connected);
                    delay = self.backoff.initial();
                    self.relay(&mut connection).await
                }
            };
            if let Ended::Failed(_) = ended {
                self.reclaim(&mut connection);
            }
            connection.release();
            drop(connection);

            match ended {
                Ended::Shutdown => break,
                Ended::Failed(error) => {
                    self.set_state(State::Failed);
                    warn!(%error, retry_in = ?delay, "connection failed");
                    self.report(error);
                    let wakeup = Instant::now() + self.backoff.jittered(delay);
                    delay = self.backoff.next(delay);
                    if !sleep_until_or_cancelled(wakeup, &self.shutdown).await {
                        break;
                    }
                }
            }
        }

        // Make callers fail fast from now on, while letting them drain what was received
        self.outbound.close();
        if let Some(message) = self.held_inbound.take() {
            let _ = self.inbound.try_send(message);
        }
        self.shutdown.cancel();
        self.set_state(State::Shutdown);
        info!("relentless channel shut down");
    }

    /// Shuttle messages between the caller-facing queues and `connection` until it fails or the
    /// channel shuts down.
    async fn relay(&mut self, connection: &mut Connection<M>) -> Ended {
        let Connection {
            outbound: connection_tx,
            inbound: connection_rx,
            errors: connection_errors,
            ..
        } = connection;

        loop {
            if self.held_outbound.is_none() {
                self.held_outbound = self.replay.pop_front();
            }
            tokio::select! {
                // Errors first: if a connection has failed, nothing else it reports is trusted
                biased;
                error = connection_errors.failed() => return Ended::Failed(error),
                _ = self.shutdown.cancelled() => return Ended::Shutdown,
                permit = connection_tx.reserve(), if self.held_outbound.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(message) = self.held_outbound.take() {
                            permit.send(message);
                        }
                    }
                    Err(_) => return Ended::Failed(ConnectionError::Closed),
                },
                message = self.outbound.recv(), if self.held_outbound.is_none() => match message {
                    Some(message) => self.held_outbound = Some(message),
                    // Every sending handle is gone, so nobody is left to use the channel
                    None => return Ended::Shutdown,
                },
                permit = self.inbound.reserve(), if self.held_inbound.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(message) = self.held_inbound.take() {
                            permit.send(message);
                        }
                    }
                    Err(_) => return Ended::Shutdown,
                },
                message = connection_rx.recv(), if self.held_inbound.is_none() => match message {
                    Some(message) => self.held_inbound = Some(message),
                    None => return Ended::Failed(ConnectionError::Closed),
                },
            }
        }
    }

    /// Put everything the failed `connection` never sent back in front of the outbound queue, in
    /// the order it was submitted.
    fn reclaim(&mut self, connection: &mut Connection<M>) {
        let mut unsent = connection.reclaim();
        unsent.extend(self.held_outbound.take());
        unsent.append(&mut self.replay);
        if !unsent.is_empty() {
            debug!(count = unsent.len(), "replaying unsent messages");
        }
        self.replay = unsent;
    }

    fn set_state(&self, state: State) {
        debug!(?state, "relentless channel state");
        let _ = self.state.send_replace(state);
    }

    /// Offer an error to observers, dropping it if nobody has been keeping up.
    fn report(&self, error: ConnectionError) {
        if let Err(mpsc::error::TrySendError::Full(error)) = self.errors.try_send(error) {
            debug!(%error, "dropping unobserved connection error");
        }
    }
}
