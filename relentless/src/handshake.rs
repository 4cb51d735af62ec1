//! The handshake wrapper: a connection builder that primes every fresh [`Connection`] with a
//! startup message before anyone else gets to use it.
//!
//! After the inner builder yields a connection, the wrapper races "the connection's error source
//! fires" against "the outbound sink accepts the startup message". If the error wins, the
//! connection is released and discarded, and the inner builder is invoked again. If both are ready
//! at once, the error wins.
//!
//! Retries after a failed handshake are paced by their own [`Backoff`], separate from the one the
//! [`RelentlessChannel`](crate::RelentlessChannel) applies to steady-state failures. The first
//! attempt in each invocation is never delayed.

use std::{future::Future, sync::Arc};
use tracing::{debug, warn};

use crate::{
    backoff::Backoff,
    connection::{Attempt, Connection, ConnectionError},
};

/// Wrap the connection builder `build` so that every connection it yields has already had
/// `startup` placed on its outbound sink.
///
/// The returned builder yields `None` exactly when `build` does.
pub fn with_handshake<M, F, Fut>(
    build: F,
    startup: M,
    retry: Backoff,
) -> impl Fn() -> Attempt<M> + Send + Sync + 'static
where
    M: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Connection<M>>> + Send + 'static,
{
    let build = Arc::new(build);
    move || -> Attempt<M> {
        let build = build.clone();
        let startup = startup.clone();
        Box::pin(async move { handshake(&*build, startup, retry).await })
    }
}

async fn handshake<M, F, Fut>(build: &F, startup: M, retry: Backoff) -> Option<Connection<M>>
where
    M: Clone,
    F: Fn() -> Fut,
    Fut: Future<Output = Option<Connection<M>>>,
{
    let mut failures: usize = 0;
    let mut delay = retry.initial();

    loop {
        let mut connection = build().await?;

        let outcome = {
            let Connection {
                outbound, errors, ..
            } = &mut connection;
            tokio::select! {
                biased;
                error = errors.failed() => Err(error),
                permit = outbound.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(startup.clone());
                        Ok(())
                    }
                    Err(_) => Err(ConnectionError::Closed),
                },
            }
        };

        match outcome {
            Ok(()) => {
                // Never replayed onto another connection, which gets its own
                connection.preamble += 1;
                debug!(failures, "handshake sent");
                return Some(connection);
            }
            Err(error) => {
                failures += 1;
                warn!(
                    %error,
                    failures,
                    retry_in = ?delay,
                    "handshake failed, discarding connection"
                );
                connection.release();
                drop(connection);
                tokio::time::sleep(retry.jittered(delay)).await;
                delay = retry.next(delay);
            }
        }
    }
}
