//! Cancellation plumbing: turning a one-shot "closed" signal into a [`Context`] that any number of
//! components can hold, poll, and wait on, without depending on the signal's own type.
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use relentless::context::{self, ContextError};
//!
//! let (closer, done) = context::done_signal();
//! let (ctx, cancel) = context::from_done_signal(done.closed_owned());
//! assert_eq!(ctx.err(), None);
//!
//! closer.close();
//! ctx.done().await;
//! assert_eq!(ctx.err(), Some(ContextError::Canceled));
//!
//! // Cancelling afterwards is harmless
//! cancel.cancel();
//! # }
//! ```

use std::{
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::util::sleep_until_or_cancelled;

/// The firing end of a broadcast-once [`Done`] signal. Closing it, or dropping it, fires the signal
/// for every clone of the corresponding [`Done`].
#[derive(Debug)]
pub struct Closer {
    _tx: watch::Sender<()>,
}

impl Closer {
    /// Fire the signal.
    pub fn close(self) {}
}

/// The observing end of a broadcast-once signal created by [`done_signal`].
#[derive(Debug, Clone)]
pub struct Done {
    rx: watch::Receiver<()>,
}

/// Create a broadcast-once signal: a [`Closer`] which fires it, and a [`Done`] which can be cloned
/// and waited on any number of times.
pub fn done_signal() -> (Closer, Done) {
    let (tx, rx) = watch::channel(());
    (Closer { _tx: tx }, Done { rx })
}

impl Done {
    /// Check whether the signal has fired.
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Wait for the signal to fire.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        // Nothing is ever sent, so this only ends when the `Closer` is gone
        while rx.changed().await.is_ok() {}
    }

    /// Wait for the signal to fire, as a future which owns this [`Done`].
    pub fn closed_owned(self) -> impl Future<Output = ()> + Send + 'static {
        async move { self.closed().await }
    }
}

/// The reason a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled or had its signal fire.
    #[error("context canceled")]
    Canceled,
    /// The deadline of the context, or one of its ancestors, passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    cause: OnceLock<ContextError>,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// A cancellable context: cheap to clone, safe to share, and done at most once.
///
/// A [`Context`] becomes done when it is cancelled through its [`CancelFunc`], when the signal or
/// deadline it was derived with fires, or when its parent becomes done. Children never affect their
/// parents.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

/// The handle which cancels a [`Context`]. Cancelling is idempotent and can be done from any task,
/// including after the context is already done for some other reason.
#[derive(Debug, Clone)]
pub struct CancelFunc {
    ctx: Context,
}

impl CancelFunc {
    /// Cancel the context, if it is not already done.
    pub fn cancel(&self) {
        self.ctx.finish(ContextError::Canceled);
    }
}

/// Derive a [`Context`] which becomes done with [`ContextError::Canceled`] as soon as `signal`
/// completes, or as soon as the returned [`CancelFunc`] is invoked, whichever is first.
///
/// A single watcher task waits on `signal`; it exits, dropping `signal`, as soon as the context is
/// done for either reason.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
pub fn from_done_signal<S>(signal: S) -> (Context, CancelFunc)
where
    S: Future<Output = ()> + Send + 'static,
{
    Context::background().with_signal(signal)
}

impl Context {
    /// A root context, which is never done.
    pub fn background() -> Context {
        Context::new(CancellationToken::new(), None, None)
    }

    fn new(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<Context>,
    ) -> Context {
        Context {
            inner: Arc::new(Inner {
                token,
                cause: OnceLock::new(),
                deadline,
                parent,
            }),
        }
    }

    fn child(&self, deadline: Option<Instant>) -> (Context, CancelFunc) {
        let deadline = match (self.deadline(), deadline) {
            (Some(ours), Some(theirs)) => Some(ours.min(theirs)),
            (ours, theirs) => ours.or(theirs),
        };
        let ctx = Context::new(self.inner.token.child_token(), deadline, Some(self.clone()));
        let cancel = CancelFunc { ctx: ctx.clone() };
        (ctx, cancel)
    }

    /// Record `cause` (unless the context is already done) and mark the context done.
    fn finish(&self, cause: ContextError) {
        if !self.inner.token.is_cancelled() {
            let _ = self.inner.cause.set(cause);
        }
        self.inner.token.cancel();
    }

    /// Derive a child context which can be cancelled independently of this one.
    pub fn with_cancel(&self) -> (Context, CancelFunc) {
        self.child(None)
    }

    /// Derive a child context which is also done when `signal` completes. See
    /// [`from_done_signal`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_signal<S>(&self, signal: S) -> (Context, CancelFunc)
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let (ctx, cancel) = self.child(None);
        let watched = ctx.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = watched.inner.token.cancelled() => {}
                _ = signal => watched.finish(ContextError::Canceled),
            }
        }));
        (ctx, cancel)
    }

    /// Derive a child context which is also done, with [`ContextError::DeadlineExceeded`], once
    /// `timeout` has elapsed.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelFunc) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context which is also done, with [`ContextError::DeadlineExceeded`], at
    /// `deadline`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelFunc) {
        let (ctx, cancel) = self.child(Some(deadline));
        let watched = ctx.clone();
        drop(tokio::spawn(async move {
            if sleep_until_or_cancelled(deadline, &watched.inner.token).await {
                watched.finish(ContextError::DeadlineExceeded);
            }
        }));
        (ctx, cancel)
    }

    /// `None` while the context is live; afterwards, the reason it is done.
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.token.is_cancelled() {
            Some(self.cause())
        } else {
            None
        }
    }

    fn cause(&self) -> ContextError {
        match (self.inner.cause.get(), &self.inner.parent) {
            (Some(cause), _) => *cause,
            (None, Some(parent)) => parent.cause(),
            (None, None) => ContextError::Canceled,
        }
    }

    /// Check whether the context is done.
    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Wait until the context is done. Once this returns, [`err`](Context::err) is `Some`.
    pub async fn done(&self) {
        self.inner.token.cancelled().await
    }

    /// The earliest deadline of this context and its ancestors, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A signal which never fires, but holds `witness` until it is dropped.
    fn never(witness: Arc<()>) -> impl Future<Output = ()> + Send + 'static {
        async move {
            let _witness = witness;
            std::future::pending::<()>().await
        }
    }

    async fn watcher_exits(witness: &Arc<()>) -> bool {
        for _ in 0..100 {
            if Arc::strong_count(witness) == 1 {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    #[tokio::test]
    async fn signal_cancels() {
        let (closer, done) = done_signal();
        let (ctx, _cancel) = from_done_signal(done.closed_owned());
        assert_eq!(ctx.err(), None);
        assert!(!ctx.is_done());

        closer.close();
        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("timeout waiting for context cancelation");
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn dropping_closer_cancels() {
        let (closer, done) = done_signal();
        let (ctx, _cancel) = from_done_signal(done.clone().closed_owned());
        assert!(!done.is_closed());
        drop(closer);
        ctx.done().await;
        assert!(done.is_closed());
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn cancel_before_signal() {
        let (_closer, done) = done_signal();
        let (ctx, cancel) = from_done_signal(done.closed_owned());
        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        cancel.cancel();
        cancel.clone().cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn cancel_after_signal() {
        let (closer, done) = done_signal();
        let (ctx, cancel) = from_done_signal(done.closed_owned());
        closer.close();
        ctx.done().await;
        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn watcher_exits_on_cancel() {
        let witness = Arc::new(());
        let (_ctx, cancel) = from_done_signal(never(witness.clone()));
        assert_eq!(Arc::strong_count(&witness), 2);
        cancel.cancel();
        assert!(watcher_exits(&witness).await);
    }

    #[tokio::test]
    async fn repeated_create_cancel_leaks_nothing() {
        let witness = Arc::new(());
        for _ in 0..50 {
            let (_ctx, cancel) = from_done_signal(never(witness.clone()));
            cancel.cancel();
        }
        assert!(watcher_exits(&witness).await);
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children_only_downwards() {
        let (parent, cancel_parent) = Context::background().with_cancel();
        let (child, cancel_child) = parent.with_cancel();

        cancel_child.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(parent.err(), None);

        let (other_child, _) = parent.with_cancel();
        cancel_parent.cancel();
        other_child.done().await;
        assert_eq!(other_child.err(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded() {
        let (ctx, _cancel) = Context::background().with_timeout(Duration::from_secs(5));
        let deadline = ctx.deadline().expect("deadline is set");
        let (child, _) = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), Some(deadline));

        ctx.done().await;
        assert_eq!(Instant::now(), deadline);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        child.done().await;
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_beats_deadline() {
        let (ctx, cancel) = Context::background().with_timeout(Duration::from_secs(5));
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.deadline(), None);
    }
}
