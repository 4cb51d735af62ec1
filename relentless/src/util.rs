use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sleep until a given instant, or until the token is cancelled, returning `true` if the sleep
/// completed, or `false` if it was cut short by cancellation.
///
/// This short-circuits and immediately returns `false` if the token is already cancelled.
pub(crate) async fn sleep_until_or_cancelled(wakeup: Instant, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep_until(wakeup) => true,
    }
}
