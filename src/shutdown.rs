// ABOUTME: Turns Ctrl+C into a graceful shutdown request, and a second Ctrl+C into an exit
// ABOUTME: The signal source is injected so the two-stage behavior is testable without signals

use std::future::Future;
use std::io;
use tokio::sync::broadcast;

/// Forward the first interrupt to `shutdown` and wait for a second one.
///
/// The first interrupt asks every subscriber to stop at its next safe point
/// (the chunk boundary for a sync, the next tick for the monitor). Returns
/// `Ok(())` once a second interrupt arrives; the caller decides how to exit.
/// An error from `next_interrupt` is returned as-is. If it happens before
/// the first interrupt, nothing is sent.
///
/// # Examples
///
/// ```no_run
/// # async fn example() {
/// let (tx, _) = tokio::sync::broadcast::channel::<()>(1);
/// if quality_sync::shutdown::forward_interrupts(tokio::signal::ctrl_c, tx).await.is_ok() {
///     std::process::exit(130);
/// }
/// # }
/// ```
pub async fn forward_interrupts<F, Fut>(
    mut next_interrupt: F,
    shutdown: broadcast::Sender<()>,
) -> io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    next_interrupt().await?;
    tracing::info!(
        "Received shutdown signal; stopping at the next chunk boundary (press Ctrl+C again to exit now)"
    );
    let _ = shutdown.send(());

    next_interrupt().await?;
    tracing::warn!("Received second shutdown signal; exiting without waiting for the current chunk");
    Ok(())
}
