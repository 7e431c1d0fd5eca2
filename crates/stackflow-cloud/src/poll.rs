//! Convergence polling
//!
//! Resources created through a control plane become usable some time after
//! the create call returns. [`poll_with_timeout`] waits for them without
//! ever waiting forever.

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Repeatedly call `probe` until it yields a value or `timeout` elapses.
///
/// The probe is always called at least once. Sleeps are clipped to the
/// deadline so the last attempt happens at the deadline rather than after
/// it, which bounds a failing wait to `[timeout, timeout + interval)`.
/// Probe errors propagate immediately; probes that want to tolerate
/// transient failures map them to `Ok(None)` themselves.
pub async fn poll_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            tracing::debug!(attempts, elapsed = ?started.elapsed(), "Probe converged");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::Timeout(format!(
                "condition not met within {:?} ({} attempts)",
                timeout, attempts
            )));
        }

        let remaining = deadline - now;
        sleep(interval.min(remaining)).await;
    }
}
