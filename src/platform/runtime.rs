//! Runtime helpers shared by the async services in this crate.
//!
//! Long-running operations are executed on a shared multi-threaded worker pool so that callers
//! only await a completion handle, regardless of which executor (if any) they run on.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

const WORKER_THREAD_NAME: &str = "remote-config-worker";
const WORKER_THREADS: usize = 2;

static WORKER_POOL: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name(WORKER_THREAD_NAME)
        .enable_all()
        .build()
        .expect("failed to build worker pool runtime")
});

/// Runs `future` on the shared worker pool and returns a handle resolving to its output.
///
/// The returned [`JoinHandle`] can be awaited from any executor. A task that panics resolves to
/// a `JoinError` instead of leaving the caller waiting.
pub fn submit<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    WORKER_POOL.spawn(future)
}

/// Asynchronously waits for the provided duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}

/// Error returned by [`with_timeout`] when the budget is exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutElapsed {
    pub budget: Duration,
}

/// Polls `future` for at most `budget`, dropping (and thereby cancelling) it on expiry.
///
/// Uses the ambient tokio timer when one is active; otherwise the timed future runs on the
/// worker pool and the caller awaits its completion handle.
pub async fn with_timeout<F>(budget: Duration, future: F) -> Result<F::Output, TimeoutElapsed>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if Handle::try_current().is_ok() {
        return tokio::time::timeout(budget, future)
            .await
            .map_err(|_| TimeoutElapsed { budget });
    }
    // The timer has to be created on the pool, not on the calling thread.
    match WORKER_POOL
        .spawn(async move { tokio::time::timeout(budget, future).await })
        .await
    {
        Ok(result) => result.map_err(|_| TimeoutElapsed { budget }),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // The pool only cancels tasks when it shuts down.
        Err(_) => Err(TimeoutElapsed { budget }),
    }
}
