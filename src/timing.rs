//! Timing utilities for hosts that need a quiet period before a tick.
//!
//! Provides [`Delay`], a future that holds back its inner future until a
//! deadline has passed. The waiting happens on a small shared thread pool so
//! the delay works on any executor, including single-threaded ones.

use std::{
    pin::Pin,
    sync::OnceLock,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};
use pin_project_lite::pin_project;
use tracing::{error, trace};

static THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

fn thread_pool() -> Option<&'static ThreadPool> {
    THREAD_POOL
        .get_or_init(|| match ThreadPoolBuilder::new().pool_size(4).name_prefix("callstack-delay-").create() {
            Ok(pool) => Some(pool),
            Err(err) => {
                error!(%err, "delay thread pool creation failed, delays will busy-wake");
                None
            }
        })
        .as_ref()
}

pin_project! {
    /// A future that begins polling its inner future only after a specified delay.
    ///
    /// The deadline is fixed when the `Delay` is created. Until it has passed,
    /// polling arranges a wake-up for the deadline and returns
    /// [`Poll::Pending`]; afterwards every poll is forwarded to the inner future.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Delay<F> {
        #[pin]
        future: F,
        deadline: Instant,
        armed: bool,
    }
}

impl<F> Delay<F> {
    /// Creates a new `Delay` that defers polling of `future` by `delay`.
    pub fn new(future: F, delay: Duration) -> Self {
        Delay {
            future,
            deadline: Instant::now() + delay,
            armed: false,
        }
    }

    fn wait(self: Pin<&mut Self>, cx: &mut Context<'_>) -> bool {
        let proj = self.project();
        let now = Instant::now();
        if now >= *proj.deadline {
            *proj.armed = false;
            return false;
        }
        if *proj.armed {
            return true;
        }

        let waker = cx.waker().clone();
        let deadline = *proj.deadline;
        match thread_pool() {
            Some(pool) => {
                trace!(remaining = ?deadline.saturating_duration_since(now), "arming delay");
                pool.spawn_ok(async move {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    waker.wake();
                });
                *proj.armed = true;
            }
            None => waker.wake(),
        }
        true
    }
}

impl<F> Future for Delay<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.as_mut().wait(cx) {
            return Poll::Pending;
        }
        self.project().future.poll(cx)
    }
}
