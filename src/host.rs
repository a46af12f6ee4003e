//! The scheduling primitive a [`CallStack`](crate::CallStack) ticks on.
//!
//! The scheduler never decides *when* the next opportunity to run is; it asks
//! a [`Host`] to call back later and may cancel that request to re-arm it.
//! Two hosts ship with the crate:
//!
//! - [`ManualHost`] runs callbacks only when told to, which makes tick
//!   boundaries explicit and deterministic.
//! - [`SpawnHost`] spawns each tick as a local task on a single-threaded
//!   executor (`futures`' `LocalPool`, a tokio `LocalSet`, smol's
//!   `LocalExecutor`, ...), optionally after a quiet period.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt, mem,
    rc::Rc,
    time::Duration,
};

use futures::{
    future::{AbortHandle, LocalBoxFuture, abortable},
    task::{LocalSpawn, LocalSpawnExt},
};
use tracing::{error, trace};

use crate::timing::Delay;

/// Callback handed to a host; runs one scheduler tick.
pub type TickCallback = Box<dyn FnOnce()>;

/// Identifies a scheduled callback so that it can be canceled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    /// Wraps a host-chosen identifier. Hosts outside this crate use this to
    /// hand out handles from [`Host::schedule`].
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

/// A best-effort "call me back at the next opportunity" primitive.
///
/// Implementations must never invoke `callback` synchronously from within
/// [`schedule`](Host::schedule). After [`cancel`](Host::cancel) returns, the
/// canceled callback must not run. Canceling a handle that already ran is a
/// no-op.
pub trait Host {
    /// Arranges for `callback` to run once, no sooner than `delay` from now.
    fn schedule(&self, delay: Duration, callback: TickCallback) -> TickHandle;

    /// Withdraws a callback that has not run yet.
    fn cancel(&self, handle: TickHandle);
}

impl<H: Host + ?Sized> Host for Rc<H> {
    fn schedule(&self, delay: Duration, callback: TickCallback) -> TickHandle {
        (**self).schedule(delay, callback)
    }

    fn cancel(&self, handle: TickHandle) {
        (**self).cancel(handle);
    }
}

struct Pending {
    handle: TickHandle,
    delay: Duration,
    callback: TickCallback,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    pending: Vec<Pending>,
}

/// A host driven explicitly by its owner.
///
/// Clones share the same pending list, so a test can keep one clone and hand
/// another to the scheduler. Requested delays are recorded but not waited
/// for: a turn runs every callback pending at its start.
#[derive(Clone, Default)]
pub struct ManualHost {
    state: Rc<RefCell<ManualState>>,
}

impl ManualHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every callback that was pending when the turn started and
    /// returns how many ran. Callbacks scheduled during the turn wait for the
    /// next one.
    pub fn turn(&self) -> usize {
        let batch = mem::take(&mut self.state.borrow_mut().pending);
        let ran = batch.len();
        for p in batch {
            trace!(handle = p.handle.0, "manual host running callback");
            (p.callback)();
        }
        ran
    }

    /// Turns until nothing is pending. Returns the number of turns taken.
    ///
    /// Never returns if callbacks keep scheduling new callbacks forever.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.turn() > 0 {
            turns += 1;
        }
        turns
    }

    /// Number of callbacks waiting for the next turn.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Delays requested by the pending callbacks, in scheduling order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.state.borrow().pending.iter().map(|p| p.delay).collect()
    }
}

impl Host for ManualHost {
    fn schedule(&self, delay: Duration, callback: TickCallback) -> TickHandle {
        let mut state = self.state.borrow_mut();
        let handle = TickHandle::new(state.next_id);
        state.next_id += 1;
        state.pending.push(Pending {
            handle,
            delay,
            callback,
        });
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        self.state.borrow_mut().pending.retain(|p| p.handle != handle);
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("pending", &self.pending())
            .finish()
    }
}

type SpawnFn = Box<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// A host that runs each tick as a task on a single-threaded executor.
///
/// The tick task is abortable, so canceling a handle before the executor gets
/// to it guarantees the callback never runs. A nonzero delay is waited out
/// with [`Delay`] before the callback is invoked.
pub struct SpawnHost {
    spawn: SpawnFn,
    next_id: Cell<u64>,
    live: Rc<RefCell<HashMap<u64, AbortHandle>>>,
}

impl SpawnHost {
    /// Creates a host from a function that spawns a local, non-`Send`
    /// future, e.g. `|f| { tokio::task::spawn_local(f); }`.
    pub fn new(spawn: impl Fn(LocalBoxFuture<'static, ()>) + 'static) -> Self {
        Self {
            spawn: Box::new(spawn),
            next_id: Cell::new(0),
            live: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Creates a host from any [`LocalSpawn`] implementation, such as
    /// `futures::executor::LocalSpawner`.
    pub fn from_local_spawn(spawner: impl LocalSpawn + 'static) -> Self {
        Self::new(move |task| {
            if let Err(err) = spawner.spawn_local(task) {
                error!(%err, "failed to spawn scheduler tick");
            }
        })
    }

    /// Number of ticks spawned and not yet run or canceled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.live.borrow().len()
    }
}

impl Host for SpawnHost {
    fn schedule(&self, delay: Duration, callback: TickCallback) -> TickHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let live = Rc::clone(&self.live);
        let (task, abort) = abortable(async move {
            live.borrow_mut().remove(&id);
            callback();
        });
        self.live.borrow_mut().insert(id, abort);

        trace!(handle = id, ?delay, "spawning scheduler tick");
        (self.spawn)(Box::pin(async move {
            let _ = Delay::new(task, delay).await;
        }));
        TickHandle::new(id)
    }

    fn cancel(&self, handle: TickHandle) {
        if let Some(abort) = self.live.borrow_mut().remove(&handle.0) {
            trace!(handle = handle.0, "aborting scheduler tick");
            abort.abort();
        }
    }
}

impl fmt::Debug for SpawnHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnHost")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
