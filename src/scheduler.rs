//! Provides the `CallStack` scheduler that defers and coalesces calls.
//!
//! Wrapping a [`Function`] yields a proxy that, instead of running the target,
//! records the invocation in a named queue and asks the [`Host`] for a tick.
//! On the tick every non-paused queue is drained in the registry's order and
//! each recorded call is executed with its receiver and captured arguments.
//! Tick listeners fire once the drain is complete.
//!
//! Requests for a tick are coalesced: while one is pending, further calls
//! either re-arm it (debounce mode, the default) or are absorbed by it.
//! Calls queued while a tick is draining are left for the next tick.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    Config, Error, FailurePolicy, Weight,
    function::{CallError, Function},
    host::{Host, TickHandle},
    listener::{ListenerId, Listeners},
    queue::{Admission, Call, CallQueue, Uniq},
    registry::{DEFAULT_QUEUE, Registry},
    value::{Args, Object},
};

/// Options applied to every call made through a wrapped function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WrapOptions {
    pub uniq: Uniq,
    pub weight: Weight,
}

impl WrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn uniq(mut self, uniq: Uniq) -> Self {
        self.uniq = uniq;
        self
    }

    #[must_use]
    pub fn weight(mut self, weight: impl Into<Weight>) -> Self {
        self.weight = weight.into();
        self
    }
}

impl From<Uniq> for WrapOptions {
    fn from(uniq: Uniq) -> Self {
        Self::new().uniq(uniq)
    }
}

impl From<Weight> for WrapOptions {
    fn from(weight: Weight) -> Self {
        Self::new().weight(weight)
    }
}

/// Summary of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Calls that ran to completion.
    pub executed: usize,

    /// Calls that returned an error and were skipped over.
    pub failed: usize,

    /// `true` if the scheduler was paused and nothing was drained.
    pub skipped: bool,
}

// Receiver captured by a wrapper. Wrappers installed on an object only keep a
// weak reference so the object does not own itself through its own field.
#[derive(Clone)]
enum Bound {
    None,
    Strong(Rc<Object>),
    Weak(Weak<Object>),
}

impl Bound {
    fn resolve(&self, fallback: Option<&Rc<Object>>) -> Option<Rc<Object>> {
        match self {
            Bound::None => fallback.cloned(),
            Bound::Strong(obj) => Some(Rc::clone(obj)),
            Bound::Weak(obj) => obj.upgrade(),
        }
    }
}

struct State {
    registry: Registry,
    listeners: Listeners,
    config: Config,
    paused: bool,
    pending_tick: Option<TickHandle>,
    running: bool,
}

struct Inner {
    host: Box<dyn Host>,
    state: RefCell<State>,
}

// Clears the running flag even if a call panics mid-drain.
struct RunningGuard<'a>(&'a Inner);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.state.try_borrow_mut() {
            state.running = false;
        }
    }
}

/// Deferred call scheduler.
///
/// `CallStack` is a cheap-clone handle; clones drive the same queues. It is
/// single-threaded by construction: calls, ticks and listeners all run on the
/// thread that owns the host.
#[derive(Clone)]
pub struct CallStack {
    inner: Rc<Inner>,
}

impl CallStack {
    /// Creates a scheduler ticking on `host` with the default [`Config`].
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_config(host, Config::default())
    }

    /// Creates a scheduler ticking on `host`.
    pub fn with_config(host: impl Host + 'static, config: Config) -> Self {
        debug!(?config, "creating call stack");
        CallStack {
            inner: Rc::new(Inner {
                host: Box::new(host),
                state: RefCell::new(State {
                    registry: Registry::new(),
                    listeners: Listeners::default(),
                    config,
                    paused: false,
                    pending_tick: None,
                    running: false,
                }),
            }),
        }
    }

    /// Returns a handle to the queue called `name`, creating it on first use.
    ///
    /// New queues drain after every queue created before them; see
    /// [`order`](Self::order) to change that.
    pub fn queue(&self, name: &str) -> Queue {
        self.inner.state.borrow_mut().registry.get(name);
        Queue {
            stack: self.clone(),
            name: Rc::from(name),
        }
    }

    fn default_queue(&self) -> Queue {
        self.queue(DEFAULT_QUEUE)
    }

    /// Wraps `target` so that calls are deferred to the default queue.
    pub fn wrap(&self, target: Function, options: impl Into<WrapOptions>) -> Function {
        self.default_queue().wrap(target, options)
    }

    /// Like [`wrap`](Self::wrap), with `receiver` bound for every call.
    pub fn wrap_bound(&self, receiver: &Rc<Object>, target: Function, options: impl Into<WrapOptions>) -> Function {
        self.default_queue().wrap_bound(receiver, target, options)
    }

    /// Replaces the method `name` on `receiver` with a deferring wrapper.
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotFound`] if `receiver` has no callable field `name`.
    pub fn wrap_method(&self, receiver: &Rc<Object>, name: &str, options: impl Into<WrapOptions>) -> Result<Function, Error> {
        self.default_queue().wrap_method(receiver, name, options)
    }

    /// Queues a single argument-less call of `target` on the default queue.
    ///
    /// # Errors
    ///
    /// Only fails when queuing is disabled, in which case `target` ran
    /// synchronously and its own error is returned.
    pub fn add(&self, target: Function, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.default_queue().add(target, options)
    }

    /// Like [`add`](Self::add), with `receiver` bound for the call.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub fn add_bound(&self, receiver: &Rc<Object>, target: Function, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.default_queue().add_bound(receiver, target, options)
    }

    /// Wraps the method `name` on `receiver` and queues one call of it.
    ///
    /// # Errors
    ///
    /// Fails if the method is missing, or when queuing is disabled and the
    /// method itself failed.
    pub fn add_method(&self, receiver: &Rc<Object>, name: &str, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.default_queue().add_method(receiver, name, options)
    }

    /// Registers a listener fired after every completed drain cycle.
    pub fn tick(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.inner.state.borrow_mut().listeners.add(listener, false)
    }

    /// Registers a listener fired after the next completed drain cycle only.
    pub fn tick_once(&self, listener: impl FnOnce() + 'static) -> ListenerId {
        let slot = RefCell::new(Some(listener));
        self.inner.state.borrow_mut().listeners.add(
            move || {
                let listener = slot.borrow_mut().take();
                if let Some(listener) = listener {
                    listener();
                }
            },
            true,
        )
    }

    /// Removes a tick listener. Returns `false` if it was not registered.
    pub fn untick(&self, id: ListenerId) -> bool {
        self.inner.state.borrow_mut().listeners.remove(id)
    }

    /// Drains the given queues right after the default queue, in the given
    /// order, ahead of every other queue.
    pub fn order<S: AsRef<str>>(&self, names: &[S]) {
        self.inner.state.borrow_mut().registry.reorder(names);
    }

    /// Current drain order.
    #[must_use]
    pub fn queue_order(&self) -> Vec<String> {
        self.inner.state.borrow().registry.order().to_vec()
    }

    /// Stops draining. Ticks still occur but leave every queue untouched and
    /// do not notify listeners.
    pub fn pause(&self) {
        debug!("pausing call stack");
        self.inner.state.borrow_mut().paused = true;
    }

    /// Resumes draining and schedules a tick to flush the backlog.
    pub fn unpause(&self) {
        debug!("unpausing call stack");
        self.inner.state.borrow_mut().paused = false;
        self.schedule_tick();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    /// Discards the pending calls of the default queue. Returns how many
    /// calls were dropped.
    pub fn clear(&self) -> usize {
        self.default_queue().clear()
    }

    /// Discards the pending calls of the queue `name`. Unknown names are not
    /// created and report zero.
    pub fn clear_queue(&self, name: &str) -> usize {
        let dropped = match self.inner.state.borrow_mut().registry.lookup_mut(name) {
            Some(queue) => queue.clear(),
            None => return 0,
        };
        debug!(queue = name, dropped, "cleared queue");
        dropped
    }

    /// Decorates `target` right away: returns `decorator(target)`.
    ///
    /// Unlike wrapping, this involves no queue and no tick.
    pub fn decorate(&self, target: Function, decorator: impl FnOnce(Function) -> Function) -> Function {
        decorator(target)
    }

    /// Replaces the method `name` on `receiver` with `decorator(method)` and
    /// returns the new method.
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotFound`] if `receiver` has no callable field `name`.
    pub fn decorate_method(
        &self,
        receiver: &Rc<Object>,
        name: &str,
        decorator: impl FnOnce(Function) -> Function,
    ) -> Result<Function, Error> {
        let decorated = decorator(receiver.require_method(name)?);
        receiver.set(name, decorated.clone());
        Ok(decorated)
    }

    /// Cancels a pending tick, if any, and runs one tick now.
    ///
    /// # Errors
    ///
    /// See [`run_tick`](Self::run_tick).
    pub fn flush(&self) -> Result<TickReport, Error> {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            if state.running {
                return Err(Error::TickInProgress);
            }
            state.pending_tick.take()
        };
        if let Some(handle) = pending {
            self.inner.host.cancel(handle);
        }
        self.run_tick()
    }

    /// Runs one tick: drains every non-paused queue in order, then fires the
    /// tick listeners. This is what the host invokes.
    ///
    /// # Errors
    ///
    /// - [`Error::TickInProgress`] when called from inside a running tick.
    /// - [`Error::CallFailed`] when a call fails under [`FailurePolicy::Abort`].
    pub fn run_tick(&self) -> Result<TickReport, Error> {
        let (order, policy) = {
            let mut state = self.inner.state.borrow_mut();
            if state.running {
                warn!("tick requested while another tick is running");
                return Err(Error::TickInProgress);
            }
            // Cleared first so calls queued by the drain schedule a new tick.
            state.pending_tick = None;
            if state.paused {
                debug!("call stack paused, skipping tick");
                return Ok(TickReport {
                    skipped: true,
                    ..TickReport::default()
                });
            }
            state.running = true;
            (state.registry.order().to_vec(), state.config.failure_policy)
        };
        let _running = RunningGuard(&*self.inner);

        let mut report = TickReport::default();
        for name in &order {
            let batch = {
                let mut state = self.inner.state.borrow_mut();
                match state.registry.lookup_mut(name) {
                    Some(queue) if !queue.is_paused() => queue.drain_all(),
                    Some(_) => {
                        trace!(queue = %name, "queue paused, leaving calls buffered");
                        continue;
                    }
                    None => continue,
                }
            };
            if !batch.is_empty() {
                trace!(queue = %name, calls = batch.len(), "draining queue");
            }
            for call in batch {
                match call.execute() {
                    Ok(()) => report.executed += 1,
                    Err(err) => match policy {
                        FailurePolicy::Isolate => {
                            warn!(queue = %name, %err, "queued call failed");
                            report.failed += 1;
                        }
                        FailurePolicy::Abort => {
                            // Queues not reached yet keep their calls for the next tick.
                            if self.pending() > 0 {
                                self.schedule_tick();
                            }
                            return Err(Error::CallFailed {
                                queue: name.clone(),
                                source: err,
                            });
                        }
                    },
                }
            }
        }

        let cycle = self.inner.state.borrow().listeners.cycle();
        for id in cycle {
            // A listener unticked earlier in this cycle is skipped.
            let listener = self.inner.state.borrow_mut().listeners.claim(id);
            if let Some(listener) = listener {
                listener.fire();
            }
        }
        trace!(executed = report.executed, failed = report.failed, "tick complete");
        Ok(report)
    }

    /// `true` while a tick has been requested from the host and not yet run.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.inner.state.borrow().pending_tick.is_some()
    }

    /// Total number of pending calls across all queues.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().registry.pending()
    }

    /// Number of pending calls in the queue `name`, zero if it does not exist.
    #[must_use]
    pub fn pending_in(&self, name: &str) -> usize {
        self.inner.state.borrow().registry.lookup(name).map_or(0, CallQueue::len)
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.state.borrow().config.clone()
    }

    /// In debounce mode each new call re-arms the pending tick; otherwise the
    /// first requested tick stands.
    pub fn set_debounce(&self, debounce: bool) {
        self.inner.state.borrow_mut().config.debounce = debounce;
    }

    /// When disabled, wrapping returns targets unchanged and calls run
    /// synchronously. Functions wrapped earlier keep deferring.
    pub fn set_disabled(&self, disabled: bool) {
        self.inner.state.borrow_mut().config.disabled = disabled;
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.inner.state.borrow().config.disabled
    }

    /// Delay requested from the host for each tick.
    pub fn set_quiet_period(&self, quiet_period: Duration) {
        let millis = u64::try_from(quiet_period.as_millis()).unwrap_or(u64::MAX);
        self.inner.state.borrow_mut().config.quiet_period_ms = millis;
    }

    pub fn set_failure_policy(&self, policy: FailurePolicy) {
        self.inner.state.borrow_mut().config.failure_policy = policy;
    }

    fn enqueue(&self, queue: &str, call: Call, uniq: Uniq) {
        let admission = self.inner.state.borrow_mut().registry.get(queue).offer(call, uniq);
        match admission {
            Admission::Dropped => {
                trace!(queue, "equal call already pending, dropping");
                return;
            }
            Admission::Replaced => trace!(queue, "replaced pending call"),
            Admission::Queued => trace!(queue, "queued call"),
        }
        self.schedule_tick();
    }

    fn schedule_tick(&self) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(handle) = state.pending_tick {
            if !state.config.debounce {
                return;
            }
            self.inner.host.cancel(handle);
        }

        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.host.schedule(
            state.config.quiet_period(),
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = (CallStack { inner }).run_tick() {
                    warn!(%err, "scheduled tick failed");
                }
            }),
        );
        trace!(handle = handle.value(), "tick scheduled");
        state.pending_tick = Some(handle);
    }

    fn make_wrapper(&self, queue: &Rc<str>, bound: Bound, target: Function, options: WrapOptions) -> Function {
        let stack = Rc::downgrade(&self.inner);
        let queue = Rc::clone(queue);
        Function::new(move |inv| {
            let Some(inner) = stack.upgrade() else {
                debug!(queue = %queue, "call stack dropped, discarding call");
                return;
            };
            let call = Call::new(
                target.clone(),
                bound.resolve(inv.receiver()),
                inv.args().to_vec(),
                options.weight,
            );
            CallStack { inner }.enqueue(&queue, call, options.uniq);
        })
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("CallStack")
            .field("order", &state.registry.order())
            .field("pending", &state.registry.pending())
            .field("listeners", &state.listeners.len())
            .field("paused", &state.paused)
            .field("scheduled", &state.pending_tick.is_some())
            .finish()
    }
}

/// Handle to one named queue of a [`CallStack`].
#[derive(Clone)]
pub struct Queue {
    stack: CallStack,
    name: Rc<str>,
}

impl Queue {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wraps `target` so that calls are deferred to this queue.
    ///
    /// The wrapper forwards the receiver it is invoked with. When queuing is
    /// disabled, `target` is returned unchanged.
    pub fn wrap(&self, target: Function, options: impl Into<WrapOptions>) -> Function {
        self.wrap_inner(Bound::None, target, options.into())
    }

    /// Wraps `target` with `receiver` bound as the receiver of every call.
    pub fn wrap_bound(&self, receiver: &Rc<Object>, target: Function, options: impl Into<WrapOptions>) -> Function {
        self.wrap_inner(Bound::Strong(Rc::clone(receiver)), target, options.into())
    }

    /// Replaces the method `name` on `receiver` with a wrapper deferring to
    /// this queue, so calls made through the object are deferred too.
    /// Returns the wrapper.
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotFound`] if `receiver` has no callable field `name`.
    pub fn wrap_method(&self, receiver: &Rc<Object>, name: &str, options: impl Into<WrapOptions>) -> Result<Function, Error> {
        let target = receiver.require_method(name)?;
        if self.stack.is_disabled() {
            return Ok(target);
        }
        let wrapper = self.wrap_inner(Bound::Weak(Rc::downgrade(receiver)), target, options.into());
        receiver.set(name, wrapper.clone());
        Ok(wrapper)
    }

    /// Queues one argument-less call of `target`.
    ///
    /// # Errors
    ///
    /// Only fails when queuing is disabled, in which case `target` ran
    /// synchronously and its own error is returned.
    pub fn add(&self, target: Function, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.wrap(target, options).call(Args::new())
    }

    /// Queues one argument-less call of `target` on `receiver`.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub fn add_bound(&self, receiver: &Rc<Object>, target: Function, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.wrap_bound(receiver, target, options).call_on(receiver, Args::new())
    }

    /// Wraps the method `name` on `receiver` and queues one call of it.
    ///
    /// # Errors
    ///
    /// Fails if the method is missing, or when queuing is disabled and the
    /// method itself failed.
    pub fn add_method(&self, receiver: &Rc<Object>, name: &str, options: impl Into<WrapOptions>) -> Result<(), CallError> {
        self.wrap_method(receiver, name, options)?.call_on(receiver, Args::new())
    }

    /// Holds this queue's calls back during ticks until [`unpause`](Self::unpause).
    pub fn pause(&self) {
        debug!(queue = %self.name, "pausing queue");
        self.stack.inner.state.borrow_mut().registry.get(&self.name).pause();
    }

    /// Releases the queue and schedules a tick to flush its backlog.
    pub fn unpause(&self) {
        debug!(queue = %self.name, "unpausing queue");
        self.stack.inner.state.borrow_mut().registry.get(&self.name).unpause();
        self.stack.schedule_tick();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.stack
            .inner
            .state
            .borrow()
            .registry
            .lookup(&self.name)
            .is_some_and(|q| q.is_paused())
    }

    /// Discards the pending calls of this queue without running them.
    /// Returns how many calls were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.stack.inner.state.borrow_mut().registry.get(&self.name).clear();
        debug!(queue = %self.name, dropped, "cleared queue");
        dropped
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack
            .inner
            .state
            .borrow()
            .registry
            .lookup(&self.name)
            .map_or(0, |q| q.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wrap_inner(&self, bound: Bound, target: Function, options: WrapOptions) -> Function {
        if self.stack.is_disabled() {
            trace!(queue = %self.name, "queuing disabled, returning target unchanged");
            return target;
        }
        self.stack.make_wrapper(&self.name, bound, target, options)
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .field("paused", &self.is_paused())
            .finish()
    }
}
