use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use callstack::{
    Arg, CallStack, Error, FailurePolicy, Function, Host, ManualHost, Object, TickHandle, Uniq,
    WrapOptions, args, host::TickCallback,
};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

// Logs `tag` followed by every argument, colon separated.
fn pusher(log: &Log, tag: &'static str) -> Function {
    let log = Rc::clone(log);
    Function::new(move |inv| {
        let mut entry = tag.to_string();
        for arg in inv.args() {
            entry.push(':');
            entry.push_str(&arg.to_string());
        }
        log.borrow_mut().push(entry);
    })
}

fn joined(log: &Log, sep: &str) -> String {
    log.borrow().join(sep)
}

fn setup() -> (CallStack, ManualHost) {
    let host = ManualHost::new();
    (CallStack::new(host.clone()), host)
}

#[test]
fn wrap_defers_until_tick() {
    let (stack, host) = setup();
    let log = new_log();

    let obj = Object::new().with("_bar", "bar").with("_baz", "baz");
    for name in ["bar", "baz"] {
        let log = Rc::clone(&log);
        let field = format!("_{name}");
        obj.set(
            name,
            Function::new(move |inv| {
                let value = inv.field(&field).map(|v| v.to_string()).unwrap_or_default();
                log.borrow_mut().push(value);
            }),
        );
    }

    let foo = stack.wrap(pusher(&log, "foo"), WrapOptions::default());
    let bar = stack.wrap_bound(&obj, obj.method("bar").unwrap(), WrapOptions::default());
    stack.wrap_method(&obj, "baz", WrapOptions::default()).unwrap();

    let seen = Rc::new(RefCell::new(String::new()));
    let seen_cl = Rc::clone(&seen);
    let log_cl = Rc::clone(&log);
    stack.tick_once(move || *seen_cl.borrow_mut() = joined(&log_cl, ","));

    foo.call(args![]).unwrap();
    bar.call(args![]).unwrap();
    obj.call("baz", args![]).unwrap();

    assert!(log.borrow().is_empty(), "Calls should wait for the tick");
    assert_eq!(stack.pending(), 3);
    assert_eq!(host.turn(), 1, "Three calls should coalesce into one tick");
    assert_eq!(*seen.borrow(), "foo,bar,baz");
}

#[test]
fn add_queues_single_call() {
    let (stack, host) = setup();
    let log = new_log();

    stack.add(pusher(&log, "bar"), WrapOptions::default()).unwrap();
    stack.add(pusher(&log, "foo"), WrapOptions::new().weight(10)).unwrap();

    host.turn();
    assert_eq!(joined(&log, ","), "foo,bar");
}

#[test]
fn heavier_calls_run_first() {
    let (stack, host) = setup();
    let log = new_log();

    let foo = stack.wrap(pusher(&log, "foo"), WrapOptions::new().weight(100));
    let bar = stack.wrap(pusher(&log, "bar"), WrapOptions::default());

    bar.call(args![]).unwrap();
    bar.call(args![]).unwrap();
    foo.call(args![]).unwrap();
    foo.call(args![]).unwrap();
    bar.call(args![]).unwrap();

    host.turn();
    assert_eq!(joined(&log, ","), "foo,foo,bar,bar,bar");
}

#[test]
fn uniq_modes_collapse_pending_calls() {
    let (stack, host) = setup();
    let log = new_log();

    let foo = stack.wrap(pusher(&log, "foo"), Uniq::Args);
    let bar = stack.wrap(pusher(&log, "bar"), WrapOptions::new().weight(300));
    let baz = stack.wrap(
        pusher(&log, "baz"),
        WrapOptions::new().weight(600).uniq(Uniq::Once),
    );

    foo.call(args![true]).unwrap();
    bar.call(args![]).unwrap();
    foo.call(args![true]).unwrap();

    baz.call(args![]).unwrap();
    bar.call(args![]).unwrap();

    foo.call(args![false]).unwrap();
    baz.call(args![12, 34]).unwrap();

    foo.call(args![false, true]).unwrap();

    baz.call(args!["BAZ"]).unwrap();

    foo.call(args![false, true]).unwrap();
    foo.call(args![2]).unwrap();

    host.turn();
    assert_eq!(
        joined(&log, ","),
        "baz:BAZ,bar,bar,foo:true,foo:false,foo:false:true,foo:2"
    );
}

#[test]
fn uniq_args_compares_objects_by_identity() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "foo"), Uniq::Args);

    let shared = Object::new();
    foo.call(args![Rc::clone(&shared)]).unwrap();
    foo.call(args![Rc::clone(&shared)]).unwrap();
    foo.call(args![Object::new()]).unwrap();

    host.turn();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn uniq_once_keeps_last_arguments() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "foo"), Uniq::Once);

    foo.call(args![1]).unwrap();
    foo.call(args!["x", "y"]).unwrap();
    foo.call(args![3]).unwrap();

    host.turn();
    assert_eq!(joined(&log, ","), "foo:3");
}

#[test]
fn named_queues_drain_in_order() {
    let (stack, host) = setup();
    let log = new_log();

    let yyy = stack.queue("yyy");
    let xxx = stack.queue("xxx");
    let baz = yyy.wrap(pusher(&log, "baz"), WrapOptions::default());
    let qux = yyy.wrap(pusher(&log, "qux"), WrapOptions::new().weight(100));
    let foo = xxx.wrap(pusher(&log, "foo"), WrapOptions::default());
    let bar = xxx.wrap(pusher(&log, "bar"), WrapOptions::default());

    stack.order(&["xxx", "yyy"]);
    assert_eq!(stack.queue_order(), ["default", "xxx", "yyy"]);

    let rounds = Rc::new(RefCell::new(Vec::new()));
    {
        let rounds = Rc::clone(&rounds);
        let log = Rc::clone(&log);
        let stack_cl = stack.clone();
        let (foo, bar, baz, qux) = (foo.clone(), bar.clone(), baz.clone(), qux.clone());
        stack.tick_once(move || {
            rounds.borrow_mut().push(joined(&log, ","));
            log.borrow_mut().clear();
            stack_cl.order(&["yyy", "xxx"]);

            bar.call(args![]).unwrap();
            foo.call(args![]).unwrap();
            baz.call(args![]).unwrap();
            qux.call(args![]).unwrap();

            let rounds = Rc::clone(&rounds);
            let log = Rc::clone(&log);
            stack_cl.tick_once(move || rounds.borrow_mut().push(joined(&log, ",")));
        });
    }

    qux.call(args![]).unwrap();
    baz.call(args![]).unwrap();
    qux.call(args![]).unwrap();

    foo.call(args![]).unwrap();
    bar.call(args![]).unwrap();
    bar.call(args![]).unwrap();
    foo.call(args![]).unwrap();

    assert_eq!(host.run_until_idle(), 2);
    assert_eq!(*rounds.borrow(), ["foo,bar,bar,foo,qux,qux,baz", "qux,baz,bar,foo"]);
}

#[test]
fn pause_holds_calls_until_unpause() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "x"), WrapOptions::default());

    let fired = Rc::new(Cell::new(0));
    let fired_cl = Rc::clone(&fired);
    stack.tick(move || fired_cl.set(fired_cl.get() + 1));

    foo.call(args![1]).unwrap();
    stack.pause();
    foo.call(args![2]).unwrap();

    host.turn();
    assert!(log.borrow().is_empty(), "Nothing should run while paused");
    assert_eq!(fired.get(), 0, "Listeners should not fire while paused");
    assert_eq!(stack.pending(), 2);

    stack.unpause();
    foo.call(args![3]).unwrap();
    host.turn();

    assert_eq!(joined(&log, "-"), "x:1-x:2-x:3");
    assert_eq!(fired.get(), 1);
}

#[test]
fn global_unpause_schedules_tick_without_new_calls() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "x"), WrapOptions::default());

    foo.call(args![1]).unwrap();
    stack.pause();
    foo.call(args![2]).unwrap();
    host.turn();
    assert!(!stack.is_scheduled());

    stack.unpause();
    assert!(stack.is_scheduled(), "Unpause should request a tick for the backlog");
    assert_eq!(host.turn(), 1);
    assert_eq!(joined(&log, "-"), "x:1-x:2");
    assert_eq!(stack.pending(), 0);
}

#[test]
fn paused_queue_is_skipped_and_unpause_schedules_tick() {
    let (stack, host) = setup();
    let log = new_log();
    let background = stack.queue("background");
    let slow = background.wrap(pusher(&log, "slow"), WrapOptions::default());
    let fast = stack.wrap(pusher(&log, "fast"), WrapOptions::default());

    let fired = Rc::new(Cell::new(0));
    let fired_cl = Rc::clone(&fired);
    stack.tick(move || fired_cl.set(fired_cl.get() + 1));

    background.pause();
    assert!(background.is_paused());
    slow.call(args![]).unwrap();
    fast.call(args![]).unwrap();
    host.turn();

    assert_eq!(joined(&log, ","), "fast");
    assert_eq!(background.len(), 1);
    assert_eq!(fired.get(), 1, "Listeners fire even when a queue is held back");

    background.unpause();
    assert!(stack.is_scheduled());
    host.turn();
    assert_eq!(joined(&log, ","), "fast,slow");
    assert_eq!(fired.get(), 2);
}

#[test]
fn listeners_fire_once_per_cycle_in_registration_order() {
    let (stack, host) = setup();
    let log = new_log();

    let first = {
        let log = Rc::clone(&log);
        stack.tick(move || log.borrow_mut().push("first".into()))
    };
    {
        let log = Rc::clone(&log);
        stack.tick_once(move || log.borrow_mut().push("once".into()));
    }
    {
        let log = Rc::clone(&log);
        stack.tick(move || log.borrow_mut().push("last".into()));
    }

    // An empty cycle still notifies listeners.
    stack.flush().unwrap();
    assert_eq!(joined(&log, ","), "first,once,last");

    assert!(stack.untick(first));
    assert!(!stack.untick(first));
    stack.flush().unwrap();
    assert_eq!(joined(&log, ","), "first,once,last,last");
    assert_eq!(host.pending(), 0);
}

#[test]
fn listener_unticked_during_cycle_does_not_fire() {
    let (stack, _host) = setup();
    let log = new_log();

    let later = Rc::new(Cell::new(None));
    {
        let stack_cl = stack.clone();
        let later = Rc::clone(&later);
        let log = Rc::clone(&log);
        stack.tick(move || {
            log.borrow_mut().push("first".into());
            if let Some(id) = later.take() {
                stack_cl.untick(id);
            }
        });
    }
    for (tag, once) in [("second", false), ("third", true)] {
        let log = Rc::clone(&log);
        let id = if once {
            stack.tick_once(move || log.borrow_mut().push(tag.into()))
        } else {
            stack.tick(move || log.borrow_mut().push(tag.into()))
        };
        if tag == "second" {
            later.set(Some(id));
        }
    }

    stack.flush().unwrap();
    assert_eq!(joined(&log, ","), "first,third");
    stack.flush().unwrap();
    assert_eq!(joined(&log, ","), "first,third,first");
}

#[test]
fn one_shot_listener_unticked_during_cycle_does_not_fire() {
    let (stack, _host) = setup();
    let log = new_log();

    let target = Rc::new(Cell::new(None));
    {
        let stack_cl = stack.clone();
        let target = Rc::clone(&target);
        stack.tick_once(move || {
            if let Some(id) = target.take() {
                assert!(stack_cl.untick(id));
            }
        });
    }
    let log_cl = Rc::clone(&log);
    target.set(Some(stack.tick_once(move || log_cl.borrow_mut().push("late".into()))));

    stack.flush().unwrap();
    stack.flush().unwrap();
    assert!(log.borrow().is_empty());
}

#[test]
fn calls_queued_during_drain_run_next_tick() {
    let (stack, host) = setup();
    let log = new_log();
    let later = stack.wrap(pusher(&log, "later"), WrapOptions::default());

    let later_cl = later.clone();
    let log_cl = Rc::clone(&log);
    let first = stack.wrap(
        Function::new(move |_| {
            log_cl.borrow_mut().push("first".into());
            later_cl.call(args![]).unwrap();
        }),
        WrapOptions::default(),
    );

    first.call(args![]).unwrap();
    assert_eq!(host.turn(), 1);
    assert_eq!(joined(&log, ","), "first");
    assert!(stack.is_scheduled(), "Reentrant call should schedule a new tick");

    host.turn();
    assert_eq!(joined(&log, ","), "first,later");
}

#[test]
fn clear_discards_pending_calls() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "foo"), WrapOptions::default());
    let bar = stack.queue("other").wrap(pusher(&log, "bar"), WrapOptions::default());

    foo.call(args![]).unwrap();
    foo.call(args![]).unwrap();
    bar.call(args![]).unwrap();

    assert_eq!(stack.clear(), 2);
    host.turn();
    assert_eq!(joined(&log, ","), "bar");
}

#[test]
fn named_queue_can_be_cleared_and_counted() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "foo"), WrapOptions::default());
    let bar = stack.queue("other").wrap(pusher(&log, "bar"), WrapOptions::default());

    foo.call(args![]).unwrap();
    bar.call(args![1]).unwrap();
    bar.call(args![2]).unwrap();

    assert_eq!(stack.pending_in("other"), 2);
    assert_eq!(stack.pending_in("default"), 1);
    assert_eq!(stack.pending_in("missing"), 0);

    assert_eq!(stack.clear_queue("other"), 2);
    assert_eq!(stack.clear_queue("missing"), 0);
    assert!(!stack.queue_order().iter().any(|n| n == "missing"));
    assert_eq!(stack.pending(), 1);

    host.turn();
    assert_eq!(joined(&log, ","), "foo");
}

#[test]
fn decorate_intercepts_synchronously() {
    let (stack, host) = setup();
    let log = new_log();

    let foo = pusher(&log, "v");
    let obj = Object::new().with("bar", pusher(&log, "v"));

    let ofoo = stack.decorate(foo.clone(), |f| {
        Function::try_new(move |inv| {
            let a = inv.arg(0).and_then(Arg::as_int).unwrap_or_default();
            f.call(args![a + 1])
        })
    });
    stack
        .decorate_method(&obj, "bar", |f| {
            Function::try_new(move |inv| {
                let a = inv.arg(0).and_then(Arg::as_int).unwrap_or_default();
                f.call(args![a * 2])
            })
        })
        .unwrap();

    foo.call(args![1]).unwrap();
    ofoo.call(args![1]).unwrap();
    obj.call("bar", args![2]).unwrap();

    assert_eq!(joined(&log, "->"), "v:1->v:2->v:4");
    assert_eq!(host.pending(), 0, "Decorating never schedules a tick");
}

#[test]
fn disabled_stack_runs_calls_synchronously() {
    let (stack, host) = setup();
    stack.set_disabled(true);
    let log = new_log();

    let obj = Object::new();
    {
        let log = Rc::clone(&log);
        obj.set(
            "baz",
            Function::new(move |inv| {
                let sum: i64 = inv.args().iter().filter_map(Arg::as_int).sum();
                log.borrow_mut().push(format!("baz{sum}"));
            }),
        );
    }
    let original = obj.method("baz").unwrap();

    let target = pusher(&log, "bar");
    let bar = stack.wrap(target.clone(), WrapOptions::default());
    assert_eq!(bar, target, "Disabled wrap returns the target itself");
    stack.queue("bbb").wrap_method(&obj, "baz", WrapOptions::default()).unwrap();
    assert_eq!(obj.method("baz").unwrap(), original);

    stack.queue("aaa").add(pusher(&log, "foo"), WrapOptions::default()).unwrap();
    bar.call(args![]).unwrap();
    obj.call("baz", args![1, 2, 3]).unwrap();

    assert_eq!(joined(&log, "->"), "foo->bar->baz6");
    assert_eq!(host.pending(), 0);
    stack.set_disabled(false);
}

#[test]
fn missing_method_is_an_error() {
    let (stack, _host) = setup();
    let obj = Object::new().with("name", "not callable");

    let err = stack.wrap_method(&obj, "name", WrapOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MethodNotFound { ref name } if name == "name"));
    assert!(stack.add_method(&obj, "missing", WrapOptions::default()).is_err());
    assert!(stack.decorate_method(&obj, "missing", |f| f).is_err());
}

#[test]
fn failing_call_is_isolated_by_default() {
    let (stack, _host) = setup();
    let log = new_log();

    stack.add(Function::try_new(|_| Err("broken")), WrapOptions::default()).unwrap();
    stack.add(pusher(&log, "ok"), WrapOptions::default()).unwrap();

    let report = stack.flush().unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 1);
    assert!(!report.skipped);
    assert_eq!(joined(&log, ","), "ok");
}

#[test]
fn abort_policy_stops_the_tick() {
    let (stack, host) = setup();
    stack.set_failure_policy(FailurePolicy::Abort);
    let log = new_log();

    let fired = Rc::new(Cell::new(false));
    let fired_cl = Rc::clone(&fired);
    stack.tick(move || fired_cl.set(true));

    stack.add(Function::try_new(|_| Err("broken")), WrapOptions::default()).unwrap();
    stack.add(pusher(&log, "dropped"), WrapOptions::default()).unwrap();
    stack.queue("later").add(pusher(&log, "kept"), WrapOptions::default()).unwrap();

    let err = stack.flush().unwrap_err();
    assert!(matches!(err, Error::CallFailed { ref queue, .. } if queue == "default"));
    assert_eq!(err.to_string(), "call in queue `default` failed: broken");
    assert!(log.borrow().is_empty());
    assert!(!fired.get());
    assert_eq!(stack.queue("later").len(), 1);
    assert!(stack.is_scheduled(), "Calls left behind should get a new tick");

    assert_eq!(host.turn(), 1);
    assert_eq!(joined(&log, ","), "kept");
    assert!(fired.get());
    assert!(!stack.is_scheduled());
}

#[test]
fn abort_with_nothing_left_schedules_no_tick() {
    let (stack, host) = setup();
    stack.set_failure_policy(FailurePolicy::Abort);
    let broken = stack.wrap(Function::try_new(|_| Err("broken")), WrapOptions::default());

    broken.call(args![]).unwrap();
    assert_eq!(host.turn(), 1);
    assert!(!stack.is_scheduled());
    assert_eq!(host.pending(), 0);
}

#[test]
fn flush_inside_tick_is_rejected() {
    let (stack, _host) = setup();
    let outcome = Rc::new(RefCell::new(None));

    let stack_cl = stack.clone();
    let outcome_cl = Rc::clone(&outcome);
    stack
        .add(
            Function::new(move |_| {
                *outcome_cl.borrow_mut() = Some(stack_cl.flush());
            }),
            WrapOptions::default(),
        )
        .unwrap();

    stack.flush().unwrap();
    assert!(matches!(
        outcome.borrow_mut().take(),
        Some(Err(Error::TickInProgress))
    ));
}

#[test]
fn dropped_stack_discards_calls() {
    let (stack, host) = setup();
    let log = new_log();
    let foo = stack.wrap(pusher(&log, "foo"), WrapOptions::default());

    foo.call(args![]).unwrap();
    drop(stack);
    foo.call(args![]).unwrap();

    host.run_until_idle();
    assert!(log.borrow().is_empty());
}

#[derive(Clone, Default)]
struct CountingHost {
    inner: ManualHost,
    scheduled: Rc<Cell<usize>>,
    canceled: Rc<Cell<usize>>,
}

impl Host for CountingHost {
    fn schedule(&self, delay: Duration, callback: TickCallback) -> TickHandle {
        self.scheduled.set(self.scheduled.get() + 1);
        self.inner.schedule(delay, callback)
    }

    fn cancel(&self, handle: TickHandle) {
        self.canceled.set(self.canceled.get() + 1);
        self.inner.cancel(handle);
    }
}

#[test]
fn debounce_rearms_pending_tick() {
    let host = CountingHost::default();
    let stack = CallStack::new(host.clone());
    let foo = stack.wrap(Function::new(|_| {}), WrapOptions::default());

    for _ in 0..3 {
        foo.call(args![]).unwrap();
    }
    assert_eq!(host.scheduled.get(), 3);
    assert_eq!(host.canceled.get(), 2);
    assert_eq!(host.inner.pending(), 1);

    host.inner.turn();
    assert!(!stack.is_scheduled());
    assert_eq!(stack.pending(), 0);
}

#[test]
fn without_debounce_first_tick_wins() {
    let host = CountingHost::default();
    let stack = CallStack::new(host.clone());
    stack.set_debounce(false);
    let foo = stack.wrap(Function::new(|_| {}), WrapOptions::default());

    for _ in 0..3 {
        foo.call(args![]).unwrap();
    }
    assert_eq!(host.scheduled.get(), 1);
    assert_eq!(host.canceled.get(), 0);
    assert_eq!(host.inner.turn(), 1);
    assert_eq!(stack.pending(), 0);
}

#[test]
fn quiet_period_is_requested_from_host() {
    let (stack, host) = setup();
    stack.set_quiet_period(Duration::from_millis(30));
    stack.add(Function::new(|_| {}), WrapOptions::default()).unwrap();
    assert_eq!(host.pending_delays(), [Duration::from_millis(30)]);
    assert_eq!(stack.config().quiet_period_ms, 30);
}
