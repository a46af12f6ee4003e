use std::rc::Rc;

use callstack::{Arg, CallStack, Function, ManualHost, Object, Uniq, WrapOptions, args};

fn main() {
    // `ManualHost` makes tick boundaries explicit: nothing runs until `turn`.
    let host = ManualHost::new();
    let stack = CallStack::new(host.clone());

    let render = stack.wrap(
        Function::new(|inv| println!("render {}", inv.args()[0])),
        Uniq::Once,
    );
    let save = stack.queue("io").wrap(
        Function::new(|inv| println!("save {}", inv.args()[0])),
        WrapOptions::default(),
    );
    let log = stack.wrap(
        Function::new(|inv| println!("log {}", inv.args()[0])),
        WrapOptions::new().weight(10),
    );

    // Receivers keep their methods as fields; wrapping one reroutes calls
    // made through the object.
    let counter = Object::new().with("count", 0).with(
        "bump",
        Function::new(|inv| {
            if let Some(me) = inv.receiver() {
                let count = me.get("count").and_then(|v| v.as_int()).unwrap_or(0);
                me.set("count", count + 1);
                println!("bump -> {}", count + 1);
            }
        }),
    );
    stack
        .wrap_method(&counter, "bump", WrapOptions::default())
        .expect("counter has a bump method");

    stack.tick(|| println!("-- tick complete --"));

    for frame in 0..3 {
        render.call(args![frame]).unwrap();
    }
    save.call(args!["draft"]).unwrap();
    log.call(args!["burst queued"]).unwrap();
    counter.call("bump", args![]).unwrap();

    println!("pending before tick: {}", stack.pending());
    host.turn();

    let count = counter.get("count").unwrap_or(Arg::Unit);
    println!("count after tick: {count}");
    assert_eq!(Rc::strong_count(&counter), 1);
}
