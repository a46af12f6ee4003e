use std::{rc::Rc, time::Duration};

use callstack::{CallStack, Function, SpawnHost, Uniq, args};
use smol::{LocalExecutor, Timer, channel};

fn main() {
    let ex = Rc::new(LocalExecutor::new());

    let spawner = Rc::clone(&ex);
    let stack = CallStack::new(SpawnHost::new(move |task| {
        spawner.spawn(task).detach();
    }));
    // Ticks fire only after 50ms without new calls.
    stack.set_quiet_period(Duration::from_millis(50));

    let (tx, rx) = channel::bounded(1);
    stack.tick_once(move || {
        let _ = tx.try_send(());
    });

    let search = stack.wrap(
        Function::new(|inv| println!("Searching for {}", inv.args()[0])),
        Uniq::Once,
    );

    smol::block_on(ex.run(async {
        for query in ["r", "ru", "rus", "rust"] {
            println!("Typed {query}");
            search.call(args![query]).unwrap();
            Timer::after(Duration::from_millis(10)).await;
        }
        rx.recv().await.unwrap();
        println!("Only the last query was searched");
    }));
}
