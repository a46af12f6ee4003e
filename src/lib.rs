//! Deferred, coalescing call scheduling for single-threaded hosts.
//!
//! `callstack` turns direct function calls into queued ones. A wrapped
//! [`Function`] records each invocation in a named queue instead of running
//! it; at the next tick of the host's scheduling primitive every queue is
//! flushed in a deterministic order. Bursts of calls made within one tick are
//! thereby batched, and can optionally be deduplicated or reordered by weight.
//!
//! Features include:
//! - Named queues drained in a controllable order, the `"default"` queue first
//! - Per-call weights, with insertion order preserved between equal weights
//! - Deduplication of pending calls by argument equality or per target
//! - Global and per-queue pause, tick listeners, and a pass-through mode
//! - An executor agnostic [`Host`] seam with a manual host for deterministic
//!   stepping and a spawn-based host for `futures`, tokio or smol executors
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//! use callstack::{args, CallStack, Function, ManualHost, WrapOptions};
//!
//! let host = ManualHost::new();
//! let stack = CallStack::new(host.clone());
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&log);
//! let record = stack.wrap(
//!     Function::new(move |inv| sink.borrow_mut().push(inv.args()[0].to_string())),
//!     WrapOptions::default(),
//! );
//!
//! record.call(args!["a"]).unwrap();
//! record.call(args!["b"]).unwrap();
//! assert!(log.borrow().is_empty());
//!
//! host.turn();
//! assert_eq!(*log.borrow(), ["a", "b"]);
//! ```

pub mod config;
pub mod equality;
pub mod error;
pub mod function;
pub mod host;
pub mod listener;
pub mod queue;
mod registry;
pub mod scheduler;
pub mod timing;
pub mod value;
pub mod weight;

pub use config::{Config, FailurePolicy};
pub use error::Error;
pub use function::{CallError, Function, Invocation};
pub use host::{Host, ManualHost, SpawnHost, TickHandle};
pub use listener::ListenerId;
pub use queue::Uniq;
pub use registry::DEFAULT_QUEUE;
pub use scheduler::{CallStack, Queue, TickReport, WrapOptions};
pub use value::{Arg, Args, Object};
pub use weight::Weight;
