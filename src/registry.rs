//! Named call queues and the order in which they are drained.

use std::collections::HashMap;

use tracing::debug;

use crate::queue::CallQueue;

/// Name of the queue that always exists and always drains first.
pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug)]
pub(crate) struct Registry {
    queues: HashMap<String, CallQueue>,
    order: Vec<String>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        let mut queues = HashMap::with_capacity(4);
        queues.insert(DEFAULT_QUEUE.to_owned(), CallQueue::new());
        Registry {
            queues,
            order: vec![DEFAULT_QUEUE.to_owned()],
        }
    }

    /// Returns the queue for `name`, creating it on first use.
    ///
    /// A new queue drains after every queue known so far, unless its name was
    /// already placed by [`reorder`](Self::reorder).
    pub(crate) fn get(&mut self, name: &str) -> &mut CallQueue {
        let order = &mut self.order;
        self.queues.entry(name.to_owned()).or_insert_with(|| {
            debug!(queue = name, "creating call queue");
            if !order.iter().any(|n| n == name) {
                order.push(name.to_owned());
            }
            CallQueue::new()
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&CallQueue> {
        self.queues.get(name)
    }

    pub(crate) fn lookup_mut(&mut self, name: &str) -> Option<&mut CallQueue> {
        self.queues.get_mut(name)
    }

    /// Moves `names` to the front of the drain order, right after the default
    /// queue, in the given relative order. Names not mentioned keep their
    /// relative order behind the moved block.
    pub(crate) fn reorder<S: AsRef<str>>(&mut self, names: &[S]) {
        let mut block: Vec<String> = Vec::with_capacity(names.len());
        for name in names.iter().map(AsRef::as_ref) {
            if name == DEFAULT_QUEUE {
                debug!("ignoring default queue in reorder request");
                continue;
            }
            if !block.iter().any(|n| n == name) {
                block.push(name.to_owned());
            }
        }
        self.order.retain(|n| !block.contains(n));
        debug!(order = ?block, "reordering call queues");
        let rest = self.order.split_off(1);
        self.order.extend(block);
        self.order.extend(rest);
    }

    /// Current drain order.
    pub(crate) fn order(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn pending(&self) -> usize {
        self.queues.values().map(CallQueue::len).sum()
    }
}
