//! Callbacks fired after every completed drain cycle.

use std::rc::Rc;

/// Identifies a registered tick listener so it can be removed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
pub(crate) struct Listener {
    id: ListenerId,
    once: bool,
    callback: Rc<dyn Fn()>,
}

impl Listener {
    pub(crate) fn fire(&self) {
        (self.callback)();
    }
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

impl Listeners {
    pub(crate) fn add(&mut self, callback: impl Fn() + 'static, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Listener {
            id,
            once,
            callback: Rc::new(callback),
        });
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.id != id);
        self.entries.len() < before
    }

    /// Ids of the listeners to notify for one cycle, in registration order.
    /// Listeners added after this call wait for the next cycle.
    pub(crate) fn cycle(&self) -> Vec<ListenerId> {
        self.entries.iter().map(|l| l.id).collect()
    }

    /// Returns the listener `id` if it is still registered, unregistering it
    /// when it is one-shot.
    pub(crate) fn claim(&mut self, id: ListenerId) -> Option<Listener> {
        let pos = self.entries.iter().position(|l| l.id == id)?;
        if self.entries[pos].once {
            Some(self.entries.remove(pos))
        } else {
            Some(self.entries[pos].clone())
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
