//! Pending call records and the per-name buffer that holds them.
//!
//! A [`CallQueue`] keeps its records ordered by descending weight, with ties
//! resolved by insertion order. Draining swaps the buffer for an empty one, so
//! calls queued while a drained batch is executing land in the next batch.

use std::{mem, rc::Rc};

use crate::{Weight, equality::args_differ, function::Function, value::{Args, Object}};

/// Deduplication mode for calls to the same target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Uniq {
    /// Every invocation is queued.
    #[default]
    Off,

    /// An invocation is dropped when a pending call to the same target with
    /// equal arguments is already queued.
    Args,

    /// At most one pending call per target; a new invocation replaces the
    /// pending one so the latest arguments win.
    Once,
}

/// One deferred invocation. Consumed exactly once, either by execution or by
/// being replaced or cleared before its drain.
#[derive(Clone, Debug)]
pub struct Call {
    pub(crate) target: Function,
    pub(crate) receiver: Option<Rc<Object>>,
    pub(crate) args: Args,
    pub(crate) weight: Weight,
}

impl Call {
    pub(crate) fn new(target: Function, receiver: Option<Rc<Object>>, args: Args, weight: Weight) -> Self {
        Self {
            target,
            receiver,
            args,
            weight,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Function {
        &self.target
    }

    #[must_use]
    pub fn receiver(&self) -> Option<&Rc<Object>> {
        self.receiver.as_ref()
    }

    #[must_use]
    pub fn args(&self) -> &[crate::Arg] {
        &self.args
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub(crate) fn execute(&self) -> Result<(), crate::CallError> {
        self.target.invoke(self.receiver.as_ref(), &self.args)
    }
}

/// Outcome of offering a call to a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// A pending call for the same target was removed in favour of this one.
    Replaced,
    /// An equal pending call already exists; nothing was queued.
    Dropped,
}

/// Ordered buffer of pending calls.
#[derive(Debug, Default)]
pub struct CallQueue {
    calls: Vec<Call>,
    weighted: bool,
    paused: bool,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `uniq` policy and queues `call` if it survives.
    pub fn offer(&mut self, call: Call, uniq: Uniq) -> Admission {
        let admission = match uniq {
            Uniq::Off => Admission::Queued,
            Uniq::Args => {
                let duplicate = self
                    .calls
                    .iter()
                    .any(|c| c.target.ptr_eq(&call.target) && !args_differ(&c.args, &call.args));
                if duplicate {
                    return Admission::Dropped;
                }
                Admission::Queued
            }
            Uniq::Once => {
                let before = self.calls.len();
                self.calls.retain(|c| !c.target.ptr_eq(&call.target));
                if self.calls.len() < before {
                    Admission::Replaced
                } else {
                    Admission::Queued
                }
            }
        };
        self.push(call);
        admission
    }

    /// Appends a call, keeping weight order once any weighted call was seen.
    ///
    /// The buffer is always sorted when a call arrives, so placing the new
    /// call after every record of greater or equal weight is a stable insert.
    pub fn push(&mut self, call: Call) {
        if call.weight.is_weighted() {
            self.weighted = true;
        }
        if self.weighted {
            let at = self.calls.partition_point(|c| c.weight >= call.weight);
            self.calls.insert(at, call);
        } else {
            self.calls.push(call);
        }
    }

    /// Takes every pending call, leaving the queue empty.
    pub fn drain_all(&mut self) -> Vec<Call> {
        mem::take(&mut self.calls)
    }

    /// Discards every pending call without running it. Returns how many
    /// calls were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.calls.len();
        self.calls.clear();
        dropped
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Pending calls in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Call> {
        self.calls.iter()
    }
}
