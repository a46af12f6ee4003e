//! Argument comparison used for call deduplication.

use crate::value::Arg;

/// Returns `true` when two argument snapshots describe different calls.
///
/// Snapshots of different length always differ. Otherwise they are compared
/// position by position with [`Arg`]'s strict equality, so objects and
/// functions must be the very same instance to match.
#[must_use]
pub fn args_differ(left: &[Arg], right: &[Arg]) -> bool {
    left.len() != right.len() || left.iter().zip(right).any(|(l, r)| l != r)
}
