//! Add/remove change sets over list-valued attributes.
//!
//! A [`ChangeSet`] is the net effect of one or more requests against a list
//! such as a message's flags. Change sets are only ever produced by
//! [`compute_effective_change`] and combined by [`merge_change_sets`], which
//! keeps `add` and `remove` disjoint and normalizes empty lists to `None`.
//!
//! Element equality is value equality. Ordering inside `add`/`remove` carries
//! no meaning for correctness.

use serde::{Deserialize, Serialize};

/// Normalized `{ add, remove }` change to a list-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet<T> {
    /// Elements to add, `None` when there are none.
    pub add: Option<Vec<T>>,
    /// Elements to remove, `None` when there are none.
    pub remove: Option<Vec<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> ChangeSet<T> {
    /// Creates a change set, normalizing empty lists to `None`.
    #[must_use]
    pub fn new(add: Vec<T>, remove: Vec<T>) -> Self {
        Self {
            add: non_empty(add),
            remove: non_empty(remove),
        }
    }

    /// A change set that changes nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            add: None,
            remove: None,
        }
    }

    /// Returns true if applying this change set would be a no-op.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.add.is_none() && self.remove.is_none()
    }

    /// Elements being added.
    #[must_use]
    pub fn added(&self) -> &[T] {
        self.add.as_deref().unwrap_or_default()
    }

    /// Elements being removed.
    #[must_use]
    pub fn removed(&self) -> &[T] {
        self.remove.as_deref().unwrap_or_default()
    }
}

impl<T: Clone> ChangeSet<T> {
    /// The change set that exactly undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            add: self.remove.clone(),
            remove: self.add.clone(),
        }
    }
}

fn non_empty<T>(list: Vec<T>) -> Option<Vec<T>> {
    if list.is_empty() { None } else { Some(list) }
}

/// Applies a requested add/remove to `values` and returns what actually changed.
///
/// Adding an element that is already present, or removing one that is absent,
/// is a no-op and does not show up in the result. An element both added and
/// removed by the same call nets out to nothing.
pub fn compute_effective_change<T: Clone + PartialEq>(
    values: &mut Vec<T>,
    to_add: Option<&[T]>,
    to_remove: Option<&[T]>,
) -> ChangeSet<T> {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for addend in to_add.unwrap_or_default() {
        if !values.contains(addend) {
            values.push(addend.clone());
            added.push(addend.clone());
        }
    }

    for subtrahend in to_remove.unwrap_or_default() {
        if values.contains(subtrahend) {
            values.retain(|value| value != subtrahend);
            if let Some(index) = added.iter().position(|a| a == subtrahend) {
                added.remove(index);
            } else {
                removed.push(subtrahend.clone());
            }
        }
    }

    ChangeSet::new(added, removed)
}

/// Replays a previously computed change set onto `values`.
///
/// Used to project pending intent onto a snapshot that may differ from the
/// list the change set was computed against.
pub fn apply_change_set<T: Clone + PartialEq>(values: &mut Vec<T>, changes: &ChangeSet<T>) {
    for addend in changes.added() {
        if !values.contains(addend) {
            values.push(addend.clone());
        }
    }
    for subtrahend in changes.removed() {
        values.retain(|value| value != subtrahend);
    }
}

/// Merges `incoming` into `existing`, cancelling opposing manipulations.
///
/// An element removed by `incoming` that `existing` adds annihilates on both
/// sides, and symmetrically for additions against pending removals. When both
/// change sets are effective changes (as produced by
/// [`compute_effective_change`] against the list they were applied to in
/// order), applying the result once equals applying `existing` then `incoming`.
#[must_use]
pub fn merge_change_sets<T: Clone + PartialEq>(
    existing: &ChangeSet<T>,
    incoming: &ChangeSet<T>,
) -> ChangeSet<T> {
    let mut pending_add = incoming.added().to_vec();
    let mut pending_remove = incoming.removed().to_vec();

    let mut add = Vec::new();
    for item in existing.added() {
        if let Some(index) = pending_remove.iter().position(|r| r == item) {
            pending_remove.remove(index);
        } else {
            add.push(item.clone());
        }
    }

    let mut remove = Vec::new();
    for item in existing.removed() {
        if let Some(index) = pending_add.iter().position(|a| a == item) {
            pending_add.remove(index);
        } else {
            remove.push(item.clone());
        }
    }

    for item in pending_add {
        if !add.contains(&item) {
            add.push(item);
        }
    }
    for item in pending_remove {
        if !remove.contains(&item) {
            remove.push(item);
        }
    }

    ChangeSet::new(add, remove)
}
