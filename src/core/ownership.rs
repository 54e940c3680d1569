//! Correlation between child jobs and the schedule objects that own them.
//!
//! Children point at their parent through a controller-marked
//! [`OwnerReference`](super::object::OwnerReference); parents never hold a
//! list of children. Grouping builds the parent-to-children index on demand.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::object::ChildJob;
use super::types::Uid;

/// Uid of the controlling owner of `child`.
///
/// Returns `None` when the child has no owner reference, only
/// non-controller references, or controller references naming different
/// owners. Such children are foreign to the controller, not errors.
pub fn parent_uid_of(child: &ChildJob) -> Option<&Uid> {
    let mut controllers = child.owner_references.iter().filter(|r| r.controller);
    let first = controllers.next()?;
    if controllers.any(|r| r.uid != first.uid) {
        return None;
    }
    Some(&first.uid)
}

/// Group children by controlling owner, preserving input order per group.
pub fn group_by_parent(children: impl IntoIterator<Item = ChildJob>) -> HashMap<Uid, Vec<ChildJob>> {
    let mut groups: HashMap<Uid, Vec<ChildJob>> = HashMap::new();
    for child in children {
        let Some(parent) = parent_uid_of(&child).cloned() else {
            continue;
        };
        groups.entry(parent).or_default().push(child);
    }
    groups
}

/// Order by start time ascending; children without a start time go last,
/// ties are broken by name.
pub fn compare_start_time(a: &ChildJob, b: &ChildJob) -> Ordering {
    match (a.start_time, b.start_time) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.key.name.cmp(&b.key.name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.key.name.cmp(&b.key.name),
    }
}

/// Stable sort by [`compare_start_time`].
pub fn sort_by_start_time(children: &mut [ChildJob]) {
    children.sort_by(compare_start_time);
}
