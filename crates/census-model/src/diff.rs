//! Relative-set differences for single-citizen patches.
//!
//! When citizen C changes its relatives from `old` to `new`, the other side of
//! every changed link must follow: C is appended to the relatives of each id in
//! `new − old` and removed from the relatives of each id in `old − new`.

use std::collections::BTreeSet;

use crate::citizen::CitizenId;

/// Direction of a symmetric-link edit on the other citizens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelativeOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelativesDiff {
    pub to_add: BTreeSet<CitizenId>,
    pub to_remove: BTreeSet<CitizenId>,
}

impl RelativesDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Every citizen whose relatives change.
    pub fn targets(&self) -> BTreeSet<CitizenId> {
        self.to_add.union(&self.to_remove).copied().collect()
    }

    /// Non-empty edit batches, additions first.
    pub fn operations(&self) -> impl Iterator<Item = (RelativeOp, &BTreeSet<CitizenId>)> {
        [
            (RelativeOp::Add, &self.to_add),
            (RelativeOp::Remove, &self.to_remove),
        ]
        .into_iter()
        .filter(|(_, ids)| !ids.is_empty())
    }
}

pub fn compute_diff(old: &BTreeSet<CitizenId>, new: &BTreeSet<CitizenId>) -> RelativesDiff {
    RelativesDiff {
        to_add: new.difference(old).copied().collect(),
        to_remove: old.difference(new).copied().collect(),
    }
}
