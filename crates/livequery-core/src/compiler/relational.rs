//! Relational rendering: disjunctive normal form over typed conditions.

use super::{merge_into, Conjunction, LogicalPredicate};

/// Branches ORed together; each branch ANDs its conditions.
///
/// A single empty branch matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationalPredicate {
    pub branches: Vec<Conjunction>,
}

impl RelationalPredicate {
    pub fn matches_all(&self) -> bool {
        self.branches.is_empty() || self.branches.iter().any(|b| b.is_empty())
    }
}

/// Expand the base conjunction against every OR-group.
///
/// Each alternative of a group is paired with all base conditions, so
/// `base AND (a OR b)` becomes `(base AND a) OR (base AND b)`.
pub(super) fn render(logical: &LogicalPredicate) -> RelationalPredicate {
    let mut branches = vec![logical.base.clone()];

    for group in logical.groups.iter().filter(|g| !g.is_empty()) {
        let mut expanded = Vec::with_capacity(branches.len() * group.len());
        for branch in &branches {
            for alternative in group {
                let mut combined = branch.clone();
                merge_into(&mut combined, alternative);
                expanded.push(combined);
            }
        }
        branches = expanded;
    }

    RelationalPredicate { branches }
}
