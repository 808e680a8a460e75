use std::{iter::Sum, ops::Add};

/// Outcome of `execute`: rows inserted, updated or deleted. DDL and `SELECT`
/// statements affect zero rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MutationResult {
    pub rows_affected: u64,
}

impl Add for MutationResult {
    type Output = MutationResult;

    fn add(self, rhs: Self) -> Self::Output {
        MutationResult {
            rows_affected: self.rows_affected.saturating_add(rhs.rows_affected),
        }
    }
}

impl Sum for MutationResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(MutationResult::default(), Add::add)
    }
}
