use std::fmt;

use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::store::Store;
use crate::types::{GroupId, UserId, to_minor_units};

/// Completed contributions a member needs before borrowing.
pub const MIN_CONTRIBUTION_MONTHS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IneligibleReason {
    ActiveLoanExists,
    InsufficientHistory { completed: usize, required: usize },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::ActiveLoanExists => {
                write!(f, "an active loan already exists for this group")
            }
            IneligibleReason::InsufficientHistory { completed, required } => write!(
                f,
                "insufficient contribution history: {completed} completed, \
                 at least {required} months of contributions required"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Eligibility {
    Eligible { max_amount: u64, total_contributions: u64 },
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }
}

/// Borrowing ceiling: completed contributions times the group multiplier,
/// rounded to whole minor units.
pub fn max_loan_amount(total_contributions: u64, multiplier: f64) -> u64 {
    to_minor_units(total_contributions as f64 * multiplier)
}

/// Can `user` borrow from `group` right now, and how much?
///
/// Rejections are returned as `Ineligible`; errors are reserved for missing
/// records and store failures.
pub fn evaluate(store: &impl Store, user: UserId, group: GroupId) -> LedgerResult<Eligibility> {
    let g = store.group(group)?.ok_or(LedgerError::GroupNotFound(group))?;

    if store.open_loan(user, group)?.is_some() {
        return Ok(Eligibility::Ineligible(IneligibleReason::ActiveLoanExists));
    }

    let member = store.member_for(user, group)?.ok_or(LedgerError::NotAMember { user, group })?;
    let completed = store.completed_contributions(member.id)?;
    if completed.len() < MIN_CONTRIBUTION_MONTHS {
        return Ok(Eligibility::Ineligible(IneligibleReason::InsufficientHistory {
            completed: completed.len(),
            required: MIN_CONTRIBUTION_MONTHS,
        }));
    }

    let total_contributions: u64 = completed.iter().map(|c| c.amount).sum();
    Ok(Eligibility::Eligible {
        max_amount: max_loan_amount(total_contributions, g.terms.max_loan_multiplier),
        total_contributions,
    })
}
