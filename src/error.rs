use thiserror::Error;

use crate::model::LoanStatus;
use crate::roles::{Permission, Role};
use crate::types::{ContributionId, GroupId, LoanId, MemberId, UserId};

/// Input rejected before any mutation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("interest rate {0}% is outside 0..=100")]
    RateOutOfRange(f64),
    #[error("repayment term must cover at least one period")]
    ZeroTerm,
    #[error("repayment term {months} months is outside 1..={max}")]
    TermOutOfRange { months: u32, max: u32 },
    #[error("contribution due day {0} is outside 1..=31")]
    DueDayOutOfRange(u32),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no connection available within {0} ms")]
    PoolTimeout(u64),
    #[error("store poisoned by a panicked writer")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("group {0:?} not found")]
    GroupNotFound(GroupId),
    #[error("member {0:?} not found")]
    MemberNotFound(MemberId),
    #[error("user {user:?} is not a member of group {group:?}")]
    NotAMember { user: UserId, group: GroupId },
    #[error("user {user:?} is already a member of group {group:?}")]
    AlreadyMember { user: UserId, group: GroupId },
    #[error("loan {0:?} not found")]
    LoanNotFound(LoanId),
    #[error("contribution {0:?} not found")]
    ContributionNotFound(ContributionId),
    #[error("role {role:?} lacks permission {permission:?}")]
    Forbidden { role: Role, permission: Permission },
    #[error("loan cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },
    #[error("contribution {0:?} is not awaiting review")]
    NotPending(ContributionId),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
pub type StoreResult<T> = Result<T, StoreError>;
