//! Data access.
//!
//! Every operation takes a `&impl Store` handle built at process start; there
//! is no global connection. Each method is one unit of work: methods that
//! mutate more than one row (accrual, payment posting, settlement) are atomic,
//! and balance/penalty changes are applied as increments against the current
//! row, never as overwrites of a value read earlier.

mod memory;
mod pool;
mod sqlite;

use chrono::NaiveDate;

pub use memory::MemoryStore;
pub use pool::{Pool, PooledConnection};
pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::model::{
    Contribution, Group, GroupTerms, Loan, LoanStatus, Member, MemberStatus, NewContribution,
    NewLoan, NewMember, Notification,
};
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};
use crate::waterfall::Allocation;

/// A missed month to record against one member.
#[derive(Debug, Clone)]
pub struct MissedContribution<'a> {
    pub member_id: MemberId,
    pub period: Period,
    pub penalty: u64,
    pub monthly_contribution: u64,
    pub on: NaiveDate,
    pub notice: &'a str,
}

/// A payment to run through the waterfall and post as a COMPLETED contribution.
#[derive(Debug, Clone, Copy)]
pub struct PaymentPosting {
    pub member_id: MemberId,
    pub amount: u64,
    pub monthly_contribution: u64,
    pub period: Period,
    pub on: NaiveDate,
}

pub trait Store: Send + Sync {
    // ── Groups & members ──────────────────────────────────────────────────────

    fn insert_group(&self, name: &str, terms: &GroupTerms) -> StoreResult<Group>;
    fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Inserts an ACTIVE member unless the user already belongs to the group.
    fn insert_member(&self, new: &NewMember) -> StoreResult<Option<Member>>;
    fn member(&self, id: MemberId) -> StoreResult<Option<Member>>;
    fn member_for(&self, user: UserId, group: GroupId) -> StoreResult<Option<Member>>;
    fn members(&self, group: GroupId) -> StoreResult<Vec<Member>>;
    /// Returns false if the member does not exist.
    fn set_member_status(&self, id: MemberId, status: MemberStatus) -> StoreResult<bool>;

    // ── Contributions ─────────────────────────────────────────────────────────

    fn contribution(&self, id: ContributionId) -> StoreResult<Option<Contribution>>;
    fn contributions_for(&self, member: MemberId, period: Period) -> StoreResult<Vec<Contribution>>;
    fn completed_contributions(&self, member: MemberId) -> StoreResult<Vec<Contribution>>;
    fn insert_contribution(&self, new: &NewContribution) -> StoreResult<Contribution>;

    /// Penalise a missed month: add the penalty, debit the monthly due from
    /// balance, write the FAILED marker and a notification. Returns false
    /// without touching anything if the month already has a PENDING,
    /// COMPLETED or FAILED row.
    fn accrue_missed_contribution(&self, missed: &MissedContribution<'_>) -> StoreResult<bool>;

    /// Flag a PENDING contribution late and charge `penalty` to its member.
    /// Returns false if it is no longer PENDING or is already late.
    fn flag_late(&self, id: ContributionId, penalty: u64) -> StoreResult<bool>;

    /// Allocate against the member's current penalties and post the result.
    /// `None` if the member does not exist.
    fn post_payment(&self, payment: &PaymentPosting) -> StoreResult<Option<(Allocation, Contribution)>>;

    /// Settle a PENDING contribution through the waterfall and mark it
    /// COMPLETED. `None` if it is not PENDING.
    fn settle_contribution(
        &self,
        id: ContributionId,
        monthly_contribution: u64,
    ) -> StoreResult<Option<(Allocation, Contribution)>>;

    /// PENDING → REJECTED. Returns false if it was not PENDING.
    fn reject_contribution(&self, id: ContributionId) -> StoreResult<bool>;

    fn notifications(&self, member: MemberId) -> StoreResult<Vec<Notification>>;

    // ── Loans ─────────────────────────────────────────────────────────────────

    fn loan(&self, id: LoanId) -> StoreResult<Option<Loan>>;
    fn open_loan(&self, user: UserId, group: GroupId) -> StoreResult<Option<Loan>>;
    /// Inserts a PENDING loan unless the pair already has an open one.
    fn insert_loan(&self, new: &NewLoan) -> StoreResult<Option<Loan>>;
    /// Compare-and-set on status. Returns false if the loan is not in `from`.
    fn transition_loan(&self, id: LoanId, from: LoanStatus, to: LoanStatus) -> StoreResult<bool>;
}
