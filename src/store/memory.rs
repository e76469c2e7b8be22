use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{MissedContribution, PaymentPosting, Store};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Contribution, ContributionStatus, Group, GroupTerms, Loan, LoanStatus, Member, MemberStatus,
    NewContribution, NewLoan, NewMember, Notification,
};
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};
use crate::waterfall::{self, Allocation};

#[derive(Default)]
struct Tables {
    groups: BTreeMap<GroupId, Group>,
    members: BTreeMap<MemberId, Member>,
    contributions: BTreeMap<ContributionId, Contribution>,
    loans: BTreeMap<LoanId, Loan>,
    notifications: Vec<Notification>,
    /// Last id handed out per table, so ids run 1, 2, 3… per table as SQLite rowids do.
    last_group: u64,
    last_member: u64,
    last_contribution: u64,
    last_loan: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn insert_contribution(&mut self, new: &NewContribution) -> Contribution {
        let id = ContributionId(next(&mut self.last_contribution));
        let row = Contribution {
            id,
            member_id: new.member_id,
            period: new.period,
            amount: new.amount,
            penalty_applied: new.penalty_applied,
            is_late: false,
            status: new.status,
            created_on: new.created_on,
        };
        self.contributions.insert(id, row.clone());
        row
    }

    fn period_occupied(&self, member: MemberId, period: Period) -> bool {
        self.contributions
            .values()
            .any(|c| c.member_id == member && c.period == period && c.status.occupies_period())
    }
}

/// Mutex-guarded tables. The lock is held for the whole of each method, so
/// every method is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn credit(member: &mut Member, allocation: &Allocation) {
    member.unpaid_penalties = member.unpaid_penalties.saturating_sub(allocation.applied_penalty);
    member.balance += allocation.to_balance as i64;
}

impl Store for MemoryStore {
    fn insert_group(&self, name: &str, terms: &GroupTerms) -> StoreResult<Group> {
        let mut t = self.lock()?;
        let id = GroupId(next(&mut t.last_group));
        let group = Group { id, name: name.to_string(), terms: terms.clone() };
        t.groups.insert(id, group.clone());
        Ok(group)
    }

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        Ok(self.lock()?.groups.get(&id).cloned())
    }

    fn insert_member(&self, new: &NewMember) -> StoreResult<Option<Member>> {
        let mut t = self.lock()?;
        if t.members.values().any(|m| m.group_id == new.group_id && m.user_id == new.user_id) {
            return Ok(None);
        }
        let id = MemberId(next(&mut t.last_member));
        let member = Member {
            id,
            group_id: new.group_id,
            user_id: new.user_id,
            name: new.name.clone(),
            role: new.role,
            status: MemberStatus::Active,
            balance: 0,
            unpaid_penalties: 0,
            joined_on: new.joined_on,
        };
        t.members.insert(id, member.clone());
        Ok(Some(member))
    }

    fn member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        Ok(self.lock()?.members.get(&id).cloned())
    }

    fn member_for(&self, user: UserId, group: GroupId) -> StoreResult<Option<Member>> {
        Ok(self
            .lock()?
            .members
            .values()
            .find(|m| m.user_id == user && m.group_id == group)
            .cloned())
    }

    fn members(&self, group: GroupId) -> StoreResult<Vec<Member>> {
        Ok(self.lock()?.members.values().filter(|m| m.group_id == group).cloned().collect())
    }

    fn set_member_status(&self, id: MemberId, status: MemberStatus) -> StoreResult<bool> {
        let mut t = self.lock()?;
        Ok(match t.members.get_mut(&id) {
            Some(m) => {
                m.status = status;
                true
            }
            None => false,
        })
    }

    fn contribution(&self, id: ContributionId) -> StoreResult<Option<Contribution>> {
        Ok(self.lock()?.contributions.get(&id).cloned())
    }

    fn contributions_for(&self, member: MemberId, period: Period) -> StoreResult<Vec<Contribution>> {
        Ok(self
            .lock()?
            .contributions
            .values()
            .filter(|c| c.member_id == member && c.period == period)
            .cloned()
            .collect())
    }

    fn completed_contributions(&self, member: MemberId) -> StoreResult<Vec<Contribution>> {
        Ok(self
            .lock()?
            .contributions
            .values()
            .filter(|c| c.member_id == member && c.status == ContributionStatus::Completed)
            .cloned()
            .collect())
    }

    fn insert_contribution(&self, new: &NewContribution) -> StoreResult<Contribution> {
        Ok(self.lock()?.insert_contribution(new))
    }

    fn accrue_missed_contribution(&self, missed: &MissedContribution<'_>) -> StoreResult<bool> {
        let mut t = self.lock()?;
        if t.period_occupied(missed.member_id, missed.period) {
            return Ok(false);
        }
        let Some(member) = t.members.get_mut(&missed.member_id) else {
            return Ok(false);
        };
        member.unpaid_penalties += missed.penalty;
        member.balance -= missed.monthly_contribution as i64;

        t.insert_contribution(&NewContribution {
            member_id: missed.member_id,
            period: missed.period,
            amount: 0,
            penalty_applied: missed.penalty,
            status: ContributionStatus::Failed,
            created_on: missed.on,
        });
        t.notifications.push(Notification {
            member_id: missed.member_id,
            date: missed.on,
            message: missed.notice.to_string(),
        });
        Ok(true)
    }

    fn flag_late(&self, id: ContributionId, penalty: u64) -> StoreResult<bool> {
        let mut t = self.lock()?;
        let member_id = match t.contributions.get_mut(&id) {
            Some(c) if c.status == ContributionStatus::Pending && !c.is_late => {
                c.is_late = true;
                c.penalty_applied = penalty;
                c.member_id
            }
            _ => return Ok(false),
        };
        if let Some(member) = t.members.get_mut(&member_id) {
            member.unpaid_penalties += penalty;
        }
        Ok(true)
    }

    fn post_payment(&self, payment: &PaymentPosting) -> StoreResult<Option<(Allocation, Contribution)>> {
        let mut t = self.lock()?;
        let Some(member) = t.members.get_mut(&payment.member_id) else {
            return Ok(None);
        };
        let allocation =
            waterfall::allocate(payment.amount, member.unpaid_penalties, payment.monthly_contribution);
        credit(member, &allocation);

        let row = t.insert_contribution(&NewContribution {
            member_id: payment.member_id,
            period: payment.period,
            amount: payment.amount,
            penalty_applied: allocation.applied_penalty,
            status: ContributionStatus::Completed,
            created_on: payment.on,
        });
        Ok(Some((allocation, row)))
    }

    fn settle_contribution(
        &self,
        id: ContributionId,
        monthly_contribution: u64,
    ) -> StoreResult<Option<(Allocation, Contribution)>> {
        let mut t = self.lock()?;
        let (member_id, amount) = match t.contributions.get(&id) {
            Some(c) if c.status == ContributionStatus::Pending => (c.member_id, c.amount),
            _ => return Ok(None),
        };
        let Some(member) = t.members.get_mut(&member_id) else {
            return Ok(None);
        };
        let allocation = waterfall::allocate(amount, member.unpaid_penalties, monthly_contribution);
        credit(member, &allocation);

        let Some(row) = t.contributions.get_mut(&id) else {
            return Ok(None);
        };
        row.status = ContributionStatus::Completed;
        // A late flag already charged its penalty; keep that figure.
        if !row.is_late {
            row.penalty_applied = allocation.applied_penalty;
        }
        Ok(Some((allocation, row.clone())))
    }

    fn reject_contribution(&self, id: ContributionId) -> StoreResult<bool> {
        let mut t = self.lock()?;
        Ok(match t.contributions.get_mut(&id) {
            Some(c) if c.status == ContributionStatus::Pending => {
                c.status = ContributionStatus::Rejected;
                true
            }
            _ => false,
        })
    }

    fn notifications(&self, member: MemberId) -> StoreResult<Vec<Notification>> {
        Ok(self.lock()?.notifications.iter().filter(|n| n.member_id == member).cloned().collect())
    }

    fn loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        Ok(self.lock()?.loans.get(&id).cloned())
    }

    fn open_loan(&self, user: UserId, group: GroupId) -> StoreResult<Option<Loan>> {
        Ok(self
            .lock()?
            .loans
            .values()
            .find(|l| l.user_id == user && l.group_id == group && l.status.is_open())
            .cloned())
    }

    fn insert_loan(&self, new: &NewLoan) -> StoreResult<Option<Loan>> {
        let mut t = self.lock()?;
        let conflict = t
            .loans
            .values()
            .any(|l| l.user_id == new.user_id && l.group_id == new.group_id && l.status.is_open());
        if conflict {
            return Ok(None);
        }
        let id = LoanId(next(&mut t.last_loan));
        let loan = Loan {
            id,
            user_id: new.user_id,
            group_id: new.group_id,
            amount_requested: new.amount_requested,
            repayment_period_months: new.repayment_period_months,
            interest_rate: new.interest_rate,
            interest_type: new.interest_type,
            monthly_payment: new.monthly_payment,
            total_repayment: new.total_repayment,
            status: LoanStatus::Pending,
            requested_on: new.requested_on,
        };
        t.loans.insert(id, loan.clone());
        Ok(Some(loan))
    }

    fn transition_loan(&self, id: LoanId, from: LoanStatus, to: LoanStatus) -> StoreResult<bool> {
        let mut t = self.lock()?;
        Ok(match t.loans.get_mut(&id) {
            Some(l) if l.status == from => {
                l.status = to;
                true
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn round_trips_groups_and_members() {
        contract::round_trips_groups_and_members(&MemoryStore::new());
    }

    #[test]
    fn accrual_is_idempotent() {
        contract::accrual_is_idempotent(&MemoryStore::new());
    }

    #[test]
    fn accrual_skips_paid_period() {
        contract::accrual_skips_paid_period(&MemoryStore::new());
    }

    #[test]
    fn late_flag_charges_once() {
        contract::late_flag_charges_once(&MemoryStore::new());
    }

    #[test]
    fn payment_runs_waterfall() {
        contract::payment_runs_waterfall(&MemoryStore::new());
    }

    #[test]
    fn settle_and_reject_only_pending() {
        contract::settle_and_reject_only_pending(&MemoryStore::new());
    }

    #[test]
    fn one_membership_per_user() {
        contract::one_membership_per_user(&MemoryStore::new());
    }

    #[test]
    fn one_open_loan_per_pair() {
        contract::one_open_loan_per_pair(&MemoryStore::new());
    }

    #[test]
    fn ids_count_per_table() {
        let store = MemoryStore::new();
        let (group, member) = contract::seed(&store);
        assert_eq!((group.id.0, member.id.0), (1, 1));
    }
}
