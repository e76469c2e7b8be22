use chrono::NaiveDate;

use crate::contributions::{self, Receipt, Review};
use crate::eligibility::{self, Eligibility};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{Journal, JournalEntry};
use crate::loans::{self, LoanDecision, LoanRequest};
use crate::model::{Contribution, Group, GroupTerms, Loan, LoanStatus, Member, MemberStatus, NewMember};
use crate::penalty::{self, AccrualSummary};
use crate::roles::Role;
use crate::store::Store;
use crate::types::{ContributionId, GroupId, LoanId, MemberId, UserId};

/// A store plus the journal of everything done through it. Every operation
/// goes to the free functions in the domain modules; this only records the
/// events they return.
pub struct Ledger<S: Store> {
    store: S,
    journal: Journal,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S) -> Self {
        Ledger { store, journal: Journal::new() }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn into_journal(self) -> Vec<JournalEntry> {
        self.journal.into_entries()
    }

    fn record<T>(&self, (value, events): (T, Vec<JournalEntry>)) -> T {
        self.journal.extend(events);
        value
    }

    pub fn create_group(&self, name: &str, terms: &GroupTerms) -> LedgerResult<Group> {
        terms.validate()?;
        Ok(self.store.insert_group(name, terms)?)
    }

    pub fn add_member(&self, new: &NewMember) -> LedgerResult<Member> {
        if self.store.group(new.group_id)?.is_none() {
            return Err(LedgerError::GroupNotFound(new.group_id));
        }
        self.store
            .insert_member(new)?
            .ok_or(LedgerError::AlreadyMember { user: new.user_id, group: new.group_id })
    }

    pub fn run_penalty_check(&self, group: GroupId, today: NaiveDate) -> LedgerResult<AccrualSummary> {
        penalty::run_penalty_check(&self.store, group, today).map(|out| self.record(out))
    }

    pub fn record_payment(
        &self,
        member: MemberId,
        amount: u64,
        actor: Role,
        today: NaiveDate,
    ) -> LedgerResult<Receipt> {
        contributions::record_payment(&self.store, member, amount, actor, today).map(|out| self.record(out))
    }

    pub fn submit_contribution(&self, member: MemberId, amount: u64, today: NaiveDate) -> LedgerResult<Contribution> {
        contributions::submit_contribution(&self.store, member, amount, today).map(|out| self.record(out))
    }

    pub fn review_contribution(
        &self,
        id: ContributionId,
        approve: bool,
        actor: Role,
        today: NaiveDate,
    ) -> LedgerResult<Review> {
        contributions::review_contribution(&self.store, id, approve, actor, today).map(|out| self.record(out))
    }

    pub fn set_member_status(
        &self,
        member: MemberId,
        status: MemberStatus,
        actor: Role,
        today: NaiveDate,
    ) -> LedgerResult<Member> {
        contributions::set_member_status(&self.store, member, status, actor, today).map(|out| self.record(out))
    }

    pub fn check_eligibility(&self, user: UserId, group: GroupId) -> LedgerResult<Eligibility> {
        eligibility::evaluate(&self.store, user, group)
    }

    pub fn request_loan(&self, request: &LoanRequest, today: NaiveDate) -> LedgerResult<LoanDecision> {
        loans::request_loan(&self.store, request, today).map(|out| self.record(out))
    }

    pub fn transition_loan(
        &self,
        loan: LoanId,
        next: LoanStatus,
        actor: Role,
        today: NaiveDate,
    ) -> LedgerResult<Loan> {
        loans::transition_loan(&self.store, loan, next, actor, today).map(|out| self.record(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LedgerEvent;
    use crate::model::InterestType;
    use crate::store::MemoryStore;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn terms() -> GroupTerms {
        GroupTerms {
            monthly_contribution: 10_000,
            penalty_amount: 1_000,
            contribution_due_day: 10,
            interest_rate: 5.0,
            loan_interest_type: InterestType::ReducingBalance,
            max_loan_multiplier: 2.0,
            min_loan_amount: 5_000,
            cycle_end_date: Some(day(12, 31)),
        }
    }

    #[test]
    fn invalid_terms_never_reach_the_store() {
        let ledger = Ledger::new(MemoryStore::new());
        let mut t = terms();
        t.contribution_due_day = 40;
        assert!(matches!(ledger.create_group("Bad", &t), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn member_needs_existing_group() {
        let ledger = Ledger::new(MemoryStore::new());
        let err = ledger
            .add_member(&NewMember {
                group_id: GroupId(5),
                user_id: UserId(1),
                name: "x".to_string(),
                role: Role::Member,
                joined_on: day(1, 1),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::GroupNotFound(GroupId(5))));
    }

    #[test]
    fn user_joins_a_group_once() {
        let ledger = Ledger::new(MemoryStore::new());
        let group = ledger.create_group("Circle", &terms()).unwrap();
        let new = NewMember {
            group_id: group.id,
            user_id: UserId(7),
            name: "Baraka".to_string(),
            role: Role::Member,
            joined_on: day(1, 1),
        };
        ledger.add_member(&new).unwrap();
        let err = ledger.add_member(&new).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyMember { user: UserId(7), .. }));
        assert_eq!(ledger.store().members(group.id).unwrap().len(), 1);
    }

    #[test]
    fn journal_records_a_quarter_in_date_order() {
        let ledger = Ledger::new(MemoryStore::new());
        let group = ledger.create_group("Circle", &terms()).unwrap();
        let m = ledger
            .add_member(&NewMember {
                group_id: group.id,
                user_id: UserId(1),
                name: "Neema".to_string(),
                role: Role::Member,
                joined_on: day(1, 1),
            })
            .unwrap();

        ledger.record_payment(m.id, 10_000, Role::Treasurer, day(1, 5)).unwrap();
        ledger.run_penalty_check(group.id, day(1, 11)).unwrap();
        ledger.run_penalty_check(group.id, day(2, 11)).unwrap();
        ledger.record_payment(m.id, 11_000, Role::Treasurer, day(3, 2)).unwrap();
        let c = ledger.submit_contribution(m.id, 10_000, day(4, 3)).unwrap();
        ledger.review_contribution(c.id, true, Role::Treasurer, day(4, 4)).unwrap();

        let eligibility = ledger.check_eligibility(UserId(1), group.id).unwrap();
        assert_eq!(eligibility, Eligibility::Eligible { max_amount: 62_000, total_contributions: 31_000 });

        let decision = ledger
            .request_loan(&LoanRequest { user_id: UserId(1), group_id: group.id, amount: 20_000, months: 6 }, day(4, 5))
            .unwrap();
        let LoanDecision::Submitted(loan) = decision else {
            panic!("loan should be filed");
        };
        ledger.transition_loan(loan.id, LoanStatus::Approved, Role::Treasurer, day(4, 6)).unwrap();

        let entries = ledger.into_journal();
        let dates: Vec<NaiveDate> = entries.iter().map(|e| e.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);

        let accrued = entries.iter().filter(|e| matches!(e.event, LedgerEvent::PenaltyAccrued { .. })).count();
        assert_eq!(accrued, 1, "January was paid; only February is missed");
        assert!(matches!(entries.last().map(|e| &e.event), Some(LedgerEvent::LoanTransitioned { .. })));
    }
}
