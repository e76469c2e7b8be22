//! Payments, self-reported contributions and member standing.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::events::{JournalEntry, LedgerEvent};
use crate::model::{Contribution, ContributionStatus, Group, Member, MemberStatus, NewContribution};
use crate::roles::{Permission, Role};
use crate::store::{PaymentPosting, Store};
use crate::types::{ContributionId, MemberId, Period};
use crate::waterfall::Allocation;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub allocation: Allocation,
    pub contribution: Contribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Review {
    Settled(Receipt),
    Rejected(Contribution),
}

fn authorise(actor: Role, permission: Permission) -> LedgerResult<()> {
    if actor.can(permission) {
        Ok(())
    } else {
        Err(LedgerError::Forbidden { role: actor, permission })
    }
}

fn member_and_group(store: &impl Store, id: MemberId) -> LedgerResult<(Member, Group)> {
    let member = store.member(id)?.ok_or(LedgerError::MemberNotFound(id))?;
    let group = store.group(member.group_id)?.ok_or(LedgerError::GroupNotFound(member.group_id))?;
    Ok((member, group))
}

fn allocated(date: NaiveDate, receipt: &Receipt) -> JournalEntry {
    JournalEntry::new(
        date,
        LedgerEvent::PaymentAllocated {
            contribution_id: receipt.contribution.id,
            member_id: receipt.contribution.member_id,
            amount: receipt.contribution.amount,
            allocation: receipt.allocation,
        },
    )
}

/// Treasurer records a cash payment for `member_id`. The waterfall runs
/// against the member's penalties as they stand inside the store's unit of
/// work, so concurrent payments each see the other's effect.
pub fn record_payment(
    store: &impl Store,
    member_id: MemberId,
    amount: u64,
    actor: Role,
    today: NaiveDate,
) -> LedgerResult<(Receipt, Vec<JournalEntry>)> {
    authorise(actor, Permission::RecordPayment)?;
    if amount == 0 {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    let (member, group) = member_and_group(store, member_id)?;

    let posted = store.post_payment(&PaymentPosting {
        member_id: member.id,
        amount,
        monthly_contribution: group.terms.monthly_contribution,
        period: Period::of(today),
        on: today,
    })?;
    let (allocation, contribution) = posted.ok_or(LedgerError::MemberNotFound(member_id))?;

    let receipt = Receipt { allocation, contribution };
    let events = vec![allocated(today, &receipt)];
    Ok((receipt, events))
}

/// A member reports a payment made outside the treasurer's hands. It sits
/// PENDING until reviewed, and the accrual check may flag it late.
pub fn submit_contribution(
    store: &impl Store,
    member_id: MemberId,
    amount: u64,
    today: NaiveDate,
) -> LedgerResult<(Contribution, Vec<JournalEntry>)> {
    if amount == 0 {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    let member = store.member(member_id)?.ok_or(LedgerError::MemberNotFound(member_id))?;

    let contribution = store.insert_contribution(&NewContribution {
        member_id: member.id,
        period: Period::of(today),
        amount,
        penalty_applied: 0,
        status: ContributionStatus::Pending,
        created_on: today,
    })?;
    let event = LedgerEvent::ContributionSubmitted {
        contribution_id: contribution.id,
        member_id: member.id,
        period: contribution.period,
        amount,
    };
    Ok((contribution, vec![JournalEntry::new(today, event)]))
}

/// Approve (settle through the waterfall) or reject a PENDING contribution.
pub fn review_contribution(
    store: &impl Store,
    id: ContributionId,
    approve: bool,
    actor: Role,
    today: NaiveDate,
) -> LedgerResult<(Review, Vec<JournalEntry>)> {
    authorise(actor, Permission::ReviewContribution)?;
    let pending = store.contribution(id)?.ok_or(LedgerError::ContributionNotFound(id))?;
    if pending.status != ContributionStatus::Pending {
        return Err(LedgerError::NotPending(id));
    }
    let reviewed = JournalEntry::new(
        today,
        LedgerEvent::ContributionReviewed { contribution_id: id, member_id: pending.member_id, approved: approve },
    );

    if !approve {
        if !store.reject_contribution(id)? {
            return Err(LedgerError::NotPending(id));
        }
        let rejected = Contribution { status: ContributionStatus::Rejected, ..pending };
        return Ok((Review::Rejected(rejected), vec![reviewed]));
    }

    let (_, group) = member_and_group(store, pending.member_id)?;
    let (allocation, contribution) = store
        .settle_contribution(id, group.terms.monthly_contribution)?
        .ok_or(LedgerError::NotPending(id))?;
    let receipt = Receipt { allocation, contribution };
    let events = vec![reviewed, allocated(today, &receipt)];
    Ok((Review::Settled(receipt), events))
}

pub fn set_member_status(
    store: &impl Store,
    member_id: MemberId,
    status: MemberStatus,
    actor: Role,
    today: NaiveDate,
) -> LedgerResult<(Member, Vec<JournalEntry>)> {
    authorise(actor, Permission::ManageMembers)?;
    if !store.set_member_status(member_id, status)? {
        return Err(LedgerError::MemberNotFound(member_id));
    }
    let member = store.member(member_id)?.ok_or(LedgerError::MemberNotFound(member_id))?;
    let event = LedgerEvent::MemberStatusChanged { member_id, status };
    Ok((member, vec![JournalEntry::new(today, event)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupTerms, InterestType, NewMember};
    use crate::penalty::run_penalty_check;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::types::UserId;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn member(store: &impl Store) -> Member {
        let group = store
            .insert_group(
                "Circle",
                &GroupTerms {
                    monthly_contribution: 10_000,
                    penalty_amount: 5_000,
                    contribution_due_day: 10,
                    interest_rate: 10.0,
                    loan_interest_type: InterestType::FlatRate,
                    max_loan_multiplier: 3.0,
                    min_loan_amount: 1_000,
                    cycle_end_date: None,
                },
            )
            .unwrap();
        store
            .insert_member(&NewMember {
                group_id: group.id,
                user_id: UserId(1),
                name: "Zawadi".to_string(),
                role: Role::Member,
                joined_on: day(1, 1),
            })
            .unwrap()
            .unwrap()
    }

    // ── record_payment ────────────────────────────────────────────────────────

    #[test]
    fn payment_clears_penalty_before_due() {
        let store = MemoryStore::new();
        let m = member(&store);
        run_penalty_check(&store, m.group_id, day(2, 11)).unwrap();

        let (receipt, events) = record_payment(&store, m.id, 15_000, Role::Treasurer, day(3, 1)).unwrap();
        assert_eq!(receipt.allocation.applied_penalty, 5_000);
        assert_eq!(receipt.allocation.applied_fee, 10_000);
        assert_eq!(receipt.allocation.to_balance, 0);
        assert_eq!(receipt.contribution.period, Period { year: 2025, month: 3 });
        assert_eq!(events.len(), 1);

        let after = store.member(m.id).unwrap().unwrap();
        assert_eq!(after.unpaid_penalties, 0);
        assert_eq!(after.balance, -10_000);
    }

    #[test]
    fn overpayment_credits_balance() {
        let store = MemoryStore::new();
        let m = member(&store);
        run_penalty_check(&store, m.group_id, day(2, 11)).unwrap();
        let (receipt, _) = record_payment(&store, m.id, 25_000, Role::Treasurer, day(3, 1)).unwrap();
        assert_eq!(receipt.allocation.to_balance, 10_000);
        assert_eq!(store.member(m.id).unwrap().unwrap().balance, 0);
    }

    #[test]
    fn payment_needs_treasurer_and_positive_amount() {
        let store = MemoryStore::new();
        let m = member(&store);
        assert!(matches!(
            record_payment(&store, m.id, 10_000, Role::Secretary, day(3, 1)),
            Err(LedgerError::Forbidden { permission: Permission::RecordPayment, .. })
        ));
        assert!(matches!(
            record_payment(&store, m.id, 0, Role::Treasurer, day(3, 1)),
            Err(LedgerError::Validation(ValidationError::NonPositiveAmount))
        ));
        assert!(matches!(
            record_payment(&store, MemberId(999), 10, Role::Admin, day(3, 1)),
            Err(LedgerError::MemberNotFound(MemberId(999)))
        ));
        // Nothing was posted by the refused calls.
        assert!(store.completed_contributions(m.id).unwrap().is_empty());
    }

    #[test]
    fn concurrent_payments_serialize_on_both_stores() {
        fn run(store: &impl Store) {
            let m = member(store);
            for month in 1..=4 {
                run_penalty_check(store, m.group_id, day(month, 11)).unwrap();
            }
            std::thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| record_payment(store, m.id, 15_000, Role::Treasurer, day(5, 1)).unwrap());
                }
            });
            let after = store.member(m.id).unwrap().unwrap();
            assert_eq!(after.unpaid_penalties, 0);
            assert_eq!(after.balance, -40_000);
        }
        run(&MemoryStore::new());
        run(&SqliteStore::in_memory().unwrap());
    }

    // ── submit / review ───────────────────────────────────────────────────────

    #[test]
    fn approved_submission_settles_through_waterfall() {
        let store = MemoryStore::new();
        let m = member(&store);
        let (c, _) = submit_contribution(&store, m.id, 12_000, day(3, 4)).unwrap();
        assert_eq!(c.status, ContributionStatus::Pending);

        let (review, events) = review_contribution(&store, c.id, true, Role::Treasurer, day(3, 6)).unwrap();
        let Review::Settled(receipt) = review else {
            panic!("expected settlement");
        };
        assert_eq!(receipt.allocation.applied_fee, 10_000);
        assert_eq!(receipt.allocation.to_balance, 2_000);
        assert_eq!(receipt.contribution.status, ContributionStatus::Completed);
        assert_eq!(events.len(), 2);
        assert_eq!(store.member(m.id).unwrap().unwrap().balance, 2_000);
    }

    #[test]
    fn late_submission_keeps_its_penalty_when_settled() {
        let store = MemoryStore::new();
        let m = member(&store);
        let (c, _) = submit_contribution(&store, m.id, 15_000, day(3, 12)).unwrap();
        run_penalty_check(&store, m.group_id, day(3, 13)).unwrap();
        assert_eq!(store.member(m.id).unwrap().unwrap().unpaid_penalties, 5_000);

        let (review, _) = review_contribution(&store, c.id, true, Role::Treasurer, day(3, 14)).unwrap();
        let Review::Settled(receipt) = review else {
            panic!("expected settlement");
        };
        assert_eq!(receipt.allocation.applied_penalty, 5_000);
        assert!(receipt.contribution.is_late);
        assert_eq!(receipt.contribution.penalty_applied, 5_000);
        assert_eq!(store.member(m.id).unwrap().unwrap().unpaid_penalties, 0);
    }

    #[test]
    fn rejected_submission_leaves_balances_alone() {
        let store = MemoryStore::new();
        let m = member(&store);
        let (c, _) = submit_contribution(&store, m.id, 10_000, day(3, 4)).unwrap();
        let (review, _) = review_contribution(&store, c.id, false, Role::Admin, day(3, 5)).unwrap();
        assert!(matches!(review, Review::Rejected(ref r) if r.status == ContributionStatus::Rejected));
        assert_eq!(store.member(m.id).unwrap().unwrap().balance, 0);

        assert!(matches!(
            review_contribution(&store, c.id, true, Role::Admin, day(3, 6)),
            Err(LedgerError::NotPending(_))
        ));
    }

    #[test]
    fn review_needs_treasurer() {
        let store = MemoryStore::new();
        let m = member(&store);
        let (c, _) = submit_contribution(&store, m.id, 10_000, day(3, 4)).unwrap();
        assert!(matches!(
            review_contribution(&store, c.id, true, Role::Member, day(3, 5)),
            Err(LedgerError::Forbidden { .. })
        ));
        assert!(matches!(
            review_contribution(&store, ContributionId(999), true, Role::Treasurer, day(3, 5)),
            Err(LedgerError::ContributionNotFound(_))
        ));
    }

    // ── set_member_status ─────────────────────────────────────────────────────

    #[test]
    fn secretary_suspends_member() {
        let store = MemoryStore::new();
        let m = member(&store);
        let (updated, events) =
            set_member_status(&store, m.id, MemberStatus::Suspended, Role::Secretary, day(3, 1)).unwrap();
        assert_eq!(updated.status, MemberStatus::Suspended);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            set_member_status(&store, m.id, MemberStatus::Active, Role::Member, day(3, 2)),
            Err(LedgerError::Forbidden { .. })
        ));
    }
}
