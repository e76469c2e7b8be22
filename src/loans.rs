//! Loan requests and the review/repayment lifecycle.

use std::fmt;

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::amortization::{self, Installment};
use crate::eligibility::{self, Eligibility, IneligibleReason};
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::events::{JournalEntry, LedgerEvent};
use crate::model::{Loan, LoanStatus, NewLoan};
use crate::roles::{Permission, Role};
use crate::store::Store;
use crate::types::{GroupId, LoanId, UserId, to_minor_units};

/// Longest repayment term any group may offer.
pub const MAX_REPAYMENT_MONTHS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanRequest {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub amount: u64,
    pub months: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoanRejection {
    Ineligible(IneligibleReason),
    BelowMinimum { amount: u64, minimum: u64 },
    AboveMaximum { amount: u64, maximum: u64 },
    ExceedsCycleEnd { repaid_by: Option<NaiveDate>, cycle_end: NaiveDate },
}

impl fmt::Display for LoanRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoanRejection::Ineligible(reason) => write!(f, "{reason}"),
            LoanRejection::BelowMinimum { amount, minimum } => {
                write!(f, "requested {amount} is below the group minimum of {minimum}")
            }
            LoanRejection::AboveMaximum { amount, maximum } => {
                write!(f, "requested {amount} exceeds the eligible maximum of {maximum}")
            }
            LoanRejection::ExceedsCycleEnd { cycle_end, .. } => {
                write!(f, "repayment would run past the cycle end on {cycle_end}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoanDecision {
    Submitted(Loan),
    Rejected(LoanRejection),
}

/// Validate, check eligibility and the group's limits, then file a PENDING
/// loan carrying the quoted repayment figures.
pub fn request_loan(
    store: &impl Store,
    request: &LoanRequest,
    today: NaiveDate,
) -> LedgerResult<(LoanDecision, Vec<JournalEntry>)> {
    if request.amount == 0 {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    if !(1..=MAX_REPAYMENT_MONTHS).contains(&request.months) {
        return Err(ValidationError::TermOutOfRange {
            months: request.months,
            max: MAX_REPAYMENT_MONTHS,
        }
        .into());
    }

    let group = store.group(request.group_id)?.ok_or(LedgerError::GroupNotFound(request.group_id))?;
    let terms = &group.terms;

    let rejection = match eligibility::evaluate(store, request.user_id, request.group_id)? {
        Eligibility::Ineligible(reason) => Some(LoanRejection::Ineligible(reason)),
        Eligibility::Eligible { max_amount, .. } => {
            check_limits(request, today, terms.min_loan_amount, max_amount, terms.cycle_end_date)
        }
    };
    if let Some(reason) = rejection {
        return Ok(reject(request, reason, today));
    }

    let quote =
        amortization::quote(request.amount, terms.interest_rate, request.months, terms.loan_interest_type)?;
    let new = NewLoan {
        user_id: request.user_id,
        group_id: request.group_id,
        amount_requested: request.amount,
        repayment_period_months: request.months,
        interest_rate: terms.interest_rate,
        interest_type: terms.loan_interest_type,
        monthly_payment: to_minor_units(quote.monthly_payment),
        total_repayment: to_minor_units(quote.total_repayment),
        requested_on: today,
    };

    // A concurrent request can win the slot between the eligibility read and here.
    let Some(loan) = store.insert_loan(&new)? else {
        return Ok(reject(request, LoanRejection::Ineligible(IneligibleReason::ActiveLoanExists), today));
    };

    let event = LedgerEvent::LoanRequested {
        loan_id: loan.id,
        user_id: loan.user_id,
        group_id: loan.group_id,
        amount: loan.amount_requested,
        months: loan.repayment_period_months,
        monthly_payment: loan.monthly_payment,
        total_repayment: loan.total_repayment,
    };
    Ok((LoanDecision::Submitted(loan), vec![JournalEntry::new(today, event)]))
}

fn check_limits(
    request: &LoanRequest,
    today: NaiveDate,
    minimum: u64,
    maximum: u64,
    cycle_end: Option<NaiveDate>,
) -> Option<LoanRejection> {
    if request.amount < minimum {
        return Some(LoanRejection::BelowMinimum { amount: request.amount, minimum });
    }
    if request.amount > maximum {
        return Some(LoanRejection::AboveMaximum { amount: request.amount, maximum });
    }
    let cycle_end = cycle_end?;
    let repaid_by = today.checked_add_months(Months::new(request.months));
    match repaid_by {
        Some(d) if d <= cycle_end => None,
        _ => Some(LoanRejection::ExceedsCycleEnd { repaid_by, cycle_end }),
    }
}

fn reject(request: &LoanRequest, reason: LoanRejection, today: NaiveDate) -> (LoanDecision, Vec<JournalEntry>) {
    let event = LedgerEvent::LoanRejected {
        user_id: request.user_id,
        group_id: request.group_id,
        amount: request.amount,
        reason: reason.clone(),
    };
    (LoanDecision::Rejected(reason), vec![JournalEntry::new(today, event)])
}

/// Permission needed to move a loan into `next`. `None` for PENDING, which
/// nothing transitions into.
fn required_permission(next: LoanStatus) -> Option<Permission> {
    match next {
        LoanStatus::Pending => None,
        LoanStatus::Approved | LoanStatus::Rejected => Some(Permission::ReviewLoan),
        LoanStatus::Active => Some(Permission::DisburseLoan),
        LoanStatus::Completed => Some(Permission::CloseLoan),
        LoanStatus::Defaulted => Some(Permission::DefaultLoan),
    }
}

/// Move a loan along its lifecycle on behalf of `actor`.
pub fn transition_loan(
    store: &impl Store,
    loan_id: LoanId,
    next: LoanStatus,
    actor: Role,
    today: NaiveDate,
) -> LedgerResult<(Loan, Vec<JournalEntry>)> {
    let loan = store.loan(loan_id)?.ok_or(LedgerError::LoanNotFound(loan_id))?;
    let from = loan.status;

    let Some(permission) = required_permission(next) else {
        return Err(LedgerError::InvalidTransition { from, to: next });
    };
    if !actor.can(permission) {
        return Err(LedgerError::Forbidden { role: actor, permission });
    }
    if !from.can_transition_to(next) {
        return Err(LedgerError::InvalidTransition { from, to: next });
    }
    if !store.transition_loan(loan_id, from, next)? {
        // Someone else moved it first; report against what it is now.
        let now = store.loan(loan_id)?.map_or(from, |l| l.status);
        return Err(LedgerError::InvalidTransition { from: now, to: next });
    }

    let event = LedgerEvent::LoanTransitioned { loan_id, from, to: next };
    Ok((Loan { status: next, ..loan }, vec![JournalEntry::new(today, event)]))
}

/// Repayment schedule for a filed loan at the terms it was quoted on.
pub fn repayment_schedule(loan: &Loan) -> Result<Vec<Installment>, ValidationError> {
    amortization::schedule(
        loan.amount_requested,
        loan.interest_rate,
        loan.repayment_period_months,
        loan.interest_type,
    )
}
