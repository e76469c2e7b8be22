//! Monthly penalty accrual.
//!
//! Invoked per group on demand (or by an external scheduler). After the due
//! day has passed, every ACTIVE member without a contribution for the month is
//! charged the group penalty, debited the monthly due, and given a FAILED
//! marker row so a second run the same month changes nothing.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult, StoreResult};
use crate::events::{JournalEntry, LedgerEvent};
use crate::model::{ContributionStatus, Group, Member, MemberStatus};
use crate::store::{MissedContribution, Store};
use crate::types::{GroupId, MemberId, Period};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccrualError {
    pub member_id: MemberId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccrualSummary {
    /// Missed-month penalties plus late flags charged by this run.
    pub penalties_applied: usize,
    pub total_amount: u64,
    pub errors: Vec<AccrualError>,
}

/// Run the accrual check for `group_id` as of `today`.
///
/// Only a missing group aborts the call. A failure on one member is recorded
/// in `errors` (and journalled) and the scan moves on.
pub fn run_penalty_check(
    store: &impl Store,
    group_id: GroupId,
    today: NaiveDate,
) -> LedgerResult<(AccrualSummary, Vec<JournalEntry>)> {
    let group = store.group(group_id)?.ok_or(LedgerError::GroupNotFound(group_id))?;
    let mut summary = AccrualSummary::default();
    let mut events = Vec::new();

    if group.terms.penalty_amount == 0 {
        return Ok((summary, events));
    }
    let period = Period::of(today);
    let Some(due) = period.due_date(group.terms.contribution_due_day) else {
        return Ok((summary, events));
    };
    if today <= due {
        return Ok((summary, events));
    }

    for member in store.members(group_id)? {
        if member.status != MemberStatus::Active {
            continue;
        }
        match accrue_member(store, &group, &member, period, due, today) {
            Ok(charged) => {
                for event in charged {
                    if let LedgerEvent::PenaltyAccrued { penalty, .. }
                    | LedgerEvent::ContributionMarkedLate { penalty, .. } = event
                    {
                        summary.penalties_applied += 1;
                        summary.total_amount += penalty;
                    }
                    events.push(JournalEntry::new(today, event));
                }
            }
            Err(e) => {
                let message = e.to_string();
                summary.errors.push(AccrualError { member_id: member.id, message: message.clone() });
                events.push(JournalEntry::new(
                    today,
                    LedgerEvent::AccrualFailed { group_id, member_id: member.id, message },
                ));
            }
        }
    }

    Ok((summary, events))
}

fn accrue_member(
    store: &impl Store,
    group: &Group,
    member: &Member,
    period: Period,
    due: NaiveDate,
    today: NaiveDate,
) -> StoreResult<Vec<LedgerEvent>> {
    let penalty = group.terms.penalty_amount;
    let rows = store.contributions_for(member.id, period)?;

    if !rows.iter().any(|c| c.status.occupies_period()) {
        let notice = format!(
            "Contribution for {:04}-{:02} was not received by {due}. A penalty of {penalty} has been applied.",
            period.year, period.month
        );
        let accrued = store.accrue_missed_contribution(&MissedContribution {
            member_id: member.id,
            period,
            penalty,
            monthly_contribution: group.terms.monthly_contribution,
            on: today,
            notice: &notice,
        })?;
        // `false` means another run got there first.
        return Ok(if accrued {
            vec![LedgerEvent::PenaltyAccrued {
                group_id: group.id,
                member_id: member.id,
                period,
                penalty,
                balance_debit: group.terms.monthly_contribution,
            }]
        } else {
            Vec::new()
        });
    }

    // The month was already charged as missed; a later submission is not charged again.
    if rows.iter().any(|c| c.is_missed_marker()) {
        return Ok(Vec::new());
    }
    let mut events = Vec::new();
    for c in rows
        .iter()
        .filter(|c| c.status == ContributionStatus::Pending && !c.is_late && c.created_on > due)
    {
        if store.flag_late(c.id, penalty)? {
            events.push(LedgerEvent::ContributionMarkedLate {
                contribution_id: c.id,
                member_id: member.id,
                penalty,
            });
        }
    }
    Ok(events)
}
