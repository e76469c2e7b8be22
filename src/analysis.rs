use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::events::{JournalEntry, LedgerEvent};
use crate::model::{LoanStatus, MemberStatus};
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};

/// Per-month aggregates derived from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthStats {
    pub period: Period,
    /// Sum of allocated payments (minor units).
    pub collected: u64,
    /// Penalties charged: missed months plus late flags.
    pub penalties_charged: u64,
    /// Part of collected payments that went to penalties.
    pub penalties_recovered: u64,
    /// Part of collected payments credited to balance as over-payment.
    pub overpaid: u64,
    pub missed_count: u32,
    pub late_count: u32,
    /// Payments that fell short of the monthly due with no penalty outstanding.
    pub partial_count: u32,
    pub loans_requested: u32,
    /// Refused at request time or rejected on review.
    pub loans_rejected: u32,
    pub loans_disbursed: u32,
    pub principal_disbursed: u64,
    pub loans_completed: u32,
    pub defaults: u32,
    pub suspensions: u32,
    pub accrual_errors: u32,
}

impl MonthStats {
    fn zero(period: Period) -> Self {
        Self {
            period,
            collected: 0,
            penalties_charged: 0,
            penalties_recovered: 0,
            overpaid: 0,
            missed_count: 0,
            late_count: 0,
            partial_count: 0,
            loans_requested: 0,
            loans_rejected: 0,
            loans_disbursed: 0,
            principal_disbursed: 0,
            loans_completed: 0,
            defaults: 0,
            suspensions: 0,
            accrual_errors: 0,
        }
    }

    /// Penalties recovered / penalties charged in the month. Zero if nothing was charged.
    pub fn recovery_rate(&self) -> f64 {
        if self.penalties_charged == 0 {
            0.0
        } else {
            self.penalties_recovered as f64 / self.penalties_charged as f64
        }
    }

    /// Collected / expected, where expected is the monthly due times the member count.
    pub fn collection_rate(&self, expected: u64) -> f64 {
        if expected == 0 { 0.0 } else { self.collected as f64 / expected as f64 }
    }
}

/// Distribution statistics for a continuous metric across N runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Distribution statistics for a sparse integer count (p50 + max are enough).
#[derive(Debug, Clone, PartialEq)]
pub struct CountDist {
    pub n: usize,
    pub p50: u32,
    pub max: u32,
    pub mean: f64,
}

/// Cross-run distribution of one month's key figures.
#[derive(Debug, Clone)]
pub struct MonthDist {
    pub period: Period,
    pub collected: DistStats,
    pub penalties_charged: DistStats,
    pub recovery_rate: DistStats,
    pub missed: CountDist,
    pub late: CountDist,
    pub disbursed: CountDist,
    pub defaults: CountDist,
}

fn percentile_stats(values: &mut [f64]) -> Option<DistStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();

    let interp = |p: f64| -> f64 {
        let h = p * (n - 1) as f64;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    };

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };

    Some(DistStats {
        n,
        min: values[0],
        p5: interp(0.05),
        p25: interp(0.25),
        p50: interp(0.50),
        p75: interp(0.75),
        p95: interp(0.95),
        max: values[n - 1],
        mean,
        std_dev: variance.sqrt(),
    })
}

fn count_dist(values: &mut [u32]) -> Option<CountDist> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let n = values.len();
    let mean = values.iter().map(|&x| x as f64).sum::<f64>() / n as f64;

    let h = 0.5 * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    let p50 = (values[lo] as f64 * (1.0 - frac) + values[hi] as f64 * frac).round() as u32;

    Some(CountDist { n, p50, max: values[n - 1], mean })
}

/// Fold a journal into per-month statistics, sorted by period.
pub fn analyse(entries: &[JournalEntry]) -> Vec<MonthStats> {
    let mut stats: BTreeMap<Period, MonthStats> = BTreeMap::new();
    let mut principal: HashMap<LoanId, u64> = HashMap::new();

    for entry in entries {
        let period = Period::of(entry.date);
        let s = stats.entry(period).or_insert_with(|| MonthStats::zero(period));

        match &entry.event {
            LedgerEvent::PaymentAllocated { amount, allocation, .. } => {
                s.collected += amount;
                s.penalties_recovered += allocation.applied_penalty;
                s.overpaid += allocation.to_balance;
                if allocation.is_partial {
                    s.partial_count += 1;
                }
            }
            LedgerEvent::PenaltyAccrued { penalty, .. } => {
                s.penalties_charged += penalty;
                s.missed_count += 1;
            }
            LedgerEvent::ContributionMarkedLate { penalty, .. } => {
                s.penalties_charged += penalty;
                s.late_count += 1;
            }
            LedgerEvent::LoanRequested { loan_id, amount, .. } => {
                principal.insert(*loan_id, *amount);
                s.loans_requested += 1;
            }
            LedgerEvent::LoanRejected { .. } => {
                s.loans_requested += 1;
                s.loans_rejected += 1;
            }
            LedgerEvent::LoanTransitioned { loan_id, to, .. } => match to {
                LoanStatus::Rejected => s.loans_rejected += 1,
                LoanStatus::Active => {
                    s.loans_disbursed += 1;
                    s.principal_disbursed += principal.get(loan_id).copied().unwrap_or(0);
                }
                LoanStatus::Completed => s.loans_completed += 1,
                LoanStatus::Defaulted => s.defaults += 1,
                LoanStatus::Pending | LoanStatus::Approved => {}
            },
            LedgerEvent::MemberStatusChanged { status: MemberStatus::Suspended, .. } => {
                s.suspensions += 1;
            }
            LedgerEvent::AccrualFailed { .. } => s.accrual_errors += 1,
            _ => {}
        }
    }

    stats.into_values().collect()
}

/// Per-month cross-run distributions. Months present in fewer than 2 runs are
/// skipped. Sorted by period.
pub fn analyse_distributions(all_runs: &[Vec<MonthStats>]) -> Vec<MonthDist> {
    let all_periods: BTreeSet<Period> =
        all_runs.iter().flat_map(|run| run.iter().map(|s| s.period)).collect();

    let mut result = Vec::new();

    for period in all_periods {
        let month: Vec<&MonthStats> =
            all_runs.iter().filter_map(|run| run.iter().find(|s| s.period == period)).collect();
        if month.len() < 2 {
            continue;
        }

        let continuous = |f: fn(&MonthStats) -> f64| {
            let mut vals: Vec<f64> = month.iter().map(|s| f(s)).collect();
            percentile_stats(&mut vals)
        };
        let counts = |f: fn(&MonthStats) -> u32| {
            let mut vals: Vec<u32> = month.iter().map(|s| f(s)).collect();
            count_dist(&mut vals)
        };

        let (
            Some(collected),
            Some(penalties_charged),
            Some(recovery_rate),
            Some(missed),
            Some(late),
            Some(disbursed),
            Some(defaults),
        ) = (
            continuous(|s| s.collected as f64),
            continuous(|s| s.penalties_charged as f64),
            continuous(MonthStats::recovery_rate),
            counts(|s| s.missed_count),
            counts(|s| s.late_count),
            counts(|s| s.loans_disbursed),
            counts(|s| s.defaults),
        )
        else {
            continue;
        };

        result.push(MonthDist {
            period,
            collected,
            penalties_charged,
            recovery_rate,
            missed,
            late,
            disbursed,
            defaults,
        });
    }

    result
}

/// A ledger invariant broken somewhere in a journal.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerViolation {
    /// applied_penalty + applied_fee + to_balance != amount.
    AllocationNotConserved { contribution_id: ContributionId, amount: u64, allocated: u64 },
    /// Same member penalised twice for the same month.
    DuplicateAccrual { member_id: MemberId, period: Period },
    /// A month charged as missed was also charged a late flag.
    LateAfterMissed { member_id: MemberId, period: Period },
    /// Transition from a status the loan was not in, or along an edge the lifecycle forbids.
    IllegalLoanTransition { loan_id: LoanId, from: LoanStatus, to: LoanStatus },
    /// Transition for a loan never requested in this journal.
    TransitionWithoutRequest { loan_id: LoanId },
    /// A loan was filed while the same user already had an open one in the group.
    OverlappingOpenLoans { user_id: UserId, group_id: GroupId, loan_id: LoanId },
}

impl std::fmt::Display for LedgerViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllocationNotConserved { contribution_id, amount, allocated } => {
                write!(f, "AllocationNotConserved contribution={}: amount={amount} allocated={allocated}", contribution_id.0)
            }
            Self::DuplicateAccrual { member_id, period } => {
                write!(f, "DuplicateAccrual member={} period={}-{:02}", member_id.0, period.year, period.month)
            }
            Self::LateAfterMissed { member_id, period } => {
                write!(f, "LateAfterMissed member={} period={}-{:02}", member_id.0, period.year, period.month)
            }
            Self::IllegalLoanTransition { loan_id, from, to } => {
                write!(f, "IllegalLoanTransition loan={}: {} -> {}", loan_id.0, from.as_str(), to.as_str())
            }
            Self::TransitionWithoutRequest { loan_id } => {
                write!(f, "TransitionWithoutRequest loan={}", loan_id.0)
            }
            Self::OverlappingOpenLoans { user_id, group_id, loan_id } => {
                write!(f, "OverlappingOpenLoans user={} group={} loan={}", user_id.0, group_id.0, loan_id.0)
            }
        }
    }
}

/// Check the journal-level ledger invariants. Returns one item per violation.
pub fn verify_ledger(entries: &[JournalEntry]) -> Vec<LedgerViolation> {
    let mut violations = Vec::new();

    let mut accrued: HashSet<(MemberId, Period)> = HashSet::new();
    let mut flagged_late: Vec<(MemberId, Period)> = Vec::new();
    let mut loan_status: HashMap<LoanId, (UserId, GroupId, LoanStatus)> = HashMap::new();

    for entry in entries {
        match &entry.event {
            LedgerEvent::PaymentAllocated { contribution_id, amount, allocation, .. } => {
                let allocated = allocation.applied_penalty + allocation.applied_fee + allocation.to_balance;
                if allocated != *amount {
                    violations.push(LedgerViolation::AllocationNotConserved {
                        contribution_id: *contribution_id,
                        amount: *amount,
                        allocated,
                    });
                }
            }
            LedgerEvent::PenaltyAccrued { member_id, period, .. } => {
                if !accrued.insert((*member_id, *period)) {
                    violations.push(LedgerViolation::DuplicateAccrual { member_id: *member_id, period: *period });
                }
            }
            LedgerEvent::ContributionMarkedLate { member_id, .. } => {
                flagged_late.push((*member_id, Period::of(entry.date)));
            }
            LedgerEvent::LoanRequested { loan_id, user_id, group_id, .. } => {
                let overlapping = loan_status
                    .values()
                    .any(|(u, g, status)| u == user_id && g == group_id && status.is_open());
                if overlapping {
                    violations.push(LedgerViolation::OverlappingOpenLoans {
                        user_id: *user_id,
                        group_id: *group_id,
                        loan_id: *loan_id,
                    });
                }
                loan_status.insert(*loan_id, (*user_id, *group_id, LoanStatus::Pending));
            }
            LedgerEvent::LoanTransitioned { loan_id, from, to } => match loan_status.get_mut(loan_id) {
                None => violations.push(LedgerViolation::TransitionWithoutRequest { loan_id: *loan_id }),
                Some((_, _, status)) => {
                    if *status != *from || !from.can_transition_to(*to) {
                        violations.push(LedgerViolation::IllegalLoanTransition {
                            loan_id: *loan_id,
                            from: *status,
                            to: *to,
                        });
                    }
                    *status = *to;
                }
            },
            _ => {}
        }
    }

    // Checked after the scan; within one run a late flag may be journalled before the accrual.
    for (member_id, period) in flagged_late {
        if accrued.contains(&(member_id, period)) {
            violations.push(LedgerViolation::LateAfterMissed { member_id, period });
        }
    }

    violations
}
