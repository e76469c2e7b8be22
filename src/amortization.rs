//! Loan repayment arithmetic.
//!
//! Everything here is `f64` display arithmetic. Rounding to minor units
//! happens once, when a loan row is persisted (see `loans::request_loan`).

use serde::Serialize;

use crate::error::ValidationError;
use crate::model::InterestType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoanQuote {
    pub principal: f64,
    pub monthly_payment: f64,
    pub total_repayment: f64,
    pub total_interest: f64,
}

/// One row of a repayment schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Installment {
    pub period: u32,
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
    pub remaining: f64,
}

/// Longest term the calculator quotes or schedules.
pub const MAX_TERM_MONTHS: u32 = 1_200;

fn validate(principal: u64, rate_percent: f64, months: u32) -> Result<(), ValidationError> {
    if principal == 0 {
        return Err(ValidationError::NonPositiveAmount);
    }
    if !rate_percent.is_finite() || !(0.0..=100.0).contains(&rate_percent) {
        return Err(ValidationError::RateOutOfRange(rate_percent));
    }
    if months == 0 {
        return Err(ValidationError::ZeroTerm);
    }
    if months > MAX_TERM_MONTHS {
        return Err(ValidationError::TermOutOfRange { months, max: MAX_TERM_MONTHS });
    }
    Ok(())
}

/// Monthly payment and total repayment for `principal` at `rate_percent` per
/// period over `months` periods.
pub fn quote(
    principal: u64,
    rate_percent: f64,
    months: u32,
    method: InterestType,
) -> Result<LoanQuote, ValidationError> {
    validate(principal, rate_percent, months)?;

    let p = principal as f64;
    let r = rate_percent / 100.0;
    let n = months as f64;

    let (monthly_payment, total_repayment) = match method {
        InterestType::FlatRate => {
            let total = p + p * r * n;
            (total / n, total)
        }
        InterestType::ReducingBalance => {
            // 1 - (1+r)^-n, kept accurate for rates too small to survive `1.0 + r`.
            let discount = -(-n * r.ln_1p()).exp_m1();
            let monthly = if discount.is_finite() && discount > 0.0 { p * r / discount } else { p / n };
            (monthly, monthly * n)
        }
    };

    Ok(LoanQuote {
        principal: p,
        monthly_payment,
        total_repayment,
        total_interest: total_repayment - p,
    })
}

/// Period-by-period breakdown of `quote`'s figures.
pub fn schedule(
    principal: u64,
    rate_percent: f64,
    months: u32,
    method: InterestType,
) -> Result<Vec<Installment>, ValidationError> {
    let q = quote(principal, rate_percent, months, method)?;
    let r = rate_percent / 100.0;
    let n = months as f64;
    let mut remaining = q.principal;

    let rows = (1..=months)
        .map(|period| {
            let (interest, mut principal_part) = match method {
                InterestType::FlatRate => (q.total_interest / n, q.principal / n),
                InterestType::ReducingBalance => {
                    let interest = remaining * r;
                    (interest, q.monthly_payment - interest)
                }
            };
            // Last row absorbs float drift so the loan closes at exactly zero.
            if period == months {
                principal_part = remaining;
            }
            remaining -= principal_part;
            Installment {
                period,
                payment: interest + principal_part,
                interest,
                principal: principal_part,
                remaining,
            }
        })
        .collect();

    Ok(rows)
}
