use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::roles::Role;
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }

            pub fn parse(text: &str) -> Option<Self> {
                match text {
                    $($text => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterestType {
    FlatRate,
    ReducingBalance,
}

status_strings!(InterestType { FlatRate => "FLAT_RATE", ReducingBalance => "REDUCING_BALANCE" });

/// Per-group rules. All amounts in minor currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTerms {
    pub monthly_contribution: u64,
    pub penalty_amount: u64,
    /// Day of month after which a missing contribution is penalised (1–31).
    pub contribution_due_day: u32,
    /// Percent per repayment period.
    pub interest_rate: f64,
    pub loan_interest_type: InterestType,
    pub max_loan_multiplier: f64,
    pub min_loan_amount: u64,
    /// No loan may run past this date.
    #[serde(default)]
    pub cycle_end_date: Option<NaiveDate>,
}

impl GroupTerms {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=31).contains(&self.contribution_due_day) {
            return Err(ValidationError::DueDayOutOfRange(self.contribution_due_day));
        }
        if !self.interest_rate.is_finite() || !(0.0..=100.0).contains(&self.interest_rate) {
            return Err(ValidationError::RateOutOfRange(self.interest_rate));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub terms: GroupTerms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    Suspended,
}

status_strings!(MemberStatus { Active => "ACTIVE", Suspended => "SUSPENDED" });

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub status: MemberStatus,
    /// Signed: negative means the member owes the group.
    pub balance: i64,
    pub unpaid_penalties: u64,
    pub joined_on: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub joined_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContributionStatus {
    Pending,
    Completed,
    /// Amount zero: marks a missed month so the penalty is not re-accrued.
    Failed,
    Rejected,
}

status_strings!(ContributionStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub member_id: MemberId,
    pub period: Period,
    pub amount: u64,
    pub penalty_applied: u64,
    pub is_late: bool,
    pub status: ContributionStatus,
    pub created_on: NaiveDate,
}

impl ContributionStatus {
    /// A row in one of these states settles the question of whether the
    /// period was paid or missed. REJECTED rows do not.
    pub fn occupies_period(self) -> bool {
        !matches!(self, ContributionStatus::Rejected)
    }
}

impl Contribution {
    pub fn is_missed_marker(&self) -> bool {
        self.status == ContributionStatus::Failed
    }
}

#[derive(Debug, Clone)]
pub struct NewContribution {
    pub member_id: MemberId,
    pub period: Period,
    pub amount: u64,
    pub penalty_applied: u64,
    pub status: ContributionStatus,
    pub created_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Completed,
    Defaulted,
}

status_strings!(LoanStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
    Active => "ACTIVE",
    Completed => "COMPLETED",
    Defaulted => "DEFAULTED",
});

impl LoanStatus {
    /// Non-terminal states; at most one such loan per (user, group).
    pub fn is_open(self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved | LoanStatus::Active)
    }

    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Active)
                | (Active, Completed)
                | (Active, Defaulted)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub amount_requested: u64,
    pub repayment_period_months: u32,
    pub interest_rate: f64,
    pub interest_type: InterestType,
    pub monthly_payment: u64,
    pub total_repayment: u64,
    pub status: LoanStatus,
    pub requested_on: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub amount_requested: u64,
    pub repayment_period_months: u32,
    pub interest_rate: f64,
    pub interest_type: InterestType,
    pub monthly_payment: u64,
    pub total_repayment: u64,
    pub requested_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub member_id: MemberId,
    pub date: NaiveDate,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> GroupTerms {
        GroupTerms {
            monthly_contribution: 10_000,
            penalty_amount: 500,
            contribution_due_day: 10,
            interest_rate: 10.0,
            loan_interest_type: InterestType::FlatRate,
            max_loan_multiplier: 3.0,
            min_loan_amount: 1_000,
            cycle_end_date: None,
        }
    }

    #[test]
    fn loan_state_machine_edges() {
        use LoanStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Defaulted));

        assert!(!Pending.can_transition_to(Active));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Approved.can_transition_to(Completed));
    }

    #[test]
    fn open_statuses() {
        assert!(LoanStatus::Pending.is_open());
        assert!(LoanStatus::Active.is_open());
        assert!(!LoanStatus::Rejected.is_open());
        assert!(!LoanStatus::Defaulted.is_open());
    }

    #[test]
    fn status_text_round_trips() {
        for s in [
            ContributionStatus::Pending,
            ContributionStatus::Completed,
            ContributionStatus::Failed,
            ContributionStatus::Rejected,
        ] {
            assert_eq!(ContributionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(LoanStatus::parse("bogus"), None);
    }

    #[test]
    fn terms_reject_bad_due_day_and_rate() {
        let mut t = terms();
        assert!(t.validate().is_ok());
        t.contribution_due_day = 0;
        assert_eq!(t.validate(), Err(ValidationError::DueDayOutOfRange(0)));
        t.contribution_due_day = 10;
        t.interest_rate = 120.0;
        assert_eq!(t.validate(), Err(ValidationError::RateOutOfRange(120.0)));
    }

    #[test]
    fn terms_deserialize_without_cycle_end() {
        let json = r#"{
            "monthly_contribution": 10000,
            "penalty_amount": 500,
            "contribution_due_day": 10,
            "interest_rate": 10.0,
            "loan_interest_type": "REDUCING_BALANCE",
            "max_loan_multiplier": 3.0,
            "min_loan_amount": 1000
        }"#;
        let t: GroupTerms = serde_json::from_str(json).unwrap();
        assert_eq!(t.loan_interest_type, InterestType::ReducingBalance);
        assert_eq!(t.cycle_end_date, None);
    }
}
