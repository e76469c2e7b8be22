use std::io::{self, Write};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::Serialize;

use crate::loans::LoanRejection;
use crate::model::{LoanStatus, MemberStatus};
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};
use crate::waterfall::Allocation;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LedgerEvent {
    /// A month went unpaid past the due day. Balance is debited by the monthly due.
    PenaltyAccrued {
        group_id: GroupId,
        member_id: MemberId,
        period: Period,
        penalty: u64,
        balance_debit: u64,
    },
    /// A self-reported contribution arrived after the due day.
    ContributionMarkedLate {
        contribution_id: ContributionId,
        member_id: MemberId,
        penalty: u64,
    },
    PaymentAllocated {
        contribution_id: ContributionId,
        member_id: MemberId,
        amount: u64,
        allocation: Allocation,
    },
    ContributionSubmitted {
        contribution_id: ContributionId,
        member_id: MemberId,
        period: Period,
        amount: u64,
    },
    ContributionReviewed {
        contribution_id: ContributionId,
        member_id: MemberId,
        approved: bool,
    },
    LoanRequested {
        loan_id: LoanId,
        user_id: UserId,
        group_id: GroupId,
        amount: u64,
        months: u32,
        monthly_payment: u64,
        total_repayment: u64,
    },
    LoanRejected {
        user_id: UserId,
        group_id: GroupId,
        amount: u64,
        reason: LoanRejection,
    },
    LoanTransitioned {
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
    },
    MemberStatusChanged {
        member_id: MemberId,
        status: MemberStatus,
    },
    /// One member's accrual failed; the rest of the scan carried on.
    AccrualFailed {
        group_id: GroupId,
        member_id: MemberId,
        message: String,
    },
}

/// Immutable journal record: what happened and on which business date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub event: LedgerEvent,
}

impl JournalEntry {
    pub fn new(date: NaiveDate, event: LedgerEvent) -> Self {
        JournalEntry { date, event }
    }
}

/// Append-only, shareable across threads.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, entries: impl IntoIterator<Item = JournalEntry>) {
        // A panicked appender leaves a prefix of its batch; keep what is there.
        let mut log = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        log.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn into_entries(self) -> Vec<JournalEntry> {
        self.entries.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// One JSON object per line.
pub fn write_ndjson<W: Write>(mut writer: W, entries: &[JournalEntry]) -> io::Result<()> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writeln!(writer)?;
    }
    writer.flush()
}
