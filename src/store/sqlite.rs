use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use super::{MissedContribution, PaymentPosting, Pool, Store};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::model::{
    Contribution, ContributionStatus, Group, GroupTerms, InterestType, Loan, LoanStatus, Member,
    MemberStatus, NewContribution, NewLoan, NewMember, Notification,
};
use crate::roles::Role;
use crate::types::{ContributionId, GroupId, LoanId, MemberId, Period, UserId};
use crate::waterfall::{self, Allocation};

const GROUP_COLUMNS: &str = "id, name, monthly_contribution, penalty_amount, contribution_due_day, \
     interest_rate, loan_interest_type, max_loan_multiplier, min_loan_amount, cycle_end_date";
const MEMBER_COLUMNS: &str =
    "id, group_id, user_id, name, role, status, balance, unpaid_penalties, joined_on";
const CONTRIBUTION_COLUMNS: &str =
    "id, member_id, year, month, amount, penalty_applied, is_late, status, created_on";
const LOAN_COLUMNS: &str = "id, user_id, group_id, amount_requested, repayment_period_months, \
     interest_rate, interest_type, monthly_payment, total_repayment, status, requested_on";

fn text_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or(rusqlite::Error::InvalidColumnType(idx, text, Type::Text))
}

fn group_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(row.get::<_, i64>(0)? as u64),
        name: row.get(1)?,
        terms: GroupTerms {
            monthly_contribution: row.get::<_, i64>(2)? as u64,
            penalty_amount: row.get::<_, i64>(3)? as u64,
            contribution_due_day: row.get(4)?,
            interest_rate: row.get(5)?,
            loan_interest_type: text_enum(row, 6, InterestType::parse)?,
            max_loan_multiplier: row.get(7)?,
            min_loan_amount: row.get::<_, i64>(8)? as u64,
            cycle_end_date: row.get(9)?,
        },
    })
}

fn member_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: MemberId(row.get::<_, i64>(0)? as u64),
        group_id: GroupId(row.get::<_, i64>(1)? as u64),
        user_id: UserId(row.get::<_, i64>(2)? as u64),
        name: row.get(3)?,
        role: text_enum(row, 4, Role::parse)?,
        status: text_enum(row, 5, MemberStatus::parse)?,
        balance: row.get(6)?,
        unpaid_penalties: row.get::<_, i64>(7)? as u64,
        joined_on: row.get(8)?,
    })
}

fn contribution_row(row: &Row<'_>) -> rusqlite::Result<Contribution> {
    Ok(Contribution {
        id: ContributionId(row.get::<_, i64>(0)? as u64),
        member_id: MemberId(row.get::<_, i64>(1)? as u64),
        period: Period { year: row.get(2)?, month: row.get(3)? },
        amount: row.get::<_, i64>(4)? as u64,
        penalty_applied: row.get::<_, i64>(5)? as u64,
        is_late: row.get(6)?,
        status: text_enum(row, 7, ContributionStatus::parse)?,
        created_on: row.get(8)?,
    })
}

fn loan_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: LoanId(row.get::<_, i64>(0)? as u64),
        user_id: UserId(row.get::<_, i64>(1)? as u64),
        group_id: GroupId(row.get::<_, i64>(2)? as u64),
        amount_requested: row.get::<_, i64>(3)? as u64,
        repayment_period_months: row.get(4)?,
        interest_rate: row.get(5)?,
        interest_type: text_enum(row, 6, InterestType::parse)?,
        monthly_payment: row.get::<_, i64>(7)? as u64,
        total_repayment: row.get::<_, i64>(8)? as u64,
        status: text_enum(row, 9, LoanStatus::parse)?,
        requested_on: row.get(10)?,
    })
}

fn insert_contribution(tx: &Connection, new: &NewContribution) -> rusqlite::Result<Contribution> {
    tx.execute(
        "INSERT INTO contributions (member_id, year, month, amount, penalty_applied, is_late, status, created_on)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![
            new.member_id.0 as i64,
            new.period.year,
            new.period.month,
            new.amount as i64,
            new.penalty_applied as i64,
            new.status.as_str(),
            new.created_on,
        ],
    )?;
    contribution_by_id(tx, tx.last_insert_rowid())
}

fn contribution_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Contribution> {
    conn.query_row(
        &format!("SELECT {CONTRIBUTION_COLUMNS} FROM contributions WHERE id = ?1"),
        params![id],
        contribution_row,
    )
}

fn unpaid_penalties(tx: &Connection, member: MemberId) -> rusqlite::Result<Option<u64>> {
    tx.query_row(
        "SELECT unpaid_penalties FROM members WHERE id = ?1",
        params![member.0 as i64],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.map(|p| p as u64))
}

fn credit(tx: &Connection, member: MemberId, allocation: &Allocation) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE members
         SET unpaid_penalties = unpaid_penalties - ?2, balance = balance + ?3
         WHERE id = ?1",
        params![member.0 as i64, allocation.applied_penalty as i64, allocation.to_balance as i64],
    )?;
    Ok(())
}

/// SQLite-backed store. Writes run in IMMEDIATE transactions so the read of
/// current penalties and the update that follows cannot interleave with
/// another writer.
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let Some(path) = config.path.as_deref() else {
            return Self::in_memory();
        };
        let size = config.pool_size.max(1);
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            if let Some(warning) = enable_wal(&conn) {
                eprintln!("Warning: {path}: {warning}");
            }
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            conns.push(conn);
        }
        migrate(&conns[0])?;
        Ok(SqliteStore {
            pool: Pool::new(conns, Duration::from_millis(config.acquire_timeout_ms)),
        })
    }

    /// Single in-memory connection (used in tests and one-off runs).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrate(&conn)?;
        Ok(SqliteStore {
            pool: Pool::new(vec![conn], Duration::from_millis(StoreConfig::default().acquire_timeout_ms)),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StoreResult<T> {
        let conn = self.pool.acquire()?;
        Ok(f(&*conn)?)
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Raw SQL against a pooled connection, for installing test triggers.
    pub(crate) fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        let conn = self.pool.acquire()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Switch to WAL. Some filesystems refuse it; the store still works in the
/// mode SQLite kept, so this only reports what happened.
fn enable_wal(conn: &Connection) -> Option<String> {
    match conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0)) {
        Ok(mode) if mode.eq_ignore_ascii_case("wal") => None,
        Ok(mode) => Some(format!("WAL refused, running with journal_mode={mode}")),
        Err(e) => Some(format!("WAL refused: {e}")),
    }
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(include_str!("../../migrations/001_ledger.sql"))?;
    Ok(())
}

impl Store for SqliteStore {
    // ── Groups & members ──────────────────────────────────────────────────────

    fn insert_group(&self, name: &str, terms: &GroupTerms) -> StoreResult<Group> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO groups (name, monthly_contribution, penalty_amount, contribution_due_day,
                     interest_rate, loan_interest_type, max_loan_multiplier, min_loan_amount, cycle_end_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    name,
                    terms.monthly_contribution as i64,
                    terms.penalty_amount as i64,
                    terms.contribution_due_day,
                    terms.interest_rate,
                    terms.loan_interest_type.as_str(),
                    terms.max_loan_multiplier,
                    terms.min_loan_amount as i64,
                    terms.cycle_end_date,
                ],
            )?;
            Ok(Group { id: GroupId(tx.last_insert_rowid() as u64), name: name.to_string(), terms: terms.clone() })
        })
    }

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
                params![id.0 as i64],
                group_row,
            )
            .optional()
        })
    }

    fn insert_member(&self, new: &NewMember) -> StoreResult<Option<Member>> {
        self.write(|tx| {
            let inserted = tx.execute(
                "INSERT INTO members (group_id, user_id, name, role, joined_on)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (group_id, user_id) DO NOTHING",
                params![
                    new.group_id.0 as i64,
                    new.user_id.0 as i64,
                    new.name,
                    new.role.as_str(),
                    new.joined_on,
                ],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            Ok(Some(tx.query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?1"),
                params![tx.last_insert_rowid()],
                member_row,
            )?))
        })
    }

    fn member(&self, id: MemberId) -> StoreResult<Option<Member>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?1"),
                params![id.0 as i64],
                member_row,
            )
            .optional()
        })
    }

    fn member_for(&self, user: UserId, group: GroupId) -> StoreResult<Option<Member>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE user_id = ?1 AND group_id = ?2"),
                params![user.0 as i64, group.0 as i64],
                member_row,
            )
            .optional()
        })
    }

    fn members(&self, group: GroupId) -> StoreResult<Vec<Member>> {
        self.read(|c| {
            let mut stmt =
                c.prepare(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE group_id = ?1 ORDER BY id"))?;
            let rows = stmt.query_map(params![group.0 as i64], member_row)?;
            rows.collect()
        })
    }

    fn set_member_status(&self, id: MemberId, status: MemberStatus) -> StoreResult<bool> {
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE members SET status = ?2 WHERE id = ?1",
                params![id.0 as i64, status.as_str()],
            )?;
            Ok(n == 1)
        })
    }

    // ── Contributions ─────────────────────────────────────────────────────────

    fn contribution(&self, id: ContributionId) -> StoreResult<Option<Contribution>> {
        self.read(|c| contribution_by_id(c, id.0 as i64).optional())
    }

    fn contributions_for(&self, member: MemberId, period: Period) -> StoreResult<Vec<Contribution>> {
        self.read(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {CONTRIBUTION_COLUMNS} FROM contributions
                 WHERE member_id = ?1 AND year = ?2 AND month = ?3 ORDER BY id"
            ))?;
            let rows =
                stmt.query_map(params![member.0 as i64, period.year, period.month], contribution_row)?;
            rows.collect()
        })
    }

    fn completed_contributions(&self, member: MemberId) -> StoreResult<Vec<Contribution>> {
        self.read(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {CONTRIBUTION_COLUMNS} FROM contributions
                 WHERE member_id = ?1 AND status = 'COMPLETED' ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![member.0 as i64], contribution_row)?;
            rows.collect()
        })
    }

    fn insert_contribution(&self, new: &NewContribution) -> StoreResult<Contribution> {
        self.write(|tx| Ok(insert_contribution(tx, new)?))
    }

    fn accrue_missed_contribution(&self, missed: &MissedContribution<'_>) -> StoreResult<bool> {
        self.write(|tx| {
            let occupied: i64 = tx.query_row(
                "SELECT COUNT(*) FROM contributions
                 WHERE member_id = ?1 AND year = ?2 AND month = ?3 AND status != 'REJECTED'",
                params![missed.member_id.0 as i64, missed.period.year, missed.period.month],
                |row| row.get(0),
            )?;
            if occupied > 0 {
                return Ok(false);
            }
            let updated = tx.execute(
                "UPDATE members
                 SET unpaid_penalties = unpaid_penalties + ?2, balance = balance - ?3
                 WHERE id = ?1",
                params![
                    missed.member_id.0 as i64,
                    missed.penalty as i64,
                    missed.monthly_contribution as i64,
                ],
            )?;
            if updated == 0 {
                return Ok(false);
            }
            insert_contribution(
                tx,
                &NewContribution {
                    member_id: missed.member_id,
                    period: missed.period,
                    amount: 0,
                    penalty_applied: missed.penalty,
                    status: ContributionStatus::Failed,
                    created_on: missed.on,
                },
            )?;
            tx.execute(
                "INSERT INTO notifications (member_id, date, message) VALUES (?1, ?2, ?3)",
                params![missed.member_id.0 as i64, missed.on, missed.notice],
            )?;
            Ok(true)
        })
    }

    fn flag_late(&self, id: ContributionId, penalty: u64) -> StoreResult<bool> {
        self.write(|tx| {
            let flagged = tx.execute(
                "UPDATE contributions SET is_late = 1, penalty_applied = ?2
                 WHERE id = ?1 AND status = 'PENDING' AND is_late = 0",
                params![id.0 as i64, penalty as i64],
            )?;
            if flagged == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE members SET unpaid_penalties = unpaid_penalties + ?2
                 WHERE id = (SELECT member_id FROM contributions WHERE id = ?1)",
                params![id.0 as i64, penalty as i64],
            )?;
            Ok(true)
        })
    }

    fn post_payment(&self, payment: &PaymentPosting) -> StoreResult<Option<(Allocation, Contribution)>> {
        self.write(|tx| {
            let Some(penalties) = unpaid_penalties(tx, payment.member_id)? else {
                return Ok(None);
            };
            let allocation =
                waterfall::allocate(payment.amount, penalties, payment.monthly_contribution);
            credit(tx, payment.member_id, &allocation)?;
            let row = insert_contribution(
                tx,
                &NewContribution {
                    member_id: payment.member_id,
                    period: payment.period,
                    amount: payment.amount,
                    penalty_applied: allocation.applied_penalty,
                    status: ContributionStatus::Completed,
                    created_on: payment.on,
                },
            )?;
            Ok(Some((allocation, row)))
        })
    }

    fn settle_contribution(
        &self,
        id: ContributionId,
        monthly_contribution: u64,
    ) -> StoreResult<Option<(Allocation, Contribution)>> {
        self.write(|tx| {
            let pending = tx
                .query_row(
                    "SELECT member_id, amount FROM contributions WHERE id = ?1 AND status = 'PENDING'",
                    params![id.0 as i64],
                    |row| Ok((MemberId(row.get::<_, i64>(0)? as u64), row.get::<_, i64>(1)? as u64)),
                )
                .optional()?;
            let Some((member_id, amount)) = pending else {
                return Ok(None);
            };
            let Some(penalties) = unpaid_penalties(tx, member_id)? else {
                return Ok(None);
            };
            let allocation = waterfall::allocate(amount, penalties, monthly_contribution);
            credit(tx, member_id, &allocation)?;
            tx.execute(
                "UPDATE contributions
                 SET status = 'COMPLETED',
                     penalty_applied = CASE WHEN is_late = 1 THEN penalty_applied ELSE ?2 END
                 WHERE id = ?1",
                params![id.0 as i64, allocation.applied_penalty as i64],
            )?;
            Ok(Some((allocation, contribution_by_id(tx, id.0 as i64)?)))
        })
    }

    fn reject_contribution(&self, id: ContributionId) -> StoreResult<bool> {
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE contributions SET status = 'REJECTED' WHERE id = ?1 AND status = 'PENDING'",
                params![id.0 as i64],
            )?;
            Ok(n == 1)
        })
    }

    fn notifications(&self, member: MemberId) -> StoreResult<Vec<Notification>> {
        self.read(|c| {
            let mut stmt = c.prepare(
                "SELECT member_id, date, message FROM notifications WHERE member_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![member.0 as i64], |row| {
                Ok(Notification {
                    member_id: MemberId(row.get::<_, i64>(0)? as u64),
                    date: row.get(1)?,
                    message: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    // ── Loans ─────────────────────────────────────────────────────────────────

    fn loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = ?1"),
                params![id.0 as i64],
                loan_row,
            )
            .optional()
        })
    }

    fn open_loan(&self, user: UserId, group: GroupId) -> StoreResult<Option<Loan>> {
        self.read(|c| {
            c.query_row(
                &format!(
                    "SELECT {LOAN_COLUMNS} FROM loans
                     WHERE user_id = ?1 AND group_id = ?2
                       AND status IN ('PENDING', 'APPROVED', 'ACTIVE')
                     ORDER BY id LIMIT 1"
                ),
                params![user.0 as i64, group.0 as i64],
                loan_row,
            )
            .optional()
        })
    }

    fn insert_loan(&self, new: &NewLoan) -> StoreResult<Option<Loan>> {
        self.write(|tx| {
            let open: i64 = tx.query_row(
                "SELECT COUNT(*) FROM loans
                 WHERE user_id = ?1 AND group_id = ?2 AND status IN ('PENDING', 'APPROVED', 'ACTIVE')",
                params![new.user_id.0 as i64, new.group_id.0 as i64],
                |row| row.get(0),
            )?;
            if open > 0 {
                return Ok(None);
            }
            tx.execute(
                "INSERT INTO loans (user_id, group_id, amount_requested, repayment_period_months,
                     interest_rate, interest_type, monthly_payment, total_repayment, requested_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.user_id.0 as i64,
                    new.group_id.0 as i64,
                    new.amount_requested as i64,
                    new.repayment_period_months,
                    new.interest_rate,
                    new.interest_type.as_str(),
                    new.monthly_payment as i64,
                    new.total_repayment as i64,
                    new.requested_on,
                ],
            )?;
            let loan = tx.query_row(
                &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = ?1"),
                params![tx.last_insert_rowid()],
                loan_row,
            )?;
            Ok(Some(loan))
        })
    }

    fn transition_loan(&self, id: LoanId, from: LoanStatus, to: LoanStatus) -> StoreResult<bool> {
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE loans SET status = ?3 WHERE id = ?1 AND status = ?2",
                params![id.0 as i64, from.as_str(), to.as_str()],
            )?;
            Ok(n == 1)
        })
    }
}
