//! Balance account queries. Every mutation is a single conditional UPDATE
//! so a stale read can never overwrite a counter; callers branch on whether
//! the statement applied.

use super::{BalanceRow, StoreTx};
use crate::error::EngineResult;
use crate::types::UserId;
use rusqlite::{params, OptionalExtension};

impl StoreTx<'_> {
    // ── Balance account ─────────────────────────────────────────

    /// Seed or refresh the identity collaborator's fields. Never touches
    /// `escrow`: held funds are owned by the engine's call lifecycle.
    pub fn upsert_account(
        &self,
        user_id: UserId,
        region: &str,
        free_allowance: i64,
        credit: i64,
    ) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO balance_account (user_id, region, free_allowance, credit, escrow)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(user_id) DO UPDATE SET
               region = excluded.region,
               free_allowance = excluded.free_allowance,
               credit = excluded.credit",
            params![user_id, region, free_allowance, credit],
        )?;
        Ok(())
    }

    pub fn get_account(&self, user_id: UserId) -> EngineResult<Option<BalanceRow>> {
        let row = self
            .tx
            .query_row(
                "SELECT user_id, region, free_allowance, credit, escrow
                 FROM balance_account WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(BalanceRow {
                        user_id: r.get(0)?,
                        region: r.get(1)?,
                        free_allowance: r.get(2)?,
                        credit: r.get(3)?,
                        escrow: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// `free_allowance -= 1` if any remains. Returns whether it applied.
    pub fn debit_free_allowance(&self, user_id: UserId) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE balance_account SET free_allowance = free_allowance - 1
             WHERE user_id = ?1 AND free_allowance > 0",
            params![user_id],
        )?;
        Ok(n > 0)
    }

    pub fn refund_free_allowance(&self, user_id: UserId) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE balance_account SET free_allowance = free_allowance + 1
             WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// `credit -= amount` if covered. Returns whether it applied.
    pub fn debit_credit(&self, user_id: UserId, amount: i64) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE balance_account SET credit = credit - ?2
             WHERE user_id = ?1 AND credit >= ?2",
            params![user_id, amount],
        )?;
        Ok(n > 0)
    }

    pub fn refund_credit(&self, user_id: UserId, amount: i64) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE balance_account SET credit = credit + ?2 WHERE user_id = ?1",
            params![user_id, amount],
        )?;
        Ok(())
    }

    /// Move `amount` from spendable credit into escrow. Returns whether the
    /// credit guard held.
    pub fn hold_credit(&self, user_id: UserId, amount: i64) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE balance_account
             SET credit = credit - ?2, escrow = escrow + ?2
             WHERE user_id = ?1 AND credit >= ?2",
            params![user_id, amount],
        )?;
        Ok(n > 0)
    }

    /// Consume `amount` out of escrow permanently (settlement capture).
    pub fn capture_escrow(&self, user_id: UserId, amount: i64) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE balance_account SET escrow = escrow - ?2
             WHERE user_id = ?1 AND escrow >= ?2",
            params![user_id, amount],
        )?;
        Ok(n > 0)
    }

    /// Return `amount` from escrow to spendable credit (settlement refund).
    pub fn release_escrow(&self, user_id: UserId, amount: i64) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE balance_account
             SET escrow = escrow - ?2, credit = credit + ?2
             WHERE user_id = ?1 AND escrow >= ?2",
            params![user_id, amount],
        )?;
        Ok(n > 0)
    }

    /// Pay out the callee's share of a captured amount.
    pub fn earn_credit(&self, user_id: UserId, amount: i64) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE balance_account SET credit = credit + ?2 WHERE user_id = ?1",
            params![user_id, amount],
        )?;
        Ok(())
    }
}
