//! Call session and participant queries. Status transitions are conditional
//! updates guarded by the expected current status, so a lost race simply
//! reports "did not apply" instead of clobbering a newer state.

use super::{CallRow, ParticipantRow, StoreTx};
use crate::error::EngineResult;
use crate::types::{CallSessionId, CallStatus, Millis, ParticipantState, UserId};
use rusqlite::{params, OptionalExtension, Row};

fn call_from_row(r: &Row<'_>) -> rusqlite::Result<CallRow> {
    Ok(CallRow {
        id: r.get(0)?,
        match_session_id: r.get(1)?,
        caller_id: r.get(2)?,
        callee_id: r.get(3)?,
        status: r.get(4)?,
        created_at: r.get(5)?,
        started_at: r.get(6)?,
        ended_at: r.get(7)?,
        last_billed_at: r.get(8)?,
        held_total: r.get(9)?,
        captured_total: r.get(10)?,
        earned_total: r.get(11)?,
        settled_at: r.get(12)?,
    })
}

const CALL_COLUMNS: &str = "id, match_session_id, caller_id, callee_id, status, created_at,
                            started_at, ended_at, last_billed_at, held_total, captured_total,
                            earned_total, settled_at";

impl StoreTx<'_> {
    // ── Call session ────────────────────────────────────────────

    pub fn insert_call(&self, c: &CallRow) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO call_session
               (id, match_session_id, caller_id, callee_id, status, created_at,
                started_at, ended_at, last_billed_at, held_total, captured_total,
                earned_total, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                c.id,
                c.match_session_id,
                c.caller_id,
                c.callee_id,
                c.status,
                c.created_at,
                c.started_at,
                c.ended_at,
                c.last_billed_at,
                c.held_total,
                c.captured_total,
                c.earned_total,
                c.settled_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_call(&self, call_id: &str) -> EngineResult<Option<CallRow>> {
        let row = self
            .tx
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM call_session WHERE id = ?1"),
                params![call_id],
                call_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// The RINGING or ONGOING call for a match session, if any. At most one
    /// exists; `create_call` checks this under the exclusive transaction.
    pub fn find_active_call(&self, match_session_id: &str) -> EngineResult<Option<CallRow>> {
        let row = self
            .tx
            .query_row(
                &format!(
                    "SELECT {CALL_COLUMNS} FROM call_session
                     WHERE match_session_id = ?1 AND status IN (?2, ?3)
                     LIMIT 1"
                ),
                params![match_session_id, CallStatus::Ringing, CallStatus::Ongoing],
                call_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// RINGING → ONGOING with billing anchors. Returns whether it applied.
    pub fn mark_call_ongoing(
        &self,
        call_id: &str,
        now: Millis,
        held_total: i64,
    ) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE call_session
             SET status = ?2, started_at = ?3, last_billed_at = ?3, held_total = ?4
             WHERE id = ?1 AND status = ?5",
            params![call_id, CallStatus::Ongoing, now, held_total, CallStatus::Ringing],
        )?;
        Ok(n > 0)
    }

    /// RINGING → DECLINED. Returns whether it applied.
    pub fn mark_call_declined(&self, call_id: &str, now: Millis) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE call_session SET status = ?2, ended_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![call_id, CallStatus::Declined, now, CallStatus::Ringing],
        )?;
        Ok(n > 0)
    }

    /// RINGING → TIMEOUT (sweeper). Returns whether it applied.
    pub fn mark_call_timeout(&self, call_id: &str, now: Millis) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE call_session SET status = ?2, ended_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![call_id, CallStatus::Timeout, now, CallStatus::Ringing],
        )?;
        Ok(n > 0)
    }

    /// ONGOING → ENDED. Returns whether it applied.
    pub fn mark_call_ended(&self, call_id: &str, now: Millis) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE call_session SET status = ?2, ended_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![call_id, CallStatus::Ended, now, CallStatus::Ongoing],
        )?;
        Ok(n > 0)
    }

    /// Record a successful escrow top-up on the call row.
    pub fn add_call_hold(&self, call_id: &str, amount: i64, now: Millis) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE call_session
             SET held_total = held_total + ?2, last_billed_at = ?3
             WHERE id = ?1",
            params![call_id, amount, now],
        )?;
        Ok(())
    }

    /// One-shot settlement stamp. Returns whether this call won it.
    pub fn mark_call_settled(
        &self,
        call_id: &str,
        captured_total: i64,
        earned_total: i64,
        now: Millis,
    ) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE call_session
             SET captured_total = ?2, earned_total = ?3, settled_at = ?4
             WHERE id = ?1 AND settled_at IS NULL",
            params![call_id, captured_total, earned_total, now],
        )?;
        Ok(n > 0)
    }

    /// Ids of calls that have been RINGING since before `cutoff`.
    pub fn stale_ringing_call_ids(
        &self,
        cutoff: Millis,
        limit: usize,
    ) -> EngineResult<Vec<CallSessionId>> {
        let mut stmt = self.tx.prepare(
            "SELECT id FROM call_session
             WHERE status = ?1 AND created_at <= ?2
             ORDER BY created_at ASC
             LIMIT ?3",
        )?;
        let ids = stmt
            .query_map(params![CallStatus::Ringing, cutoff, limit as i64], |r| {
                r.get(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ── Call participant ────────────────────────────────────────

    pub fn insert_participant(
        &self,
        call_id: &str,
        user_id: UserId,
        state: ParticipantState,
        last_seen_at: Option<Millis>,
    ) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO call_participant (call_session_id, user_id, state, last_seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![call_id, user_id, state, last_seen_at],
        )?;
        Ok(())
    }

    pub fn get_participant(
        &self,
        call_id: &str,
        user_id: UserId,
    ) -> EngineResult<Option<ParticipantRow>> {
        let row = self
            .tx
            .query_row(
                "SELECT call_session_id, user_id, state, last_seen_at
                 FROM call_participant
                 WHERE call_session_id = ?1 AND user_id = ?2",
                params![call_id, user_id],
                |r| {
                    Ok(ParticipantRow {
                        call_session_id: r.get(0)?,
                        user_id: r.get(1)?,
                        state: r.get(2)?,
                        last_seen_at: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_participant_state(
        &self,
        call_id: &str,
        user_id: UserId,
        state: ParticipantState,
        now: Millis,
    ) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE call_participant SET state = ?3, last_seen_at = ?4
             WHERE call_session_id = ?1 AND user_id = ?2",
            params![call_id, user_id, state, now],
        )?;
        Ok(())
    }

    pub fn touch_participant(&self, call_id: &str, user_id: UserId, now: Millis) -> EngineResult<()> {
        self.tx.execute(
            "UPDATE call_participant SET last_seen_at = ?3
             WHERE call_session_id = ?1 AND user_id = ?2",
            params![call_id, user_id, now],
        )?;
        Ok(())
    }
}
