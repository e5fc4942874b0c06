//! Match ticket queries: creation, conditional status transitions, the
//! pairing candidate lookup, and the expiry scan.

use super::{StoreTx, TicketRow};
use crate::error::EngineResult;
use crate::types::{MatchSessionId, Millis, RoomId, TicketId, TicketStatus, UserId};
use rusqlite::{params, OptionalExtension, Row};

fn ticket_from_row(r: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        region: r.get(2)?,
        status: r.get(3)?,
        billing_type: r.get(4)?,
        cost: r.get(5)?,
        refunded: r.get::<_, i64>(6)? != 0,
        room_id: r.get(7)?,
        match_session_id: r.get(8)?,
        created_at: r.get(9)?,
        expires_at: r.get(10)?,
    })
}

const TICKET_COLUMNS: &str = "id, user_id, region, status, billing_type, cost, refunded,
                              room_id, match_session_id, created_at, expires_at";

impl StoreTx<'_> {
    // ── Match ticket ────────────────────────────────────────────

    pub fn insert_ticket(&self, t: &TicketRow) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO match_ticket
               (id, user_id, region, status, billing_type, cost, refunded,
                room_id, match_session_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                t.id,
                t.user_id,
                t.region,
                t.status,
                t.billing_type,
                t.cost,
                t.refunded as i64,
                t.room_id,
                t.match_session_id,
                t.created_at,
                t.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_ticket(&self, ticket_id: &str) -> EngineResult<Option<TicketRow>> {
        let row = self
            .tx
            .query_row(
                &format!("SELECT {TICKET_COLUMNS} FROM match_ticket WHERE id = ?1"),
                params![ticket_id],
                ticket_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn find_waiting_ticket_for_user(
        &self,
        user_id: UserId,
    ) -> EngineResult<Option<TicketRow>> {
        let row = self
            .tx
            .query_row(
                &format!(
                    "SELECT {TICKET_COLUMNS} FROM match_ticket
                     WHERE user_id = ?1 AND status = ?2
                     LIMIT 1"
                ),
                params![user_id, TicketStatus::Waiting],
                ticket_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Pairing candidate: the oldest live WAITING ticket in `region` held by
    /// someone other than `user_id`. The surrounding exclusive transaction
    /// is what stops two pairing attempts from selecting the same row.
    pub fn find_pairing_candidate(
        &self,
        region: &str,
        user_id: UserId,
        now: Millis,
    ) -> EngineResult<Option<TicketRow>> {
        let row = self
            .tx
            .query_row(
                &format!(
                    "SELECT {TICKET_COLUMNS} FROM match_ticket
                     WHERE status = ?1 AND region = ?2 AND user_id != ?3 AND expires_at > ?4
                     ORDER BY created_at ASC
                     LIMIT 1"
                ),
                params![TicketStatus::Waiting, region, user_id, now],
                ticket_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// WAITING → MATCHED, guarded by liveness. Returns whether it applied.
    pub fn mark_ticket_matched(
        &self,
        ticket_id: &str,
        room_id: &RoomId,
        match_session_id: &MatchSessionId,
        now: Millis,
    ) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE match_ticket
             SET status = ?2, room_id = ?3, match_session_id = ?4
             WHERE id = ?1 AND status = ?5 AND expires_at > ?6",
            params![
                ticket_id,
                TicketStatus::Matched,
                room_id,
                match_session_id,
                TicketStatus::Waiting,
                now,
            ],
        )?;
        Ok(n > 0)
    }

    /// WAITING → CANCELED. Returns whether it applied.
    pub fn mark_ticket_canceled(&self, ticket_id: &str) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE match_ticket SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![ticket_id, TicketStatus::Canceled, TicketStatus::Waiting],
        )?;
        Ok(n > 0)
    }

    /// WAITING → EXPIRED. Returns whether it applied.
    pub fn mark_ticket_expired(&self, ticket_id: &str) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE match_ticket SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![ticket_id, TicketStatus::Expired, TicketStatus::Waiting],
        )?;
        Ok(n > 0)
    }

    /// Flip the one-shot refunded flag. Returns whether this call won it.
    pub fn mark_ticket_refunded(&self, ticket_id: &str) -> EngineResult<bool> {
        let n = self.tx.execute(
            "UPDATE match_ticket SET refunded = 1 WHERE id = ?1 AND refunded = 0",
            params![ticket_id],
        )?;
        Ok(n > 0)
    }

    /// Ids of WAITING tickets whose TTL has passed, oldest deadline first.
    pub fn expired_waiting_ticket_ids(
        &self,
        now: Millis,
        limit: usize,
    ) -> EngineResult<Vec<TicketId>> {
        let mut stmt = self.tx.prepare(
            "SELECT id FROM match_ticket
             WHERE status = ?1 AND expires_at <= ?2
             ORDER BY expires_at ASC
             LIMIT ?3",
        )?;
        let ids = stmt
            .query_map(params![TicketStatus::Waiting, now, limit as i64], |r| {
                r.get(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn waiting_ticket_count(&self) -> EngineResult<i64> {
        let n = self.tx.query_row(
            "SELECT COUNT(*) FROM match_ticket WHERE status = ?1",
            params![TicketStatus::Waiting],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}
