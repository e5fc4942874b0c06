//! Match session, room, and room membership queries. A session row is the
//! durable record of one pairing; it is never edited after creation apart
//! from an eventual ENDED flip by an admin surface.

use super::{MatchSessionRow, StoreTx};
use crate::error::EngineResult;
use crate::types::{Millis, RoomId, UserId};
use rusqlite::{params, OptionalExtension, Row};

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<MatchSessionRow> {
    Ok(MatchSessionRow {
        id: r.get(0)?,
        user_a_id: r.get(1)?,
        user_b_id: r.get(2)?,
        region: r.get(3)?,
        room_id: r.get(4)?,
        status: r.get(5)?,
        started_at: r.get(6)?,
        ended_at: r.get(7)?,
        end_reason: r.get(8)?,
    })
}

impl StoreTx<'_> {
    // ── Match session / room ────────────────────────────────────

    pub fn insert_room(&self, room_id: &RoomId, now: Millis) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO room (id, created_at) VALUES (?1, ?2)",
            params![room_id, now],
        )?;
        Ok(())
    }

    pub fn insert_room_member(&self, room_id: &RoomId, user_id: UserId) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO room_member (room_id, user_id) VALUES (?1, ?2)",
            params![room_id, user_id],
        )?;
        Ok(())
    }

    pub fn insert_match_session(&self, s: &MatchSessionRow) -> EngineResult<()> {
        self.tx.execute(
            "INSERT INTO match_session
               (id, user_a_id, user_b_id, region, room_id, status, started_at, ended_at, end_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                s.id,
                s.user_a_id,
                s.user_b_id,
                s.region,
                s.room_id,
                s.status,
                s.started_at,
                s.ended_at,
                s.end_reason,
            ],
        )?;
        Ok(())
    }

    pub fn get_match_session(&self, session_id: &str) -> EngineResult<Option<MatchSessionRow>> {
        let row = self
            .tx
            .query_row(
                "SELECT id, user_a_id, user_b_id, region, room_id, status,
                        started_at, ended_at, end_reason
                 FROM match_session WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn match_session_count(&self) -> EngineResult<i64> {
        let n = self
            .tx
            .query_row("SELECT COUNT(*) FROM match_session", [], |r| r.get(0))?;
        Ok(n)
    }
}
