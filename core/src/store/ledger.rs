//! Append-only point ledger. The unique idempotency key is the at-most-once
//! mechanism for every financial posting: the balance arithmetic in the
//! calling code is gated on `post_once` reporting that the insert landed.

use super::{LedgerEntryRow, StoreTx};
use crate::error::EngineResult;
use crate::types::{CallSessionId, Millis, PostingKind, UserId};
use rusqlite::params;
use std::fmt;

/// Structured idempotency key. Renders canonically as
/// `KIND:{call_id}:{checkpoint}`, e.g. `HOLD:ab12:UPFRONT`,
/// `HOLD:ab12:20`, `CAPTURE:ab12:SETTLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingKey {
    pub call_id: CallSessionId,
    pub kind: PostingKind,
    pub checkpoint: Checkpoint,
}

/// The monotonic point in a call's billing the posting belongs to. Using the
/// cumulative total (not the increment) is what makes retried heartbeats
/// collide on the same key instead of charging again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// The unit held when the call is accepted.
    Upfront,
    /// Cumulative total owed after a heartbeat top-up.
    Cumulative(i64),
    /// The one-time settlement postings.
    Settlement,
}

impl PostingKey {
    pub fn upfront_hold(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            kind: PostingKind::Hold,
            checkpoint: Checkpoint::Upfront,
        }
    }

    pub fn cumulative_hold(call_id: &str, total: i64) -> Self {
        Self {
            call_id: call_id.to_string(),
            kind: PostingKind::Hold,
            checkpoint: Checkpoint::Cumulative(total),
        }
    }

    pub fn settlement(call_id: &str, kind: PostingKind) -> Self {
        Self {
            call_id: call_id.to_string(),
            kind,
            checkpoint: Checkpoint::Settlement,
        }
    }
}

impl fmt::Display for PostingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.kind.as_str(), self.call_id)?;
        match self.checkpoint {
            Checkpoint::Upfront => write!(f, "UPFRONT"),
            Checkpoint::Cumulative(total) => write!(f, "{total}"),
            Checkpoint::Settlement => write!(f, "SETTLE"),
        }
    }
}

impl StoreTx<'_> {
    // ── Point ledger ────────────────────────────────────────────

    /// Append a posting if its key has never been seen. Returns true when
    /// the row landed; false means the posting already happened and the
    /// caller must not move any money for it.
    pub fn post_once(
        &self,
        key: &PostingKey,
        user_id: UserId,
        amount: i64,
        now: Millis,
    ) -> EngineResult<bool> {
        let n = self.tx.execute(
            "INSERT OR IGNORE INTO point_ledger
               (user_id, entry_type, amount, call_session_id, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, key.kind, amount, key.call_id, key.to_string(), now],
        )?;
        Ok(n > 0)
    }

    pub fn ledger_entries_for_call(&self, call_id: &str) -> EngineResult<Vec<LedgerEntryRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, user_id, entry_type, amount, call_session_id, idempotency_key, created_at
             FROM point_ledger
             WHERE call_session_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![call_id], |r| {
                Ok(LedgerEntryRow {
                    id: r.get(0)?,
                    user_id: r.get(1)?,
                    entry_type: r.get(2)?,
                    amount: r.get(3)?,
                    call_session_id: r.get(4)?,
                    idempotency_key: r.get(5)?,
                    created_at: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Sum of a user's postings of one kind, across all calls.
    pub fn ledger_sum(&self, user_id: UserId, kind: PostingKind) -> EngineResult<i64> {
        let n = self.tx.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM point_ledger
             WHERE user_id = ?1 AND entry_type = ?2",
            params![user_id, kind],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_key_rendering() {
        assert_eq!(PostingKey::upfront_hold("c1").to_string(), "HOLD:c1:UPFRONT");
        assert_eq!(
            PostingKey::cumulative_hold("c1", 20).to_string(),
            "HOLD:c1:20"
        );
        assert_eq!(
            PostingKey::settlement("c1", PostingKind::Capture).to_string(),
            "CAPTURE:c1:SETTLE"
        );
        assert_eq!(
            PostingKey::settlement("c1", PostingKind::Earn).to_string(),
            "EARN:c1:SETTLE"
        );
    }

    #[test]
    fn post_once_is_at_most_once_per_key() {
        let mut store = crate::store::EngineStore::in_memory().unwrap();
        store.migrate().unwrap();
        let tx = store.tx().unwrap();

        let key = PostingKey::upfront_hold("call-x");
        assert!(tx.post_once(&key, 7, 10, 0).unwrap());
        assert!(!tx.post_once(&key, 7, 10, 0).unwrap());

        // A different checkpoint is a different posting.
        let key2 = PostingKey::cumulative_hold("call-x", 20);
        assert!(tx.post_once(&key2, 7, 10, 0).unwrap());

        assert_eq!(tx.ledger_entries_for_call("call-x").unwrap().len(), 2);
        tx.commit().unwrap();
    }
}
