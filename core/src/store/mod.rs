//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database. Engine modules call store
//! methods — they never execute SQL directly.
//!
//! Every engine operation runs inside one `StoreTx` (BEGIN IMMEDIATE): the
//! exclusive write transaction is the row-lock primitive, and the
//! conditional UPDATE statements in the per-entity modules are the
//! compare-and-set guards. Dropping a `StoreTx` without committing rolls
//! everything back, so a failed operation leaves no partial effects.

mod balance;
mod call;
mod ledger;
mod session;
mod ticket;

pub use ledger::{Checkpoint, PostingKey};

use crate::error::EngineResult;
use crate::types::{
    BillingType, CallSessionId, CallStatus, MatchSessionId, Millis, ParticipantState, PostingKind,
    RoomId, SessionStatus, TicketId, TicketStatus, UserId,
};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub struct EngineStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for a file
}

impl EngineStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_engine.sql"))?;
        Ok(())
    }

    /// Begin an exclusive write transaction. All reads and writes of one
    /// engine operation go through the returned handle.
    pub fn tx(&mut self) -> EngineResult<StoreTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTx { tx })
    }
}

pub struct StoreTx<'c> {
    tx: Transaction<'c>,
}

impl StoreTx<'_> {
    pub fn commit(self) -> EngineResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Open a named savepoint inside the transaction. `name` must be a
    /// fixed identifier, never caller input.
    pub(crate) fn savepoint(&self, name: &str) -> EngineResult<()> {
        self.tx.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(())
    }

    pub(crate) fn release_savepoint(&self, name: &str) -> EngineResult<()> {
        self.tx.execute_batch(&format!("RELEASE {name};"))?;
        Ok(())
    }

    pub(crate) fn rollback_to_savepoint(&self, name: &str) -> EngineResult<()> {
        self.tx
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))?;
        Ok(())
    }
}

// ── Row structs ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub user_id: UserId,
    pub region: String,
    pub free_allowance: i64,
    pub credit: i64,
    pub escrow: i64,
}

#[derive(Debug, Clone)]
pub struct TicketRow {
    pub id: TicketId,
    pub user_id: UserId,
    pub region: String,
    pub status: TicketStatus,
    pub billing_type: BillingType,
    pub cost: i64,
    pub refunded: bool,
    pub room_id: Option<RoomId>,
    pub match_session_id: Option<MatchSessionId>,
    pub created_at: Millis,
    pub expires_at: Millis,
}

#[derive(Debug, Clone)]
pub struct MatchSessionRow {
    pub id: MatchSessionId,
    pub user_a_id: UserId,
    pub user_b_id: UserId,
    pub region: String,
    pub room_id: RoomId,
    pub status: SessionStatus,
    pub started_at: Millis,
    pub ended_at: Option<Millis>,
    pub end_reason: Option<String>,
}

impl MatchSessionRow {
    pub fn includes(&self, user_id: UserId) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    /// The other party of the pairing. Callers must check `includes` first.
    pub fn counterpart_of(&self, user_id: UserId) -> UserId {
        if self.user_a_id == user_id {
            self.user_b_id
        } else {
            self.user_a_id
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallRow {
    pub id: CallSessionId,
    pub match_session_id: MatchSessionId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub status: CallStatus,
    pub created_at: Millis,
    pub started_at: Option<Millis>,
    pub ended_at: Option<Millis>,
    pub last_billed_at: Option<Millis>,
    pub held_total: i64,
    pub captured_total: i64,
    pub earned_total: i64,
    pub settled_at: Option<Millis>,
}

impl CallRow {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    pub fn counterpart_of(&self, user_id: UserId) -> UserId {
        if self.caller_id == user_id {
            self.callee_id
        } else {
            self.caller_id
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub call_session_id: CallSessionId,
    pub user_id: UserId,
    pub state: ParticipantState,
    pub last_seen_at: Option<Millis>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub user_id: UserId,
    pub entry_type: PostingKind,
    pub amount: i64,
    pub call_session_id: CallSessionId,
    pub idempotency_key: String,
    pub created_at: Millis,
}
