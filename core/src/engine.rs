//! The matchmaking + billing engine.
//!
//! `MatchEngine` owns the store behind a mutex, the config, and the clock.
//! Every public operation takes `&self`, acquires the store lock, runs one
//! exclusive transaction, and either commits or rolls back as a whole, so
//! the engine is safe to share (`Arc<MatchEngine>`) across any number of
//! request-handling threads.
//!
//! The operations themselves live next to their domain:
//!   - ticket_queue.rs  — submit / status / cancel / expiry sweep
//!   - call_session.rs  — call state machine, heartbeat billing, settlement
//!   - billing.rs       — debit and refund policy helpers

use crate::{
    clock::EngineClock,
    config::EngineConfig,
    error::{EngineError, EngineResult},
    store::{BalanceRow, CallRow, EngineStore, LedgerEntryRow, MatchSessionRow, TicketRow},
    types::{Millis, UserId},
};
use std::sync::{Mutex, MutexGuard};

pub struct MatchEngine {
    store: Mutex<EngineStore>,
    config: EngineConfig,
    clock: EngineClock,
}

impl MatchEngine {
    /// Open (or create) the engine database at `path` and apply migrations.
    pub fn open(path: &str, config: EngineConfig, clock: EngineClock) -> EngineResult<Self> {
        let store = EngineStore::open(path)?;
        store.migrate()?;
        Ok(Self {
            store: Mutex::new(store),
            config,
            clock,
        })
    }

    /// In-memory engine (used in tests, normally with a fixed clock).
    pub fn in_memory(config: EngineConfig, clock: EngineClock) -> EngineResult<Self> {
        let store = EngineStore::in_memory()?;
        store.migrate()?;
        Ok(Self {
            store: Mutex::new(store),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &EngineClock {
        &self.clock
    }

    pub(crate) fn now_ms(&self) -> Millis {
        self.clock.now_ms()
    }

    pub(crate) fn store(&self) -> EngineResult<MutexGuard<'_, EngineStore>> {
        self.store
            .lock()
            .map_err(|_| EngineError::Other(anyhow::anyhow!("engine store mutex poisoned")))
    }

    // ── Account ingestion ───────────────────────────────────────

    /// Seed or refresh a user's identity fields and spendable counters from
    /// the identity collaborator. Escrow is engine-owned and never touched.
    pub fn upsert_account(
        &self,
        user_id: UserId,
        region: &str,
        free_allowance: i64,
        credit: i64,
    ) -> EngineResult<()> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        tx.upsert_account(user_id, region, free_allowance, credit)?;
        tx.commit()
    }

    // ── Reporting surface (read-only) ───────────────────────────

    pub fn balance_of(&self, user_id: UserId) -> EngineResult<BalanceRow> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let row = tx
            .get_account(user_id)?
            .ok_or(EngineError::NotFound { entity: "account" })?;
        tx.commit()?;
        Ok(row)
    }

    pub fn ticket(&self, ticket_id: &str) -> EngineResult<TicketRow> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let row = tx
            .get_ticket(ticket_id)?
            .ok_or(EngineError::NotFound { entity: "ticket" })?;
        tx.commit()?;
        Ok(row)
    }

    pub fn match_session(&self, session_id: &str) -> EngineResult<MatchSessionRow> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let row = tx.get_match_session(session_id)?.ok_or(EngineError::NotFound {
            entity: "match session",
        })?;
        tx.commit()?;
        Ok(row)
    }

    pub fn call(&self, call_id: &str) -> EngineResult<CallRow> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let row = tx.get_call(call_id)?.ok_or(EngineError::NotFound {
            entity: "call session",
        })?;
        tx.commit()?;
        Ok(row)
    }

    pub fn ledger_entries_for_call(&self, call_id: &str) -> EngineResult<Vec<LedgerEntryRow>> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let rows = tx.ledger_entries_for_call(call_id)?;
        tx.commit()?;
        Ok(rows)
    }

    pub fn match_session_count(&self) -> EngineResult<i64> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let n = tx.match_session_count()?;
        tx.commit()?;
        Ok(n)
    }

    pub fn waiting_ticket_count(&self) -> EngineResult<i64> {
        let mut store = self.store()?;
        let tx = store.tx()?;
        let n = tx.waiting_ticket_count()?;
        tx.commit()?;
        Ok(n)
    }
}
