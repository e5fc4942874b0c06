//! Ticket lifecycle: submission (with immediate pairing), status polling
//! with lazy expiry, cancellation, and the expiry sweep.
//!
//! Pairing runs inside the submitter's transaction and nowhere else; there
//! is no background matching loop. A ticket either matches against the
//! oldest live opponent at submit time or stays WAITING for a future
//! submitter to pick up.

use crate::{
    billing,
    engine::MatchEngine,
    error::{EngineError, EngineResult},
    store::{MatchSessionRow, StoreTx, TicketRow},
    types::{
        BillingType, MatchSessionId, Millis, RefundReason, RoomId, SessionStatus, TicketId,
        TicketStatus, UserId,
    },
};
use serde::Serialize;
use uuid::Uuid;

/// What `submit_ticket` resolved to, inside one transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitOutcome {
    Waiting {
        ticket_id: TicketId,
        expires_at: Millis,
        billing_type: BillingType,
        cost: i64,
    },
    Matched {
        ticket_id: TicketId,
        match_session_id: MatchSessionId,
        room_id: RoomId,
        opponent_user_id: UserId,
        billing_type: BillingType,
        cost: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketStatusView {
    pub ticket_id: TicketId,
    pub status: TicketStatus,
    pub room_id: Option<RoomId>,
    pub match_session_id: Option<MatchSessionId>,
    pub expires_at: Millis,
}

struct PairedLink {
    match_session_id: MatchSessionId,
    room_id: RoomId,
    opponent_user_id: UserId,
}

impl MatchEngine {
    // ── Ticket queue ────────────────────────────────────────────

    /// Issue a waiting ticket for `user_id`, charge it, and immediately try
    /// to pair it against the queue.
    pub fn submit_ticket(&self, user_id: UserId) -> EngineResult<SubmitOutcome> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let account = tx
            .get_account(user_id)?
            .ok_or(EngineError::NotFound { entity: "account" })?;
        if tx.find_waiting_ticket_for_user(user_id)?.is_some() {
            return Err(EngineError::Conflict("user already has a waiting ticket"));
        }

        let debit = billing::debit_for_ticket(&tx, self.config(), user_id)?;
        let ticket = TicketRow {
            id: Uuid::new_v4().to_string(),
            user_id,
            region: account.region.clone(),
            status: TicketStatus::Waiting,
            billing_type: debit.billing_type,
            cost: debit.cost,
            refunded: false,
            room_id: None,
            match_session_id: None,
            created_at: now,
            expires_at: now + self.config().wait_ms(),
        };
        tx.insert_ticket(&ticket)?;

        let link = try_pair(&tx, &ticket.id, now)?;
        tx.commit()?;

        match link {
            None => {
                log::debug!(
                    "ticket {} waiting for user {user_id} in region {}",
                    ticket.id,
                    ticket.region
                );
                Ok(SubmitOutcome::Waiting {
                    ticket_id: ticket.id,
                    expires_at: ticket.expires_at,
                    billing_type: ticket.billing_type,
                    cost: ticket.cost,
                })
            }
            Some(link) => {
                log::info!(
                    "ticket {} matched: user {user_id} with {} in session {}",
                    ticket.id,
                    link.opponent_user_id,
                    link.match_session_id
                );
                Ok(SubmitOutcome::Matched {
                    ticket_id: ticket.id,
                    match_session_id: link.match_session_id,
                    room_id: link.room_id,
                    opponent_user_id: link.opponent_user_id,
                    billing_type: ticket.billing_type,
                    cost: ticket.cost,
                })
            }
        }
    }

    /// Poll a ticket. A WAITING ticket past its TTL is expired (and
    /// refunded per policy) synchronously, so the caller always observes a
    /// terminal state once the deadline has passed, never a false WAITING.
    pub fn get_ticket_status(
        &self,
        user_id: UserId,
        ticket_id: &str,
    ) -> EngineResult<TicketStatusView> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let ticket = tx
            .get_ticket(ticket_id)?
            .ok_or(EngineError::NotFound { entity: "ticket" })?;
        if ticket.user_id != user_id {
            return Err(EngineError::Forbidden("not the ticket owner"));
        }

        if ticket.status == TicketStatus::Waiting && ticket.expires_at <= now {
            if tx.mark_ticket_expired(ticket_id)? {
                billing::refund_if_needed(&tx, ticket_id, RefundReason::Expired)?;
            }
            tx.commit()?;
            return Ok(TicketStatusView {
                ticket_id: ticket.id,
                status: TicketStatus::Expired,
                room_id: None,
                match_session_id: None,
                expires_at: ticket.expires_at,
            });
        }

        tx.commit()?;
        Ok(TicketStatusView {
            ticket_id: ticket.id,
            status: ticket.status,
            room_id: ticket.room_id,
            match_session_id: ticket.match_session_id,
            expires_at: ticket.expires_at,
        })
    }

    /// Cancel a WAITING ticket. The WAITING→CANCELED flip is one
    /// conditional update, so a concurrent match or expiry wins cleanly.
    pub fn cancel_ticket(&self, user_id: UserId, ticket_id: &str) -> EngineResult<()> {
        let mut store = self.store()?;
        let tx = store.tx()?;

        let ticket = tx
            .get_ticket(ticket_id)?
            .ok_or(EngineError::NotFound { entity: "ticket" })?;
        if ticket.user_id != user_id {
            return Err(EngineError::Forbidden("not the ticket owner"));
        }
        if ticket.status != TicketStatus::Waiting {
            return Err(EngineError::InvalidState {
                expected: "WAITING",
                actual: ticket.status.as_str().to_string(),
            });
        }
        if !tx.mark_ticket_canceled(ticket_id)? {
            return Err(EngineError::Conflict("ticket left WAITING concurrently"));
        }
        billing::refund_if_needed(&tx, ticket_id, RefundReason::Canceled)?;
        tx.commit()?;
        log::debug!("ticket {ticket_id} canceled by user {user_id}");
        Ok(())
    }

    /// Sweeper: expire up to `limit` overdue WAITING tickets, refunding per
    /// policy. Returns how many were actually flipped. Idempotent and safe
    /// to interleave with lazy expiry and cancellation.
    pub fn expire_tickets_batch(&self, limit: usize) -> EngineResult<usize> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let ids = tx.expired_waiting_ticket_ids(now, limit)?;
        let mut expired = 0;
        for id in &ids {
            if tx.mark_ticket_expired(id)? {
                billing::refund_if_needed(&tx, id, RefundReason::Expired)?;
                expired += 1;
            }
        }
        tx.commit()?;
        if expired > 0 {
            log::info!("expired {expired} waiting ticket(s)");
        }
        Ok(expired)
    }
}

/// Pairing attempt for a just-persisted ticket. Fails silently (returns
/// None) when the ticket is no longer live or no opponent exists; rolls the
/// whole attempt back if either conditional link fails to apply, so a
/// one-sided pairing can never be committed.
fn try_pair(tx: &StoreTx<'_>, my_ticket_id: &str, now: Millis) -> EngineResult<Option<PairedLink>> {
    let me = tx
        .get_ticket(my_ticket_id)?
        .ok_or_else(|| anyhow::anyhow!("just-inserted ticket {my_ticket_id} missing"))?;
    if me.status != TicketStatus::Waiting || me.expires_at <= now {
        return Ok(None);
    }

    let Some(opponent) = tx.find_pairing_candidate(&me.region, me.user_id, now)? else {
        return Ok(None);
    };

    tx.savepoint("pairing")?;

    let room_id: RoomId = Uuid::new_v4().to_string();
    let session_id: MatchSessionId = Uuid::new_v4().to_string();
    tx.insert_room(&room_id, now)?;
    tx.insert_match_session(&MatchSessionRow {
        id: session_id.clone(),
        user_a_id: me.user_id,
        user_b_id: opponent.user_id,
        region: me.region.clone(),
        room_id: room_id.clone(),
        status: SessionStatus::Active,
        started_at: now,
        ended_at: None,
        end_reason: None,
    })?;

    let mine_linked = tx.mark_ticket_matched(&me.id, &room_id, &session_id, now)?;
    let theirs_linked = tx.mark_ticket_matched(&opponent.id, &room_id, &session_id, now)?;
    if !(mine_linked && theirs_linked) {
        tx.rollback_to_savepoint("pairing")?;
        return Ok(None);
    }

    tx.insert_room_member(&room_id, me.user_id)?;
    tx.insert_room_member(&room_id, opponent.user_id)?;
    tx.release_savepoint("pairing")?;

    Ok(Some(PairedLink {
        match_session_id: session_id,
        room_id,
        opponent_user_id: opponent.user_id,
    }))
}
