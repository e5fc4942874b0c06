//! Call session state machine, heartbeat billing, and settlement.
//!
//! Transitions: RINGING → {ONGOING, DECLINED, TIMEOUT}, ONGOING → ENDED.
//! Money only moves while the exclusive transaction holds the store: the
//! upfront hold on accept, cumulative top-ups on caller heartbeats, and the
//! one-shot capture/refund/earn split at settlement. Every posting is gated
//! by its ledger idempotency key, so a replayed operation can never move
//! the same funds twice.

use crate::{
    config::EngineConfig,
    engine::MatchEngine,
    error::{EngineError, EngineResult},
    store::{CallRow, PostingKey, StoreTx},
    types::{
        CallSessionId, CallStatus, Millis, ParticipantState, PostingKind, SessionStatus, UserId,
    },
};
use serde::Serialize;
use uuid::Uuid;

/// Result of one heartbeat: liveness of the counterpart plus what, if
/// anything, was newly held this round.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HeartbeatOutcome {
    pub peer_alive: bool,
    /// Amount moved into escrow by this heartbeat (0 when no top-up ran).
    pub billed: i64,
    pub held_total: i64,
}

/// The final figures of a settled call. Returned by `end_call` and
/// `settle_call`; on an already-settled call these are the stored values.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub call_session_id: CallSessionId,
    pub held_total: i64,
    pub captured: i64,
    pub refunded: i64,
    pub earned: i64,
}

impl MatchEngine {
    // ── Call session ────────────────────────────────────────────

    /// Start ringing the counterpart of an ACTIVE match session. The
    /// requester becomes the caller (JOINED), the counterpart the callee
    /// (INVITED). No money moves until the callee accepts.
    pub fn create_call(&self, user_id: UserId, match_session_id: &str) -> EngineResult<CallRow> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let session = tx
            .get_match_session(match_session_id)?
            .ok_or(EngineError::NotFound {
                entity: "match session",
            })?;
        if !session.includes(user_id) {
            return Err(EngineError::Forbidden("not a session participant"));
        }
        if session.status != SessionStatus::Active {
            return Err(EngineError::InvalidState {
                expected: "ACTIVE",
                actual: session.status.as_str().to_string(),
            });
        }
        if tx.find_active_call(match_session_id)?.is_some() {
            return Err(EngineError::Conflict(
                "an active call already exists for this session",
            ));
        }

        let callee_id = session.counterpart_of(user_id);
        let call = CallRow {
            id: Uuid::new_v4().to_string(),
            match_session_id: session.id,
            caller_id: user_id,
            callee_id,
            status: CallStatus::Ringing,
            created_at: now,
            started_at: None,
            ended_at: None,
            last_billed_at: None,
            held_total: 0,
            captured_total: 0,
            earned_total: 0,
            settled_at: None,
        };
        tx.insert_call(&call)?;
        tx.insert_participant(&call.id, call.caller_id, ParticipantState::Joined, Some(now))?;
        tx.insert_participant(&call.id, call.callee_id, ParticipantState::Invited, None)?;
        tx.commit()?;

        log::info!(
            "call {} ringing: caller {} -> callee {}",
            call.id,
            call.caller_id,
            call.callee_id
        );
        Ok(call)
    }

    /// The current RINGING/ONGOING call of a session, for participants only.
    pub fn get_active_call(
        &self,
        user_id: UserId,
        match_session_id: &str,
    ) -> EngineResult<CallRow> {
        let mut store = self.store()?;
        let tx = store.tx()?;

        let session = tx
            .get_match_session(match_session_id)?
            .ok_or(EngineError::NotFound {
                entity: "match session",
            })?;
        if !session.includes(user_id) {
            return Err(EngineError::Forbidden("not a session participant"));
        }
        let call = tx
            .find_active_call(match_session_id)?
            .ok_or(EngineError::NotFound {
                entity: "call session",
            })?;
        tx.commit()?;
        Ok(call)
    }

    /// Callee accepts a ringing call. The first billing unit is held from
    /// the caller's credit before the call flips ONGOING; if the caller
    /// cannot cover it the whole operation aborts and the call keeps
    /// ringing.
    pub fn accept_call(&self, user_id: UserId, call_session_id: &str) -> EngineResult<()> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let call = require_call(&tx, call_session_id)?;
        if call.callee_id != user_id {
            return Err(EngineError::Forbidden("only the callee can accept"));
        }
        if call.status != CallStatus::Ringing {
            return Err(EngineError::InvalidState {
                expected: "RINGING",
                actual: call.status.as_str().to_string(),
            });
        }

        let unit = self.config().call_unit_rate;
        if tx.post_once(&PostingKey::upfront_hold(&call.id), call.caller_id, unit, now)? {
            if !tx.hold_credit(call.caller_id, unit)? {
                // Dropping the transaction rolls the ledger row back too.
                return Err(EngineError::InsufficientFunds);
            }
        }
        if !tx.mark_call_ongoing(&call.id, now, unit)? {
            return Err(EngineError::Conflict("call left RINGING concurrently"));
        }
        tx.set_participant_state(&call.id, user_id, ParticipantState::Joined, now)?;
        tx.commit()?;

        log::info!("call {} accepted, held {} upfront", call.id, unit);
        Ok(())
    }

    /// Callee declines a ringing call. No financial effect.
    pub fn decline_call(&self, user_id: UserId, call_session_id: &str) -> EngineResult<()> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let call = require_call(&tx, call_session_id)?;
        if call.callee_id != user_id {
            return Err(EngineError::Forbidden("only the callee can decline"));
        }
        if call.status != CallStatus::Ringing {
            return Err(EngineError::InvalidState {
                expected: "RINGING",
                actual: call.status.as_str().to_string(),
            });
        }
        if !tx.mark_call_declined(&call.id, now)? {
            return Err(EngineError::Conflict("call left RINGING concurrently"));
        }
        tx.commit()?;
        log::info!("call {} declined by callee {user_id}", call.id);
        Ok(())
    }

    /// Participant liveness ping on an ONGOING call.
    ///
    /// Escrow top-ups only run when the CALLER invokes this and the peer is
    /// alive; callee heartbeats refresh liveness but never bill, so billing
    /// stalls when only the callee keeps pinging. If a top-up is due and the
    /// caller's credit cannot cover it, the failed hold is rolled back, the
    /// call is force-ended and settled on what was already held, and the
    /// operation reports InsufficientFunds.
    pub fn heartbeat(
        &self,
        user_id: UserId,
        call_session_id: &str,
    ) -> EngineResult<HeartbeatOutcome> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let call = require_call(&tx, call_session_id)?;
        if !call.is_participant(user_id) {
            return Err(EngineError::Forbidden("not a call participant"));
        }
        if call.status != CallStatus::Ongoing {
            return Err(EngineError::InvalidState {
                expected: "ONGOING",
                actual: call.status.as_str().to_string(),
            });
        }

        tx.touch_participant(&call.id, user_id, now)?;

        let peer_id = call.counterpart_of(user_id);
        let peer = tx
            .get_participant(&call.id, peer_id)?
            .ok_or_else(|| anyhow::anyhow!("participant row missing for call {}", call.id))?;
        let peer_alive = peer.state == ParticipantState::Joined
            && peer
                .last_seen_at
                .is_some_and(|seen| now - seen <= self.config().heartbeat_stale_ms());

        let mut billed = 0;
        if user_id == call.caller_id && peer_alive {
            let started = call
                .started_at
                .ok_or_else(|| anyhow::anyhow!("ONGOING call {} has no started_at", call.id))?;
            let unit = self.config().call_unit_rate;
            let total_owed = (1 + (now - started) / self.config().block_ms()) * unit;
            let shortfall = total_owed - call.held_total;
            if shortfall > 0 {
                tx.savepoint("topup")?;
                let key = PostingKey::cumulative_hold(&call.id, total_owed);
                if tx.post_once(&key, call.caller_id, shortfall, now)? {
                    if tx.hold_credit(call.caller_id, shortfall)? {
                        tx.add_call_hold(&call.id, shortfall, now)?;
                        tx.release_savepoint("topup")?;
                        billed = shortfall;
                        log::debug!(
                            "call {} topped up {} (owed {} of held {})",
                            call.id,
                            shortfall,
                            total_owed,
                            call.held_total
                        );
                    } else {
                        // Undo the failed hold only; the forced end and the
                        // settlement below must survive the error return.
                        tx.rollback_to_savepoint("topup")?;
                        tx.mark_call_ended(&call.id, now)?;
                        let s = settle_in_tx(&tx, self.config(), &call.id, now)?;
                        tx.commit()?;
                        log::info!(
                            "call {} force-ended on failed top-up of {}: captured {}, refunded {}",
                            call.id,
                            shortfall,
                            s.captured,
                            s.refunded
                        );
                        return Err(EngineError::InsufficientFunds);
                    }
                } else {
                    tx.release_savepoint("topup")?;
                }
            }
        }

        tx.commit()?;
        Ok(HeartbeatOutcome {
            peer_alive,
            billed,
            held_total: call.held_total + billed,
        })
    }

    /// Either participant hangs up an ONGOING call. Ends it, marks the
    /// leaver LEFT, and settles in the same transaction.
    pub fn end_call(&self, user_id: UserId, call_session_id: &str) -> EngineResult<Settlement> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let call = require_call(&tx, call_session_id)?;
        if !call.is_participant(user_id) {
            return Err(EngineError::Forbidden("not a call participant"));
        }
        if call.status != CallStatus::Ongoing {
            return Err(EngineError::InvalidState {
                expected: "ONGOING",
                actual: call.status.as_str().to_string(),
            });
        }
        if !tx.mark_call_ended(&call.id, now)? {
            return Err(EngineError::Conflict("call left ONGOING concurrently"));
        }
        tx.set_participant_state(&call.id, user_id, ParticipantState::Left, now)?;
        let settlement = settle_in_tx(&tx, self.config(), &call.id, now)?;
        tx.commit()?;

        log::info!(
            "call {} ended by {user_id}: captured {}, refunded {}, earned {}",
            call.id,
            settlement.captured,
            settlement.refunded,
            settlement.earned
        );
        Ok(settlement)
    }

    /// Settle an ENDED call. Idempotent: on an already-settled call this
    /// returns the stored figures and mutates nothing.
    pub fn settle_call(&self, call_session_id: &str) -> EngineResult<Settlement> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let call = require_call(&tx, call_session_id)?;
        if call.status != CallStatus::Ended {
            return Err(EngineError::InvalidState {
                expected: "ENDED",
                actual: call.status.as_str().to_string(),
            });
        }
        let settlement = settle_in_tx(&tx, self.config(), &call.id, now)?;
        tx.commit()?;
        Ok(settlement)
    }

    /// Sweeper: flip RINGING calls older than the ring timeout to TIMEOUT.
    /// No financial effect; the upfront hold only happens on accept.
    pub fn expire_ringing_batch(&self, limit: usize) -> EngineResult<usize> {
        let now = self.now_ms();
        let mut store = self.store()?;
        let tx = store.tx()?;

        let cutoff = now - self.config().ring_timeout_ms();
        let ids = tx.stale_ringing_call_ids(cutoff, limit)?;
        let mut timed_out = 0;
        for id in &ids {
            if tx.mark_call_timeout(id, now)? {
                timed_out += 1;
            }
        }
        tx.commit()?;
        if timed_out > 0 {
            log::info!("timed out {timed_out} ringing call(s)");
        }
        Ok(timed_out)
    }
}

fn require_call(tx: &StoreTx<'_>, call_session_id: &str) -> EngineResult<CallRow> {
    tx.get_call(call_session_id)?.ok_or(EngineError::NotFound {
        entity: "call session",
    })
}

/// Compute and apply the capture/refund/earn split, exactly once per call.
/// Re-reads the row so an already-settled call short-circuits to its stored
/// figures. Zero-amount postings are still written to the ledger; only the
/// balance arithmetic is skipped for them.
fn settle_in_tx(
    tx: &StoreTx<'_>,
    config: &EngineConfig,
    call_session_id: &str,
    now: Millis,
) -> EngineResult<Settlement> {
    let call = require_call(tx, call_session_id)?;
    if call.settled_at.is_some() {
        return Ok(Settlement {
            call_session_id: call.id,
            held_total: call.held_total,
            captured: call.captured_total,
            refunded: call.held_total - call.captured_total,
            earned: call.earned_total,
        });
    }

    let started = call
        .started_at
        .ok_or_else(|| anyhow::anyhow!("settling call {} with no started_at", call.id))?;
    let ended = call
        .ended_at
        .ok_or_else(|| anyhow::anyhow!("settling call {} with no ended_at", call.id))?;

    let total_owed = (1 + (ended - started) / config.block_ms()) * config.call_unit_rate;
    let captured = total_owed.min(call.held_total);
    let refunded = call.held_total - captured;
    let earned = captured * config.earn_rate_percent / 100;

    if !tx.mark_call_settled(&call.id, captured, earned, now)? {
        return Err(EngineError::Conflict("call settled concurrently"));
    }

    if tx.post_once(
        &PostingKey::settlement(&call.id, PostingKind::Capture),
        call.caller_id,
        captured,
        now,
    )? && captured > 0
    {
        if !tx.capture_escrow(call.caller_id, captured)? {
            return Err(anyhow::anyhow!(
                "escrow underflow capturing {captured} for call {}",
                call.id
            )
            .into());
        }
    }
    if tx.post_once(
        &PostingKey::settlement(&call.id, PostingKind::Refund),
        call.caller_id,
        refunded,
        now,
    )? && refunded > 0
    {
        if !tx.release_escrow(call.caller_id, refunded)? {
            return Err(anyhow::anyhow!(
                "escrow underflow refunding {refunded} for call {}",
                call.id
            )
            .into());
        }
    }
    if tx.post_once(
        &PostingKey::settlement(&call.id, PostingKind::Earn),
        call.callee_id,
        earned,
        now,
    )? && earned > 0
    {
        tx.earn_credit(call.callee_id, earned)?;
    }

    log::debug!(
        "settled call {}: owed {}, captured {}, refunded {}, earned {}",
        call.id,
        total_owed,
        captured,
        refunded,
        earned
    );
    Ok(Settlement {
        call_session_id: call.id,
        held_total: call.held_total,
        captured,
        refunded,
        earned,
    })
}
