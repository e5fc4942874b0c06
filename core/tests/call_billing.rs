//! Call session tests: the RINGING/ONGOING state machine, the upfront hold
//! on accept, heartbeat liveness and block billing, and the ring-timeout
//! sweeper.

use matchcall_core::engine::MatchEngine;
use matchcall_core::types::{CallStatus, PostingKind};
use matchcall_core::{EngineClock, EngineConfig, EngineError};

/// Two matched users in one region: user 1 (the future caller) with the
/// given credit, user 2 (the future callee) with plenty. Both tickets ride
/// the free allowance so credit is untouched by matchmaking.
fn setup(caller_credit: i64) -> (MatchEngine, String) {
    let engine = MatchEngine::in_memory(EngineConfig::default(), EngineClock::fixed(1_000_000))
        .expect("build in-memory engine");
    engine.upsert_account(1, "kr", 1, caller_credit).unwrap();
    engine.upsert_account(2, "kr", 1, 100).unwrap();
    engine.submit_ticket(1).unwrap();
    let outcome = engine.submit_ticket(2).unwrap();
    let matchcall_core::SubmitOutcome::Matched {
        match_session_id, ..
    } = outcome
    else {
        panic!("expected Matched, got {outcome:?}");
    };
    (engine, match_session_id)
}

#[test]
fn create_call_rings_the_counterpart() {
    let (engine, session_id) = setup(100);

    let call = engine.create_call(1, &session_id).unwrap();
    assert_eq!(call.status, CallStatus::Ringing);
    assert_eq!(call.caller_id, 1);
    assert_eq!(call.callee_id, 2);
    assert_eq!(call.held_total, 0);

    // Visible to both participants, and exclusive per session.
    let seen = engine.get_active_call(2, &session_id).unwrap();
    assert_eq!(seen.id, call.id);
    let err = engine.create_call(2, &session_id).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");

    let err = engine.create_call(3, &session_id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");
}

#[test]
fn accept_holds_one_unit_from_the_caller() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();

    engine.accept_call(2, &call.id).unwrap();

    let call = engine.call(&call.id).unwrap();
    assert_eq!(call.status, CallStatus::Ongoing);
    assert!(call.started_at.is_some());
    assert_eq!(call.held_total, 10);

    let caller = engine.balance_of(1).unwrap();
    assert_eq!(caller.credit, 90);
    assert_eq!(caller.escrow, 10);
    // The callee pays nothing.
    assert_eq!(engine.balance_of(2).unwrap().credit, 100);

    let entries = engine.ledger_entries_for_call(&call.id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, PostingKind::Hold);
    assert_eq!(entries[0].amount, 10);
    assert_eq!(entries[0].idempotency_key, format!("HOLD:{}:UPFRONT", call.id));
}

#[test]
fn only_the_callee_answers() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();

    let err = engine.accept_call(1, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");
    let err = engine.decline_call(1, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");

    engine.accept_call(2, &call.id).unwrap();
    let err = engine.accept_call(2, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err:?}");
}

#[test]
fn accept_without_funds_keeps_the_call_ringing() {
    let (engine, session_id) = setup(0);
    let call = engine.create_call(1, &session_id).unwrap();

    let err = engine.accept_call(2, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds), "{err:?}");

    let call = engine.call(&call.id).unwrap();
    assert_eq!(call.status, CallStatus::Ringing);
    assert_eq!(call.held_total, 0);
    assert_eq!(engine.balance_of(1).unwrap().escrow, 0);
    // The aborted hold left no ledger trace.
    assert!(engine.ledger_entries_for_call(&call.id).unwrap().is_empty());
}

#[test]
fn decline_has_no_financial_effect() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();

    engine.decline_call(2, &call.id).unwrap();
    let call = engine.call(&call.id).unwrap();
    assert_eq!(call.status, CallStatus::Declined);
    assert!(call.ended_at.is_some());
    assert_eq!(engine.balance_of(1).unwrap().credit, 100);
    assert!(engine.ledger_entries_for_call(&call.id).unwrap().is_empty());

    let err = engine.accept_call(2, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err:?}");
}

#[test]
fn heartbeat_bills_one_unit_per_completed_block() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();
    engine.accept_call(2, &call.id).unwrap();

    // Both sides ping every 10s so the peer stays inside the 15s window.
    let mut billed_total = 0;
    for _ in 0..5 {
        engine.clock().advance_secs(10);
        engine.heartbeat(2, &call.id).unwrap();
        let hb = engine.heartbeat(1, &call.id).unwrap();
        assert!(hb.peer_alive);
        billed_total += hb.billed;
    }
    // 50s elapsed: still inside the first block, nothing beyond the upfront.
    assert_eq!(billed_total, 0);
    assert_eq!(engine.call(&call.id).unwrap().held_total, 10);

    // Crossing the 60s boundary owes a second unit.
    engine.clock().advance_secs(10);
    engine.heartbeat(2, &call.id).unwrap();
    let hb = engine.heartbeat(1, &call.id).unwrap();
    assert_eq!(hb.billed, 10);
    assert_eq!(hb.held_total, 20);

    let caller = engine.balance_of(1).unwrap();
    assert_eq!(caller.credit, 80);
    assert_eq!(caller.escrow, 20);

    // A retry inside the same block collides on the cumulative key.
    let hb = engine.heartbeat(1, &call.id).unwrap();
    assert_eq!(hb.billed, 0);
    assert_eq!(engine.balance_of(1).unwrap().escrow, 20);

    let holds: Vec<_> = engine
        .ledger_entries_for_call(&call.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == PostingKind::Hold)
        .collect();
    assert_eq!(holds.len(), 2);
    assert_eq!(holds[1].idempotency_key, format!("HOLD:{}:20", call.id));
}

#[test]
fn callee_heartbeats_never_bill() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();
    engine.accept_call(2, &call.id).unwrap();

    // Only the callee pings for two full blocks. Liveness is maintained on
    // the caller's side (the caller was seen at accept time, then goes
    // quiet), but no top-up ever runs.
    for _ in 0..13 {
        engine.clock().advance_secs(10);
        engine.heartbeat(2, &call.id).unwrap();
    }
    assert_eq!(engine.call(&call.id).unwrap().held_total, 10);
    assert_eq!(engine.balance_of(1).unwrap().escrow, 10);
}

#[test]
fn stale_peer_pauses_billing() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();
    engine.accept_call(2, &call.id).unwrap();

    // The callee goes silent; 70s later the caller pings into a dead room.
    engine.clock().advance_secs(70);
    let hb = engine.heartbeat(1, &call.id).unwrap();
    assert!(!hb.peer_alive);
    assert_eq!(hb.billed, 0);
    assert_eq!(engine.call(&call.id).unwrap().held_total, 10);
}

#[test]
fn failed_topup_force_ends_and_settles() {
    // Exactly one unit of credit: the upfront hold drains it.
    let (engine, session_id) = setup(10);
    let call = engine.create_call(1, &session_id).unwrap();
    engine.accept_call(2, &call.id).unwrap();
    assert_eq!(engine.balance_of(1).unwrap().credit, 0);

    for _ in 0..5 {
        engine.clock().advance_secs(10);
        engine.heartbeat(2, &call.id).unwrap();
        engine.heartbeat(1, &call.id).unwrap();
    }

    // The 60s boundary owes a unit the caller cannot cover.
    engine.clock().advance_secs(10);
    engine.heartbeat(2, &call.id).unwrap();
    let err = engine.heartbeat(1, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds), "{err:?}");

    let call = engine.call(&call.id).unwrap();
    assert_eq!(call.status, CallStatus::Ended);
    assert!(call.settled_at.is_some());
    // Settled on what was held: the upfront unit is captured in full.
    assert_eq!(call.held_total, 10);
    assert_eq!(call.captured_total, 10);
    assert_eq!(call.earned_total, 3);

    let caller = engine.balance_of(1).unwrap();
    assert_eq!(caller.credit, 0);
    assert_eq!(caller.escrow, 0);
    assert_eq!(engine.balance_of(2).unwrap().credit, 103);

    // The failed hold never reached the ledger.
    let entries = engine.ledger_entries_for_call(&call.id).unwrap();
    assert!(entries
        .iter()
        .all(|e| e.idempotency_key != format!("HOLD:{}:20", call.id)));

    let err = engine.heartbeat(1, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err:?}");
}

#[test]
fn outsiders_cannot_heartbeat() {
    let (engine, session_id) = setup(100);
    engine.upsert_account(3, "kr", 1, 0).unwrap();
    let call = engine.create_call(1, &session_id).unwrap();
    engine.accept_call(2, &call.id).unwrap();

    let err = engine.heartbeat(3, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");
}

#[test]
fn unanswered_calls_time_out() {
    let (engine, session_id) = setup(100);
    let call = engine.create_call(1, &session_id).unwrap();

    // Not yet stale.
    engine.clock().advance_secs(59);
    assert_eq!(engine.expire_ringing_batch(10).unwrap(), 0);

    engine.clock().advance_secs(2);
    assert_eq!(engine.expire_ringing_batch(10).unwrap(), 1);

    let call = engine.call(&call.id).unwrap();
    assert_eq!(call.status, CallStatus::Timeout);
    assert!(call.ended_at.is_some());
    assert!(engine.ledger_entries_for_call(&call.id).unwrap().is_empty());

    let err = engine.accept_call(2, &call.id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err:?}");

    // The session is free for a fresh call.
    engine.create_call(2, &session_id).unwrap();
}
