//! Ticket queue tests: submission and charging, FIFO pairing within a
//! region, the cancel/expiry refund matrix, and the expiry sweeper.

use matchcall_core::engine::MatchEngine;
use matchcall_core::ticket_queue::SubmitOutcome;
use matchcall_core::types::{BillingType, TicketStatus};
use matchcall_core::{EngineClock, EngineConfig, EngineError};

fn build() -> MatchEngine {
    MatchEngine::in_memory(EngineConfig::default(), EngineClock::fixed(1_000_000))
        .expect("build in-memory engine")
}

fn seed(engine: &MatchEngine, users: &[(i64, &str, i64, i64)]) {
    for &(user_id, region, free, credit) in users {
        engine
            .upsert_account(user_id, region, free, credit)
            .expect("seed account");
    }
}

#[test]
fn first_submission_waits_second_matches() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0), (2, "kr", 1, 0)]);

    let first = engine.submit_ticket(1).unwrap();
    let first_id = match first {
        SubmitOutcome::Waiting { ticket_id, .. } => ticket_id,
        other => panic!("expected Waiting, got {other:?}"),
    };
    assert_eq!(engine.waiting_ticket_count().unwrap(), 1);

    let second = engine.submit_ticket(2).unwrap();
    let SubmitOutcome::Matched {
        ticket_id: second_id,
        match_session_id,
        room_id,
        opponent_user_id,
        ..
    } = second
    else {
        panic!("expected Matched, got {second:?}");
    };
    assert_eq!(opponent_user_id, 1);

    let session = engine.match_session(&match_session_id).unwrap();
    assert!(session.includes(1) && session.includes(2));
    assert_eq!(session.room_id, room_id);

    for id in [&first_id, &second_id] {
        let ticket = engine.ticket(id).unwrap();
        assert_eq!(ticket.status, TicketStatus::Matched);
        assert_eq!(ticket.match_session_id.as_deref(), Some(match_session_id.as_str()));
        assert_eq!(ticket.room_id.as_deref(), Some(room_id.as_str()));
    }
    assert_eq!(engine.waiting_ticket_count().unwrap(), 0);
    assert_eq!(engine.match_session_count().unwrap(), 1);
}

#[test]
fn free_allowance_is_charged_before_credit() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 5)]);

    let outcome = engine.submit_ticket(1).unwrap();
    let SubmitOutcome::Waiting {
        ticket_id,
        billing_type,
        cost,
        ..
    } = outcome
    else {
        panic!("expected Waiting");
    };
    assert_eq!(billing_type, BillingType::Free);
    assert_eq!(cost, 0);

    let balance = engine.balance_of(1).unwrap();
    assert_eq!(balance.free_allowance, 0);
    assert_eq!(balance.credit, 5);

    // Allowance exhausted: the next ticket is paid from credit.
    engine.cancel_ticket(1, &ticket_id).unwrap();
    let outcome = engine.submit_ticket(1).unwrap();
    let SubmitOutcome::Waiting {
        billing_type, cost, ..
    } = outcome
    else {
        panic!("expected Waiting");
    };
    assert_eq!(billing_type, BillingType::Credit);
    assert_eq!(cost, 1);
    assert_eq!(engine.balance_of(1).unwrap().credit, 4);
}

#[test]
fn submission_with_no_funds_is_rejected() {
    let engine = build();
    seed(&engine, &[(1, "kr", 0, 0)]);

    let err = engine.submit_ticket(1).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds), "{err:?}");
    assert_eq!(engine.waiting_ticket_count().unwrap(), 0);
}

#[test]
fn unknown_account_is_rejected() {
    let engine = build();
    let err = engine.submit_ticket(99).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }), "{err:?}");
}

#[test]
fn duplicate_waiting_ticket_is_rejected() {
    let engine = build();
    seed(&engine, &[(1, "kr", 2, 0)]);

    engine.submit_ticket(1).unwrap();
    let err = engine.submit_ticket(1).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");
    // The rejected submission charged nothing.
    assert_eq!(engine.balance_of(1).unwrap().free_allowance, 1);
}

#[test]
fn different_regions_never_pair() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0), (2, "us", 1, 0)]);

    engine.submit_ticket(1).unwrap();
    let second = engine.submit_ticket(2).unwrap();
    assert!(matches!(second, SubmitOutcome::Waiting { .. }));
    assert_eq!(engine.waiting_ticket_count().unwrap(), 2);
    assert_eq!(engine.match_session_count().unwrap(), 0);
}

#[test]
fn cancel_refunds_free_but_not_credit() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 5)]);

    // FREE ticket: cancel restores the allowance.
    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };
    engine.cancel_ticket(1, &ticket_id).unwrap();
    let ticket = engine.ticket(&ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Canceled);
    assert!(ticket.refunded);
    assert_eq!(engine.balance_of(1).unwrap().free_allowance, 1);

    // Drain the allowance so the next ticket is CREDIT.
    engine.upsert_account(1, "kr", 0, 5).unwrap();
    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };
    assert_eq!(engine.balance_of(1).unwrap().credit, 4);

    // A paid cancel forfeits the charge, but the decision is still recorded.
    engine.cancel_ticket(1, &ticket_id).unwrap();
    let ticket = engine.ticket(&ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Canceled);
    assert!(ticket.refunded);
    assert_eq!(engine.balance_of(1).unwrap().credit, 4);
}

#[test]
fn expiry_refunds_both_billing_types() {
    let engine = build();
    seed(&engine, &[(1, "kr", 0, 5)]);

    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };
    assert_eq!(engine.balance_of(1).unwrap().credit, 4);

    engine.clock().advance_secs(31);

    // Lazy expiry on poll: the caller never sees a false WAITING.
    let view = engine.get_ticket_status(1, &ticket_id).unwrap();
    assert_eq!(view.status, TicketStatus::Expired);
    assert_eq!(engine.balance_of(1).unwrap().credit, 5);

    let ticket = engine.ticket(&ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Expired);
    assert!(ticket.refunded);
}

#[test]
fn sweeper_expires_and_refunds_once() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0)]);

    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };
    assert_eq!(engine.balance_of(1).unwrap().free_allowance, 0);

    engine.clock().advance_secs(31);
    assert_eq!(engine.expire_tickets_batch(10).unwrap(), 1);
    assert_eq!(engine.balance_of(1).unwrap().free_allowance, 1);

    // Re-running the sweeper and re-polling refund nothing further.
    assert_eq!(engine.expire_tickets_batch(10).unwrap(), 0);
    let view = engine.get_ticket_status(1, &ticket_id).unwrap();
    assert_eq!(view.status, TicketStatus::Expired);
    assert_eq!(engine.balance_of(1).unwrap().free_allowance, 1);
}

#[test]
fn expired_ticket_is_not_a_pairing_candidate() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0), (2, "kr", 1, 0)]);

    engine.submit_ticket(1).unwrap();
    engine.clock().advance_secs(31);

    // User 1's ticket is past its TTL but not yet swept; it must still be
    // skipped by pairing.
    let second = engine.submit_ticket(2).unwrap();
    assert!(matches!(second, SubmitOutcome::Waiting { .. }));
    assert_eq!(engine.match_session_count().unwrap(), 0);

    // The sweeper only flips the overdue one.
    assert_eq!(engine.expire_tickets_batch(10).unwrap(), 1);
    assert_eq!(engine.waiting_ticket_count().unwrap(), 1);
}

#[test]
fn ticket_access_is_owner_only() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0), (2, "kr", 1, 0)]);

    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };

    let err = engine.get_ticket_status(2, &ticket_id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");
    let err = engine.cancel_ticket(2, &ticket_id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)), "{err:?}");
    let err = engine.get_ticket_status(1, "no-such-ticket").unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }), "{err:?}");
}

#[test]
fn cancel_requires_waiting() {
    let engine = build();
    seed(&engine, &[(1, "kr", 1, 0), (2, "kr", 1, 0)]);

    let SubmitOutcome::Waiting { ticket_id, .. } = engine.submit_ticket(1).unwrap() else {
        panic!("expected Waiting");
    };
    engine.submit_ticket(2).unwrap();

    // The ticket was matched out from under the canceler.
    let err = engine.cancel_ticket(1, &ticket_id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err:?}");
}

#[test]
fn matched_users_can_requeue() {
    let engine = build();
    seed(&engine, &[(1, "kr", 2, 0), (2, "kr", 2, 0)]);

    engine.submit_ticket(1).unwrap();
    engine.submit_ticket(2).unwrap();
    assert_eq!(engine.match_session_count().unwrap(), 1);

    // A MATCHED ticket is terminal; both users can queue again.
    engine.submit_ticket(1).unwrap();
    engine.submit_ticket(2).unwrap();
    assert_eq!(engine.match_session_count().unwrap(), 2);
}
