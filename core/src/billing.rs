//! Ticket debit and refund policy.
//!
//! Debit order: one unit of the daily free allowance if any remains, else
//! `ticket_credit_price` from spendable credit. Refund matrix on the way
//! out: FREE refunds on cancel and expiry, CREDIT only on expiry (a paid
//! cancel forfeits the charge).

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    store::StoreTx,
    types::{BillingType, RefundReason, UserId},
};

#[derive(Debug, Clone, Copy)]
pub struct DebitResult {
    pub billing_type: BillingType,
    pub cost: i64,
}

/// Charge one ticket. Both branches are single conditional updates; under
/// concurrent submissions from the same user only one can win each unit.
pub(crate) fn debit_for_ticket(
    tx: &StoreTx<'_>,
    config: &EngineConfig,
    user_id: UserId,
) -> EngineResult<DebitResult> {
    if tx.debit_free_allowance(user_id)? {
        return Ok(DebitResult {
            billing_type: BillingType::Free,
            cost: 0,
        });
    }
    if tx.debit_credit(user_id, config.ticket_credit_price)? {
        return Ok(DebitResult {
            billing_type: BillingType::Credit,
            cost: config.ticket_credit_price,
        });
    }
    Err(EngineError::InsufficientFunds)
}

/// Apply the refund matrix to a ticket leaving WAITING. The one-shot
/// `refunded` flag is flipped even when no money moves, so the decision is
/// made at most once no matter how many expiry/cancel paths race over it.
/// Returns whether a counter was actually restored.
pub(crate) fn refund_if_needed(
    tx: &StoreTx<'_>,
    ticket_id: &str,
    reason: RefundReason,
) -> EngineResult<bool> {
    let Some(ticket) = tx.get_ticket(ticket_id)? else {
        return Ok(false);
    };
    if ticket.refunded {
        return Ok(false);
    }

    let should_refund = match ticket.billing_type {
        BillingType::Free => true,
        BillingType::Credit => reason == RefundReason::Expired,
    };

    if !tx.mark_ticket_refunded(ticket_id)? {
        // Another path won the flag between our read and the update.
        return Ok(false);
    }
    if !should_refund {
        return Ok(false);
    }

    match ticket.billing_type {
        BillingType::Free => tx.refund_free_allowance(ticket.user_id)?,
        BillingType::Credit => {
            if ticket.cost > 0 {
                tx.refund_credit(ticket.user_id, ticket.cost)?;
            }
        }
    }
    log::debug!(
        "refunded ticket {} ({:?}, cost {}) for user {}",
        ticket.id,
        ticket.billing_type,
        ticket.cost,
        ticket.user_id
    );
    Ok(true)
}
