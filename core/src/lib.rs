//! Matchmaking and billing/escrow engine for ephemeral 1:1 sessions.
//!
//! Users submit waiting tickets that are charged against a free allowance
//! or credit balance and paired FIFO within a region. A matched pair can
//! run a call session whose cost is escrowed block by block on a heartbeat
//! and split (capture/refund/earn) exactly once at settlement.

mod billing;
pub mod call_session;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod ticket_queue;
pub mod types;

pub use call_session::{HeartbeatOutcome, Settlement};
pub use clock::EngineClock;
pub use config::EngineConfig;
pub use engine::MatchEngine;
pub use error::{EngineError, EngineResult};
pub use ticket_queue::{SubmitOutcome, TicketStatusView};
