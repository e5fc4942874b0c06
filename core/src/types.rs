//! Shared id/time aliases and the domain enums stored in SQLite.
//!
//! Every enum round-trips through its SCREAMING_SNAKE database tag via
//! `as_str`/`parse`, and implements `ToSql`/`FromSql` so store code can bind
//! and read typed values directly.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
/// Unix epoch milliseconds.
pub type Millis = i64;
pub type TicketId = String;
pub type RoomId = String;
pub type MatchSessionId = String;
pub type CallSessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Waiting,
    Matched,
    Canceled,
    Expired,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "WAITING",
            TicketStatus::Matched => "MATCHED",
            TicketStatus::Canceled => "CANCELED",
            TicketStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(TicketStatus::Waiting),
            "MATCHED" => Some(TicketStatus::Matched),
            "CANCELED" => Some(TicketStatus::Canceled),
            "EXPIRED" => Some(TicketStatus::Expired),
            _ => None,
        }
    }

    /// WAITING is the only non-terminal ticket state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Waiting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    Free,
    Credit,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Free => "FREE",
            BillingType::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FREE" => Some(BillingType::Free),
            "CREDIT" => Some(BillingType::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Ended => "ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(SessionStatus::Active),
            "ENDED" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Ongoing,
    Declined,
    Ended,
    Timeout,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "RINGING",
            CallStatus::Ongoing => "ONGOING",
            CallStatus::Declined => "DECLINED",
            CallStatus::Ended => "ENDED",
            CallStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RINGING" => Some(CallStatus::Ringing),
            "ONGOING" => Some(CallStatus::Ongoing),
            "DECLINED" => Some(CallStatus::Declined),
            "ENDED" => Some(CallStatus::Ended),
            "TIMEOUT" => Some(CallStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Declined | CallStatus::Ended | CallStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    Invited,
    Joined,
    Left,
}

impl ParticipantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Invited => "INVITED",
            ParticipantState::Joined => "JOINED",
            ParticipantState::Left => "LEFT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVITED" => Some(ParticipantState::Invited),
            "JOINED" => Some(ParticipantState::Joined),
            "LEFT" => Some(ParticipantState::Left),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingKind {
    Hold,
    Capture,
    Refund,
    Earn,
}

impl PostingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingKind::Hold => "HOLD",
            PostingKind::Capture => "CAPTURE",
            PostingKind::Refund => "REFUND",
            PostingKind::Earn => "EARN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HOLD" => Some(PostingKind::Hold),
            "CAPTURE" => Some(PostingKind::Capture),
            "REFUND" => Some(PostingKind::Refund),
            "EARN" => Some(PostingKind::Earn),
            _ => None,
        }
    }
}

/// Why a ticket left the WAITING state, for the refund matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    Canceled,
    Expired,
}

macro_rules! impl_sql_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(self.as_str().into())
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let s = value.as_str()?;
                    <$ty>::parse(s).ok_or(FromSqlError::InvalidType)
                }
            }
        )+
    };
}

impl_sql_enum!(
    TicketStatus,
    BillingType,
    SessionStatus,
    CallStatus,
    ParticipantState,
    PostingKind,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_status_roundtrip() {
        for s in [
            TicketStatus::Waiting,
            TicketStatus::Matched,
            TicketStatus::Canceled,
            TicketStatus::Expired,
        ] {
            assert_eq!(TicketStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TicketStatus::parse("waiting"), None);
    }

    #[test]
    fn call_status_terminality() {
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::Ongoing.is_terminal());
        assert!(CallStatus::Declined.is_terminal());
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::Timeout.is_terminal());
    }
}
