// ⚠️ Error Kinds - every failure is rejected before mutation or rolled back after it
//
// None of these is fatal to the process. Command handlers surface them to the
// caller; the reminder scheduler logs them and carries on with the next tick.

use thiserror::Error;

use crate::links::LinkError;
use crate::period::PeriodId;

// ============================================================================
// PERSISTENCE ERRORS
// ============================================================================

/// Failure reading or writing the durable ledger medium.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored data exists but does not describe a valid ledger
    #[error("malformed ledger data: {message}")]
    Malformed { message: String },

    /// Injected failure (in-memory store with its fail switch on)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

// ============================================================================
// LEDGER ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("due day must be between 1 and 31, got {0}")]
    InvalidDueDay(u32),

    #[error("no record for member {member_id}{}", .period.as_ref().map(|p| format!(" in {p}")).unwrap_or_default())]
    NotFound {
        member_id: String,
        period: Option<PeriodId>,
    },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("{actor} is not allowed to {action}")]
    Unauthorized { actor: String, action: String },

    #[error("ledger not persisted, change rolled back: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("exchange rate unavailable: {0}")]
    RateUnavailable(String),
}

impl LedgerError {
    pub fn member_not_found(member_id: &str) -> Self {
        LedgerError::NotFound {
            member_id: member_id.to_string(),
            period: None,
        }
    }

    pub fn period_not_found(member_id: &str, period: PeriodId) -> Self {
        LedgerError::NotFound {
            member_id: member_id.to_string(),
            period: Some(period),
        }
    }

    pub fn unauthorized(actor: &str, action: &str) -> Self {
        LedgerError::Unauthorized {
            actor: actor.to_string(),
            action: action.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
