// Dues Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod period;       // Billing periods and due-date rollover
pub mod links;        // Secondary → primary account aliases
pub mod entities;     // Member records
pub mod ledger;       // Aggregate root + snapshot layout
pub mod store;        // Write-through commit over a persistence port
pub mod persistence;  // Memory / JSON file / SQLite media
pub mod scheduler;    // Daily reminders + auto-pay sweep
pub mod rates;        // USD rate and price breakdown
pub mod attachments;  // Payment proof blobs
pub mod commands;     // Chat commands → structured outcomes
pub mod export;       // CSV dumps
pub mod config;
pub mod error;
pub mod clock;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use period::{active_due_date, days_until_due, resolve_period, PeriodId, PeriodParseError};
pub use links::{AccountLinkGraph, LinkError, LinkOutcome};
pub use entities::Member;
pub use ledger::{
    Enrollment, Ledger, LedgerConfig, LedgerSnapshot, LoadReport,
    MemberStatus, PaymentChange, RemovedMember, DEFAULT_DUE_DAY,
};
pub use store::{lock, shared, LedgerStore, SharedLedger};
pub use persistence::{JsonFileStore, LedgerEvent, MemoryStore, PersistencePort, SqliteStore};
pub use scheduler::{
    evaluate, FanOut, LogNotifier, Notifier, Reminder, ReminderFeed,
    ReminderKind, ReminderScheduler, ReminderState, TickReport,
};
pub use rates::{
    parse_rate, FixedRate, HttpRate, PriceBreakdown, PriceInfo, PricingConfig,
    RateChain, RateError, RateProvider, SharedRate, UnavailableRate, DEFAULT_RATE_URL,
};
pub use attachments::{AttachmentStore, FsAttachmentStore, MemoryAttachmentStore, ProofReceipt};
pub use commands::{Actor, CommandService, Outcome, RosterEntry};
pub use crate::config::{AppConfig, StorageKind};
pub use error::{LedgerError, LedgerResult, PersistenceError};
pub use clock::{Clock, FixedClock, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
