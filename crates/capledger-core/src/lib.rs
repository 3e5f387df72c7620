//! capledger-core — event-sourced ledger reconstruction for a
//! compliance-gated equity token.
//!
//! # Architecture
//!
//! ```text
//! LedgerService
//!     ├── Projector        (single writer of the balance projection)
//!     ├── ActionLedger     (cumulative split multipliers over block ranges)
//!     ├── reconstruct      (forward replay + backward reversal, cross-checked)
//!     ├── captable         (ownership percentages, split-adjusted amounts)
//!     └── EventStore       (memory here; SQLite in capledger-storage)
//! ```

pub mod actions;
pub mod captable;
pub mod error;
pub mod projector;
pub mod reconstruct;
pub mod service;
pub mod store;
pub mod types;
pub mod units;

pub use actions::ActionLedger;
pub use captable::{AdjustedTransaction, CapTable, CapTableEntry};
pub use error::LedgerError;
pub use projector::Projector;
pub use service::{CurrentBalance, HistoricalBalance, LedgerService};
pub use store::{EventStore, MemoryStore};
pub use types::{
    ActionKind, ActionSource, Address, AllowlistEntry, BalanceMap, BalanceRecord, CorporateAction,
    TokenEvent, TransferEvent, TransferKind,
};
