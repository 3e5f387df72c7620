//! capledger-storage — durable [`capledger_core::EventStore`] backends.
//!
//! Backends:
//! - `sqlite` — single-file SQLite via `sqlx` (feature `sqlite`, default)
//!
//! The in-memory store for tests and ephemeral use lives in core
//! (`capledger_core::MemoryStore`).

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
