//! # secvault store
//!
//! Durable audit storage.
//!
//! [`SqliteAuditLog`] implements [`secvault_perms::AuditLog`] on SQLite
//! (rusqlite with bundled SQLite). The schema is versioned (see
//! [`migration`]) and append-only: triggers reject UPDATE and DELETE on the
//! audit table.
//!
//! ```rust,no_run
//! use secvault_store::SqliteAuditLog;
//!
//! let log = SqliteAuditLog::open("audit.db").unwrap();
//! ```

pub mod error;
pub mod migration;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::SqliteAuditLog;
