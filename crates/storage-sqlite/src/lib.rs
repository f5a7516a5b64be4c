//! SQLite storage implementation for tradedesk.
//!
//! This crate is the only place in the application where Diesel exists. It
//! implements the repository traits defined in `tradedesk-core` for the two
//! pieces of durable state: the instrument catalog and its refresh log.
//! Feed snapshots, circuit states and trailing state are process-local by
//! design and never reach this crate.
//!
//! ```text
//!        core (domain)
//!              │
//!              ▼
//!   storage-sqlite (this crate)
//!              │
//!              ▼
//!          SQLite DB
//! ```
//!
//! Reads run on pooled connections; writes funnel through a single writer
//! actor that wraps every job in an immediate transaction, which is what
//! makes the catalog replace atomic for readers.

pub mod db;
pub mod errors;
pub mod instruments;
pub mod schema;

// Re-export database utilities
pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool};
pub use db::{spawn_writer, WriteHandle};

// Re-export storage errors
pub use errors::StorageError;

// Re-export from tradedesk-core for convenience
pub use tradedesk_core::errors::{DatabaseError, Error, Result};

pub use instruments::InstrumentRepository;
