//! Tradedesk Core - Domain services for the broker aggregation layer.
//!
//! This crate turns N rate-limited upstream broker sessions into a small set
//! of consistent, fresh-enough, always-available in-memory views, and runs
//! the automated risk-exit loop over the positions those views expose.
//! It is database-agnostic: the instrument catalog persists through the
//! repository traits in [`instruments`], implemented by the
//! `storage-sqlite` crate.
//!
//! Subsystems:
//! - [`instances`]: the in-memory registry of configured broker sessions.
//! - [`feeds`]: TTL-bounded feed caches, circuit breaking, instance pooling.
//! - [`autoexit`]: the per-position risk-exit engine.
//! - [`instruments`]: the searchable instrument catalog service.
//! - [`watchlist`]: traits for the external watchlist/config collaborator.
//! - [`scheduler`]: the periodic background loops tying it all together.

pub mod autoexit;
pub mod constants;
pub mod errors;
pub mod feeds;
pub mod instances;
pub mod instruments;
pub mod scheduler;
pub mod watchlist;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
