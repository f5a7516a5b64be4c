//! Traits and models for the external watchlist/config collaborator.
//!
//! Watchlist CRUD lives outside this crate; the feed layer and the
//! auto-exit engine only ever consume the two read views defined here.

pub mod watchlist_model;
pub mod watchlist_traits;

pub use watchlist_model::{RiskConfigEntry, RiskThresholds, TrackedSymbolFilter};
pub use watchlist_traits::WatchlistProviderTrait;
