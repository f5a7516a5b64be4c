//! Feed cache & resilience layer.
//!
//! Serves fresh-enough, always-available views of quotes, positions, funds,
//! orderbook and tradebook for every active instance while minimizing
//! upstream call volume and isolating failures per (instance, feed).

pub mod feeds_model;
pub mod feeds_service;

pub use feeds_model::{
    FeedData, FeedKind, FeedSnapshot, FeedTtlConfig, QuoteFetchOptions, SymbolQuoteEntry,
};
pub use feeds_service::{FeedCacheService, FeedServiceConfig};
