//! Upstream broker session contract and resilience primitives.
//!
//! This crate defines everything tradedesk needs to talk to one broker
//! instance, without knowing anything about caching, scheduling or risk
//! logic (those live in `tradedesk-core`):
//!
//! - [`BrokerClient`]: the uniform async contract every upstream session
//!   exposes (quotes, books, funds, instrument catalog, order actions).
//! - [`RestBrokerClient`]: a generic JSON-over-REST implementation with a
//!   fixed request timeout and malformed-response detection.
//! - [`BrokerError`]: the categorized error taxonomy. The
//!   [`failure_class`](BrokerError::failure_class) of an error decides how
//!   the circuit breaker reacts to it.
//! - [`CircuitBreaker`]: the per-endpoint breaker with cooldown + jitter.
//!
//! Upstream payload shapes are heterogeneous across broker builds; the
//! normalization boundary in [`models`] folds them into one canonical shape
//! before anything crosses into the rest of the system.

pub mod circuit_breaker;
pub mod client;
pub mod errors;
pub mod models;
pub mod rest;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::BrokerClient;
pub use errors::{BrokerError, FailureClass};
pub use models::{
    BrokerSession, ClosePositionRequest, Funds, InstrumentRecord, Order, OrderResult, Position,
    QuoteTick, SymbolRef, Trade, TradeMode,
};
pub use rest::{RestBrokerClient, RestClientConfig};
