//! Auto-exit risk engine.
//!
//! Continuously evaluates open positions across all active instances
//! against configured risk thresholds and triggers a close order exactly
//! once per threshold breach per position lifecycle.

pub mod autoexit_model;
pub mod autoexit_service;
pub mod evaluator;

pub use autoexit_model::{AutoExitConfig, ExitReason, PositionKey, TrailingState};
pub use autoexit_service::AutoExitEngine;
