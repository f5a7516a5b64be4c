use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Why an exit was triggered. Travels upstream as the audit tag on the
/// close request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    TargetMet,
    StoplossHit,
    TrailingStopHit,
    ManualExitAll,
}

impl ExitReason {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::TargetMet => "TARGET_MET",
            Self::StoplossHit => "SL_HIT",
            Self::TrailingStopHit => "TSL_HIT",
            Self::ManualExitAll => "MANUAL_EXIT_ALL",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Identity of one tracked position across sweeps.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PositionKey {
    pub instance_id: String,
    pub exchange: String,
    pub symbol: String,
}

impl PositionKey {
    pub fn new(instance_id: &str, exchange: &str, symbol: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// Running extremes for one tracked position's trailing stop.
///
/// Created on the first evaluation of an open position with a trailing
/// configuration; cleared when the position flattens or the engine stops.
#[derive(Clone, Copy, Debug)]
pub struct TrailingState {
    /// Highest price observed since tracking began (drives long trails).
    pub highest: Decimal,
    /// Lowest price observed since tracking began (drives short trails).
    pub lowest: Decimal,
    /// Latched once the activation threshold has been reached.
    pub activated: bool,
}

impl TrailingState {
    pub fn new(first_price: Decimal) -> Self {
        Self {
            highest: first_price,
            lowest: first_price,
            activated: false,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct AutoExitConfig {
    /// Suppression window after a trigger for one position key.
    pub pending_exit_window: Duration,
    /// Strategy tag attached to close/cancel requests.
    pub strategy: String,
}

impl Default for AutoExitConfig {
    fn default() -> Self {
        Self {
            pending_exit_window: constants::PENDING_EXIT_WINDOW,
            strategy: constants::EXIT_STRATEGY_TAG.to_string(),
        }
    }
}
