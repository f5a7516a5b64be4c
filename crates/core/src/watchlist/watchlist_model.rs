use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradedesk_broker::TradeMode;

/// Filter for the tracked-symbol view.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrackedSymbolFilter {
    /// Only symbols on watchlists currently marked active.
    pub only_active_watchlists: bool,
    /// Only symbols individually enabled for tracking.
    pub only_enabled_symbols: bool,
    /// Only symbols whose watchlist has at least one assigned instance.
    pub require_assigned_instances: bool,
}

impl Default for TrackedSymbolFilter {
    fn default() -> Self {
        Self {
            only_active_watchlists: true,
            only_enabled_symbols: true,
            require_assigned_instances: true,
        }
    }
}

/// Exit thresholds for one trade mode, all in price points.
///
/// A `None` threshold is simply not evaluated; an entry with every field
/// unset disables auto-exit for that mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub target_points: Option<Decimal>,
    pub stoploss_points: Option<Decimal>,
    pub trailing_points: Option<Decimal>,
    /// Unrealized profit (points) required before the trailing stop arms.
    /// `None` arms the trailing stop from the first evaluation.
    pub trailing_activation_points: Option<Decimal>,
}

impl RiskThresholds {
    pub fn is_empty(&self) -> bool {
        self.target_points.is_none()
            && self.stoploss_points.is_none()
            && self.trailing_points.is_none()
    }
}

/// Auto-exit configuration for one tracked symbol or underlying.
///
/// `symbol` may name a concrete instrument or an underlying; derivative
/// positions resolve to it by prefix when no exact entry exists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskConfigEntry {
    pub symbol: String,
    pub exchange: Option<String>,
    /// Instrument type configured on the watchlist row (e.g. "FUT"),
    /// consulted when the symbol shape alone can't determine trade mode.
    pub instrument_type: Option<String>,
    pub direct: RiskThresholds,
    pub futures: RiskThresholds,
    pub options: RiskThresholds,
}

impl RiskConfigEntry {
    pub fn thresholds_for(&self, mode: TradeMode) -> &RiskThresholds {
        match mode {
            TradeMode::Direct => &self.direct,
            TradeMode::Futures => &self.futures,
            TradeMode::Options => &self.options,
        }
    }
}
