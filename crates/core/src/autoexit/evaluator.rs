//! Pure threshold evaluation for the auto-exit engine.
//!
//! Everything here is synchronous and side-effect free; the engine owns the
//! surrounding state (trailing extremes, pending windows) and feeds it in.

use rust_decimal::Decimal;
use tradedesk_broker::{Position, TradeMode};

use super::autoexit_model::{ExitReason, TrailingState};
use crate::watchlist::{RiskConfigEntry, RiskThresholds};

/// Resolves the risk configuration for a position's symbol.
///
/// Exact symbol match wins; otherwise the position's symbol is matched by
/// underlying prefix, longest underlying first (a derivative like
/// `NIFTY28NOV2524000CE` resolves to the `NIFTY` entry). Prefix matching
/// can over-match symbols sharing a prefix (`NIFTY` vs `NIFTYNEXT50`);
/// longest-first ordering means the more specific entry wins whenever one
/// exists.
pub fn resolve_config<'a>(
    symbol: &str,
    entries: &'a [RiskConfigEntry],
) -> Option<&'a RiskConfigEntry> {
    if let Some(exact) = entries.iter().find(|entry| entry.symbol == symbol) {
        return Some(exact);
    }
    entries
        .iter()
        .filter(|entry| symbol.starts_with(entry.symbol.as_str()))
        .max_by_key(|entry| entry.symbol.len())
}

/// Determines the trade mode from the symbol's shape alone, when the shape
/// is conclusive.
pub fn trade_mode_from_shape(symbol: &str) -> Option<TradeMode> {
    if symbol.ends_with("CE") || symbol.ends_with("PE") {
        return Some(TradeMode::Options);
    }
    if symbol.ends_with("FUT") {
        return Some(TradeMode::Futures);
    }
    None
}

/// Determines the trade mode from the symbol's shape, falling back to the
/// type configured on the watchlist row.
pub fn resolve_trade_mode(symbol: &str, entry: &RiskConfigEntry) -> TradeMode {
    if let Some(mode) = trade_mode_from_shape(symbol) {
        return mode;
    }
    match entry.instrument_type.as_deref() {
        Some("FUT") | Some("FUTIDX") | Some("FUTSTK") => TradeMode::Futures,
        _ => TradeMode::Direct,
    }
}

/// Folds the current price into the trailing extremes and arms the trail
/// once the activation threshold is reached.
///
/// With no activation threshold configured the trail is armed from the
/// first evaluation. Once armed it stays armed.
pub fn update_trailing(
    state: &mut TrailingState,
    position: &Position,
    thresholds: &RiskThresholds,
    price: Decimal,
) {
    state.highest = state.highest.max(price);
    state.lowest = state.lowest.min(price);

    if state.activated {
        return;
    }
    match thresholds.trailing_activation_points {
        None => state.activated = true,
        Some(activation) => {
            let direction = if position.is_long() {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            let profit = (price - position.average_price) * direction;
            if profit >= activation {
                state.activated = true;
            }
        }
    }
}

/// Evaluates one position against its thresholds.
///
/// Precedence on simultaneous breach is target, then stop-loss, then
/// trailing; the first condition that holds wins. This ordering is a
/// documented policy choice.
pub fn evaluate(
    position: &Position,
    thresholds: &RiskThresholds,
    trailing: Option<&TrailingState>,
    price: Decimal,
) -> Option<ExitReason> {
    let entry = position.average_price;
    let long = position.is_long();

    if let Some(target_points) = thresholds.target_points {
        let breached = if long {
            price >= entry + target_points
        } else {
            price <= entry - target_points
        };
        if breached {
            return Some(ExitReason::TargetMet);
        }
    }

    if let Some(stop_points) = thresholds.stoploss_points {
        let breached = if long {
            price <= entry - stop_points
        } else {
            price >= entry + stop_points
        };
        if breached {
            return Some(ExitReason::StoplossHit);
        }
    }

    if let (Some(trailing_points), Some(state)) = (thresholds.trailing_points, trailing) {
        if state.activated {
            let breached = if long {
                price <= state.highest - trailing_points
            } else {
                price >= state.lowest + trailing_points
            };
            if breached {
                return Some(ExitReason::TrailingStopHit);
            }
        }
    }

    None
}
