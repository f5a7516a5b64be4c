use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use tradedesk_broker::{BrokerClient, ClosePositionRequest, Position, SymbolRef, TradeMode};

use super::autoexit_model::{AutoExitConfig, ExitReason, PositionKey, TrailingState};
use super::evaluator;
use crate::errors::Result;
use crate::feeds::{FeedCacheService, FeedKind, QuoteFetchOptions};
use crate::instances::{Instance, InstanceRegistry};
use crate::watchlist::{RiskConfigEntry, WatchlistProviderTrait};

/// The per-position risk-exit engine.
///
/// Each sweep walks the latest position snapshots of every active instance,
/// resolves risk configuration per position, evaluates thresholds against
/// order-critical quotes, and submits at most one close per position per
/// pending-exit window. A close is only ever routed through the position's
/// owning instance session, which carries the analyzer flag; an
/// analyzer-mode instance therefore never receives a live order from here.
pub struct AutoExitEngine {
    client: Arc<dyn BrokerClient>,
    registry: Arc<InstanceRegistry>,
    feeds: Arc<FeedCacheService>,
    watchlist: Arc<dyn WatchlistProviderTrait>,
    /// Running extremes per tracked position key.
    trailing: DashMap<PositionKey, TrailingState>,
    /// Trigger time per position key, for the pending-exit debounce.
    pending: DashMap<PositionKey, Instant>,
    /// Reentrancy guard: a sweep is skipped while the previous one runs.
    sweep_active: AtomicBool,
    config: AutoExitConfig,
}

impl AutoExitEngine {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        registry: Arc<InstanceRegistry>,
        feeds: Arc<FeedCacheService>,
        watchlist: Arc<dyn WatchlistProviderTrait>,
        config: AutoExitConfig,
    ) -> Self {
        Self {
            client,
            registry,
            feeds,
            watchlist,
            trailing: DashMap::new(),
            pending: DashMap::new(),
            sweep_active: AtomicBool::new(false),
            config,
        }
    }

    /// Runs one monitoring sweep, unless the previous one is still going.
    pub async fn run_sweep(&self) {
        if self.sweep_active.swap(true, Ordering::SeqCst) {
            debug!("Previous auto-exit sweep still running, skipping this tick");
            return;
        }
        self.sweep().await;
        self.sweep_active.store(false, Ordering::SeqCst);
    }

    /// Clears trailing and pending state. Called when the engine stops;
    /// both are rebuilt from scratch on the next sweep.
    pub fn clear_state(&self) {
        self.trailing.clear();
        self.pending.clear();
    }

    async fn sweep(&self) {
        let entries = match self.watchlist.get_symbols_with_auto_exit_config().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load auto-exit configuration, skipping sweep: {}", e);
                return;
            }
        };
        if entries.is_empty() {
            return;
        }

        let open_positions = self.collect_open_positions().await;

        // Positions whose quantity returned to zero leave the lifecycle:
        // their trailing extremes and pending windows are dropped.
        let live_keys: HashSet<PositionKey> = open_positions
            .iter()
            .map(|(_, position)| position_key(position))
            .collect();
        self.trailing.retain(|key, _| live_keys.contains(key));
        self.pending.retain(|key, _| live_keys.contains(key));

        // Pair each open position with its configuration, if any.
        let tracked: Vec<(Instance, Position, RiskConfigEntry)> = open_positions
            .into_iter()
            .filter_map(|(instance, position)| {
                evaluator::resolve_config(&position.symbol, &entries)
                    .cloned()
                    .map(|entry| (instance, position, entry))
            })
            .collect();
        if tracked.is_empty() {
            return;
        }

        // One order-critical quote fetch for every tracked symbol.
        let symbols: Vec<SymbolRef> = tracked
            .iter()
            .map(|(_, position, _)| SymbolRef::new(&position.exchange, &position.symbol))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let quotes = self
            .feeds
            .fetch_quotes_for_symbols(
                &symbols,
                &QuoteFetchOptions {
                    ttl: None,
                    order_critical: true,
                    use_fallback: true,
                },
            )
            .await;
        let prices: HashMap<(String, String), Decimal> = quotes
            .into_iter()
            .map(|quote| ((quote.exchange, quote.symbol), quote.ltp))
            .collect();

        for (instance, position, entry) in tracked {
            let key = position_key(&position);

            // EXIT_TRIGGERED is a no-op state while the pending window is
            // open; once it elapses the position re-enters MONITORING.
            if let Some(triggered_at) = self.pending.get(&key).map(|e| *e.value()) {
                if triggered_at.elapsed() < self.config.pending_exit_window {
                    continue;
                }
                self.pending.remove(&key);
            }

            let Some(price) =
                prices.get(&(position.exchange.clone(), position.symbol.clone())).copied()
            else {
                debug!(
                    "No current price for {}:{}, deferring evaluation",
                    position.exchange, position.symbol
                );
                continue;
            };

            let mode = evaluator::resolve_trade_mode(&position.symbol, &entry);
            let thresholds = entry.thresholds_for(mode);
            if thresholds.is_empty() {
                continue;
            }

            let trailing_snapshot = if thresholds.trailing_points.is_some() {
                let mut guard = self
                    .trailing
                    .entry(key.clone())
                    .or_insert_with(|| TrailingState::new(price));
                evaluator::update_trailing(guard.value_mut(), &position, thresholds, price);
                Some(*guard.value())
            } else {
                None
            };

            if let Some(reason) =
                evaluator::evaluate(&position, thresholds, trailing_snapshot.as_ref(), price)
            {
                self.submit_exit(&instance, &position, mode, reason).await;
                // Pending regardless of close success: a failed close is
                // re-evaluated once the window expires.
                self.pending.insert(key, Instant::now());
            }
        }
    }

    /// Gathers open positions from the latest snapshots, fetching a
    /// snapshot for instances that have none yet.
    async fn collect_open_positions(&self) -> Vec<(Instance, Position)> {
        let mut open = Vec::new();
        for instance in self.registry.list_active() {
            if self
                .feeds
                .get_snapshot(&instance.id, FeedKind::Positions)
                .is_none()
            {
                let _ = self
                    .feeds
                    .refresh_instance(&instance.id, FeedKind::Positions, true)
                    .await;
            }
            let Some(snapshot) = self.feeds.get_snapshot(&instance.id, FeedKind::Positions)
            else {
                continue;
            };
            if let Some(positions) = snapshot.data.positions() {
                for position in positions.iter().filter(|p| p.is_open()) {
                    open.push((instance.clone(), position.clone()));
                }
            }
        }
        open
    }

    async fn submit_exit(
        &self,
        instance: &Instance,
        position: &Position,
        mode: TradeMode,
        reason: ExitReason,
    ) {
        let request = ClosePositionRequest {
            exchange: position.exchange.clone(),
            symbol: position.symbol.clone(),
            product: Some(position.product.clone()),
            trade_mode: mode,
            strategy: self.config.strategy.clone(),
            reason: reason.as_tag().to_string(),
        };

        match self.client.close_position(&instance.session(), &request).await {
            Ok(result) => {
                info!(
                    "Auto-exit {} for {}:{} on instance '{}' ({}), order {:?}",
                    reason,
                    position.exchange,
                    position.symbol,
                    instance.id,
                    mode.as_str(),
                    result.order_id
                );
            }
            Err(e) => {
                // Not retried synchronously; the next sweep re-evaluates
                // once the pending window expires.
                error!(
                    "Auto-exit close failed for {}:{} on instance '{}' ({}): {}",
                    position.exchange,
                    position.symbol,
                    instance.id,
                    mode.as_str(),
                    e
                );
            }
        }
    }

    /// Square-off-everything control: cancels working orders per instance,
    /// then closes every open position. Failures are logged and skipped;
    /// returns the number of close requests submitted.
    pub async fn close_all_positions(&self) -> Result<usize> {
        let mut closed = 0;
        for instance in self.registry.list_active() {
            let session = instance.session();
            if let Err(e) = self
                .client
                .cancel_all_orders(&session, &self.config.strategy)
                .await
            {
                warn!(
                    "Cancel-all failed on instance '{}': {}",
                    instance.id, e
                );
            }

            let _ = self
                .feeds
                .refresh_instance(&instance.id, FeedKind::Positions, true)
                .await;
            let Some(snapshot) = self.feeds.get_snapshot(&instance.id, FeedKind::Positions)
            else {
                continue;
            };
            let Some(positions) = snapshot.data.positions().map(<[Position]>::to_vec) else {
                continue;
            };

            for position in positions.iter().filter(|p| p.is_open()) {
                let mode =
                    evaluator::trade_mode_from_shape(&position.symbol).unwrap_or(TradeMode::Direct);
                self.submit_exit(&instance, position, mode, ExitReason::ManualExitAll)
                    .await;
                self.pending.insert(position_key(position), Instant::now());
                closed += 1;
            }

            // The books just changed upstream; drop the cached views.
            self.feeds
                .invalidate_instance_caches(&instance.id, None, false)
                .await?;
        }
        Ok(closed)
    }
}

fn position_key(position: &Position) -> PositionKey {
    PositionKey::new(&position.instance_id, &position.exchange, &position.symbol)
}
