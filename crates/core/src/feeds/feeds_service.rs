use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, warn};
use tradedesk_broker::{
    BrokerClient, BrokerError, CircuitBreaker, CircuitBreakerConfig, QuoteTick, SymbolRef,
};

use super::feeds_model::{
    FeedData, FeedKind, FeedSnapshot, FeedTtlConfig, QuoteFetchOptions, SymbolQuoteEntry,
};
use crate::constants;
use crate::errors::{Result, ValidationError};
use crate::instances::{Instance, InstanceRegistry};
use crate::watchlist::{TrackedSymbolFilter, WatchlistProviderTrait};

/// Feed layer configuration.
#[derive(Clone, Debug)]
pub struct FeedServiceConfig {
    pub ttl: FeedTtlConfig,
    pub circuit: CircuitBreakerConfig,
    /// Symbols per quote batch.
    pub quote_batch_size: usize,
    /// Cap on quote batches per pool member in one sweep.
    pub max_batches_per_instance: usize,
    /// Pool members tried before giving up on a symbol in the fallback path.
    pub max_fallback_attempts: usize,
}

impl Default for FeedServiceConfig {
    fn default() -> Self {
        Self {
            ttl: FeedTtlConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            quote_batch_size: constants::QUOTE_BATCH_SIZE,
            max_batches_per_instance: constants::MAX_BATCHES_PER_INSTANCE,
            max_fallback_attempts: constants::MAX_FALLBACK_ATTEMPTS,
        }
    }
}

/// TTL-bounded feed caches with circuit breaking and instance pooling.
///
/// Cache reads ([`get_snapshot`](Self::get_snapshot),
/// [`fetch_quotes_for_symbols`](Self::fetch_quotes_for_symbols)) degrade to
/// stale or partial data; upstream failures only ever surface in the
/// refresh paths, where they feed the circuit breaker and the log.
pub struct FeedCacheService {
    client: Arc<dyn BrokerClient>,
    registry: Arc<InstanceRegistry>,
    watchlist: Arc<dyn WatchlistProviderTrait>,
    breaker: CircuitBreaker,
    /// Latest fetch result per (instance, feed). Last write wins by
    /// completion order.
    snapshots: DashMap<(String, FeedKind), FeedSnapshot>,
    /// Projection of the most recent quote per (exchange, symbol),
    /// instance-independent. Only quote fetches write here.
    symbol_quotes: DashMap<(String, String), SymbolQuoteEntry>,
    /// Round-robin cursor for batch assignment across the pool.
    rr_cursor: AtomicUsize,
    config: FeedServiceConfig,
}

fn circuit_key(instance_id: &str, feed: FeedKind) -> String {
    format!("{}:{}", instance_id, feed)
}

fn symbol_key(symbol: &SymbolRef) -> (String, String) {
    (symbol.exchange.clone(), symbol.symbol.clone())
}

impl FeedCacheService {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        registry: Arc<InstanceRegistry>,
        watchlist: Arc<dyn WatchlistProviderTrait>,
        config: FeedServiceConfig,
    ) -> Self {
        let breaker = CircuitBreaker::with_config(config.circuit.clone());
        Self {
            client,
            registry,
            watchlist,
            breaker,
            snapshots: DashMap::new(),
            symbol_quotes: DashMap::new(),
            rr_cursor: AtomicUsize::new(0),
            config,
        }
    }

    /// Returns whatever is cached for (instance, feed) - possibly stale,
    /// possibly absent. Never blocks on the network.
    pub fn get_snapshot(&self, instance_id: &str, feed: FeedKind) -> Option<FeedSnapshot> {
        self.snapshots
            .get(&(instance_id.to_string(), feed))
            .map(|entry| entry.value().clone())
    }

    /// The circuit breaker, for health/metrics surfaces.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Triggers the refresh routine for all eligible instances.
    ///
    /// Without `force`, a per-instance (or per-symbol, for quotes) fetch is
    /// skipped while its cached data is within TTL.
    pub async fn refresh(&self, feed: FeedKind, force: bool) {
        match feed {
            FeedKind::Quotes => self.refresh_quotes(force).await,
            _ => self.refresh_books(feed, force).await,
        }
    }

    /// Refreshes one (instance, feed) pair, respecting TTL unless forced.
    pub async fn refresh_instance(
        &self,
        instance_id: &str,
        feed: FeedKind,
        force: bool,
    ) -> Result<()> {
        if feed == FeedKind::Quotes {
            return Err(ValidationError::InvalidInput(
                "quotes are symbol-driven; use fetch_quotes_for_symbols".to_string(),
            )
            .into());
        }
        let instance = self.registry.get(instance_id)?;
        if !force && self.snapshot_is_fresh(instance_id, feed) {
            return Ok(());
        }
        self.guarded_fetch(&instance, feed).await;
        Ok(())
    }

    /// Ad-hoc quote path for arbitrary symbol lists.
    ///
    /// Cached entries within TTL are served as-is; only the missing
    /// remainder hits upstream. Symbols that cannot be resolved are omitted
    /// from the result - callers must tolerate partial results.
    pub async fn fetch_quotes_for_symbols(
        &self,
        symbols: &[SymbolRef],
        options: &QuoteFetchOptions,
    ) -> Vec<QuoteTick> {
        let ttl = if options.order_critical {
            self.config.ttl.order_critical_quotes
        } else {
            options.ttl.unwrap_or(self.config.ttl.quotes)
        };

        let mut served = Vec::with_capacity(symbols.len());
        let mut missing = Vec::new();
        for symbol in symbols {
            match self.symbol_quotes.get(&symbol_key(symbol)) {
                Some(entry) if entry.is_fresh(ttl) => served.push(entry.quote.clone()),
                _ => missing.push(symbol.clone()),
            }
        }
        if missing.is_empty() {
            return served;
        }

        let pool = self.registry.market_data_pool();
        if pool.is_empty() {
            warn!(
                "No market-data instance available; serving {} of {} symbols from cache",
                served.len(),
                symbols.len()
            );
            return served;
        }

        let fetched = if pool.len() > 1 && options.use_fallback {
            self.fetch_with_fallback(&pool, missing).await
        } else {
            self.fetch_chunked(&pool[0], missing).await
        };
        served.extend(fetched);
        served
    }

    /// Drops the mutation-sensitive caches for one instance after an order
    /// action, optionally re-fetching immediately.
    pub async fn invalidate_instance_caches(
        &self,
        instance_id: &str,
        feeds: Option<&[FeedKind]>,
        refresh: bool,
    ) -> Result<()> {
        let instance = self.registry.get(instance_id)?;
        let defaults = FeedKind::mutation_sensitive();
        let feeds = feeds.unwrap_or(&defaults);

        for feed in feeds {
            self.snapshots.remove(&(instance_id.to_string(), *feed));
        }
        debug!(
            "Invalidated {} feed cache(s) for instance '{}'",
            feeds.len(),
            instance_id
        );

        if refresh {
            let tasks = feeds
                .iter()
                .filter(|feed| **feed != FeedKind::Quotes)
                .map(|feed| self.guarded_fetch(&instance, *feed));
            join_all(tasks).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduled refresh internals
    // -----------------------------------------------------------------------

    fn snapshot_is_fresh(&self, instance_id: &str, feed: FeedKind) -> bool {
        self.snapshots
            .get(&(instance_id.to_string(), feed))
            .map(|snapshot| snapshot.is_fresh(self.config.ttl.ttl_for(feed)))
            .unwrap_or(false)
    }

    /// Refreshes a book feed (positions/funds/orderbook/tradebook) for every
    /// active instance concurrently. One instance failing never blocks or
    /// fails the others.
    async fn refresh_books(&self, feed: FeedKind, force: bool) {
        let instances = self.registry.list_active();
        let tasks = instances
            .iter()
            .filter(|instance| force || !self.snapshot_is_fresh(&instance.id, feed))
            .map(|instance| self.guarded_fetch(instance, feed));
        join_all(tasks).await;
    }

    /// Scheduled quote refresh: one global tracked-symbol list, chunked into
    /// bounded batches assigned round-robin across the pool.
    async fn refresh_quotes(&self, force: bool) {
        let tracked = match self
            .watchlist
            .get_tracked_symbols(&TrackedSymbolFilter::default())
            .await
        {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!("Failed to load tracked symbols, skipping quote refresh: {}", e);
                return;
            }
        };

        let ttl = self.config.ttl.quotes;
        let symbols: Vec<SymbolRef> = tracked
            .into_iter()
            .filter(|symbol| {
                force
                    || !self
                        .symbol_quotes
                        .get(&symbol_key(symbol))
                        .map(|entry| entry.is_fresh(ttl))
                        .unwrap_or(false)
            })
            .collect();
        if symbols.is_empty() {
            return;
        }

        let pool = self.registry.market_data_pool();
        if pool.is_empty() {
            warn!("No market-data instance available for quote refresh");
            return;
        }

        // Keep batches small, but never spawn more of them than the pool can
        // reasonably absorb in one sweep.
        let mut batch_size = self.config.quote_batch_size.max(1);
        let max_batches = (pool.len() * self.config.max_batches_per_instance).max(1);
        if symbols.len() > batch_size * max_batches {
            batch_size = symbols.len().div_ceil(max_batches);
        }
        let batches: Vec<Vec<SymbolRef>> =
            symbols.chunks(batch_size).map(|chunk| chunk.to_vec()).collect();

        let start = self.rr_cursor.fetch_add(batches.len(), Ordering::Relaxed);
        let tasks = batches.into_iter().enumerate().map(|(index, batch)| {
            let instance = pool[(start + index) % pool.len()].clone();
            async move { self.fetch_quote_batch(&instance, batch).await }
        });
        let results = join_all(tasks).await;

        // One instance may have served several batches; merge them into its
        // quotes snapshot.
        let mut per_instance: HashMap<String, Vec<QuoteTick>> = HashMap::new();
        for (instance_id, quotes) in results.into_iter().flatten() {
            per_instance.entry(instance_id).or_default().extend(quotes);
        }
        for (instance_id, quotes) in per_instance {
            self.snapshots.insert(
                (instance_id, FeedKind::Quotes),
                FeedSnapshot::new(FeedData::Quotes(quotes)),
            );
        }
    }

    /// Fetches one quote batch through the breaker, projecting successes
    /// into the symbol-level cache.
    async fn fetch_quote_batch(
        &self,
        instance: &Instance,
        batch: Vec<SymbolRef>,
    ) -> Option<(String, Vec<QuoteTick>)> {
        let key = circuit_key(&instance.id, FeedKind::Quotes);
        if !self.breaker.is_allowed(&key) {
            return None;
        }
        match self.client.get_quotes(&instance.session(), &batch).await {
            Ok(quotes) => {
                self.breaker.record_success(&key);
                self.project_symbol_quotes(&quotes);
                Some((instance.id.clone(), quotes))
            }
            Err(e) => {
                warn!(
                    "Quote fetch failed on instance '{}' ({} symbols): {}",
                    instance.id,
                    batch.len(),
                    e
                );
                self.breaker.record_failure(&key, &e);
                None
            }
        }
    }

    /// Fetches one book feed through the breaker, preserving any stale
    /// snapshot on failure.
    async fn guarded_fetch(&self, instance: &Instance, feed: FeedKind) {
        let key = circuit_key(&instance.id, feed);
        if !self.breaker.is_allowed(&key) {
            return;
        }
        match self.fetch_feed(instance, feed).await {
            Ok(data) => {
                self.breaker.record_success(&key);
                self.snapshots
                    .insert((instance.id.clone(), feed), FeedSnapshot::new(data));
            }
            Err(e) => {
                warn!(
                    "{} refresh failed for instance '{}': {}",
                    feed, instance.id, e
                );
                self.breaker.record_failure(&key, &e);
            }
        }
    }

    async fn fetch_feed(
        &self,
        instance: &Instance,
        feed: FeedKind,
    ) -> std::result::Result<FeedData, BrokerError> {
        let session = instance.session();
        match feed {
            FeedKind::Positions => self
                .client
                .get_position_book(&session)
                .await
                .map(FeedData::Positions),
            FeedKind::Funds => self.client.get_funds(&session).await.map(FeedData::Funds),
            FeedKind::Orderbook => self
                .client
                .get_order_book(&session)
                .await
                .map(FeedData::Orders),
            FeedKind::Tradebook => self
                .client
                .get_trade_book(&session)
                .await
                .map(FeedData::Trades),
            FeedKind::Quotes => Ok(FeedData::Quotes(Vec::new())),
        }
    }

    // -----------------------------------------------------------------------
    // Ad-hoc quote internals
    // -----------------------------------------------------------------------

    /// Tries the pool members in order, narrowing the symbol list to what
    /// earlier members could not serve. Symbols still unresolved after the
    /// bounded attempts are dropped.
    async fn fetch_with_fallback(
        &self,
        pool: &[Instance],
        mut remaining: Vec<SymbolRef>,
    ) -> Vec<QuoteTick> {
        let mut collected = Vec::new();
        for instance in pool.iter().take(self.config.max_fallback_attempts) {
            if remaining.is_empty() {
                break;
            }
            let key = circuit_key(&instance.id, FeedKind::Quotes);
            if !self.breaker.is_allowed(&key) {
                continue;
            }
            match self.client.get_quotes(&instance.session(), &remaining).await {
                Ok(quotes) => {
                    self.breaker.record_success(&key);
                    self.project_symbol_quotes(&quotes);
                    let resolved: HashSet<(String, String)> = quotes
                        .iter()
                        .map(|quote| (quote.exchange.clone(), quote.symbol.clone()))
                        .collect();
                    remaining.retain(|symbol| !resolved.contains(&symbol_key(symbol)));
                    collected.extend(quotes);
                }
                Err(e) => {
                    warn!(
                        "Fallback quote fetch failed on instance '{}': {}",
                        instance.id, e
                    );
                    self.breaker.record_failure(&key, &e);
                }
            }
        }
        if !remaining.is_empty() {
            debug!("{} symbols unresolved after fallback", remaining.len());
        }
        collected
    }

    /// Single-instance path: chunk and fetch in parallel batches, merging
    /// whatever batches succeed.
    async fn fetch_chunked(&self, instance: &Instance, missing: Vec<SymbolRef>) -> Vec<QuoteTick> {
        let batch_size = self.config.quote_batch_size.max(1);
        let tasks = missing
            .chunks(batch_size)
            .map(|chunk| self.fetch_quote_batch(instance, chunk.to_vec()));
        join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .flat_map(|(_, quotes)| quotes)
            .collect()
    }

    fn project_symbol_quotes(&self, quotes: &[QuoteTick]) {
        for quote in quotes {
            self.symbol_quotes.insert(
                (quote.exchange.clone(), quote.symbol.clone()),
                SymbolQuoteEntry::new(quote.clone()),
            );
        }
    }
}
