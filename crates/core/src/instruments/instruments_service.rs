use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use tradedesk_broker::BrokerClient;

use super::instruments_model::{
    parse_expiry, Instrument, OptionChain, OptionChainStrike, OptionSide, RefreshLogEntry,
    RefreshStatus, RefreshSummary, SearchFilters,
};
use super::instruments_traits::InstrumentRepositoryTrait;
use crate::constants;
use crate::errors::{Error, Result, ValidationError};
use crate::instances::InstanceRegistry;

/// Catalog service configuration.
#[derive(Clone, Debug)]
pub struct InstrumentServiceConfig {
    /// Catalog age beyond which a refresh is due.
    pub max_age_hours: i64,
    /// Exchanges covered by a full refresh.
    pub supported_exchanges: Vec<String>,
    pub search_default_limit: i64,
    pub search_max_limit: i64,
    pub search_min_query_len: usize,
}

impl Default for InstrumentServiceConfig {
    fn default() -> Self {
        Self {
            max_age_hours: constants::INSTRUMENT_MAX_AGE_HOURS,
            supported_exchanges: constants::SUPPORTED_EXCHANGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            search_default_limit: constants::SEARCH_DEFAULT_LIMIT,
            search_max_limit: constants::SEARCH_MAX_LIMIT,
            search_min_query_len: constants::SEARCH_MIN_QUERY_LEN,
        }
    }
}

/// The instrument catalog service: staleness tracking, guarded refresh,
/// search, expiry lookup and option-chain construction.
pub struct InstrumentService {
    repository: Arc<dyn InstrumentRepositoryTrait>,
    client: Arc<dyn BrokerClient>,
    registry: Arc<InstanceRegistry>,
    /// Scopes with a refresh in flight. The only mutual exclusion this
    /// service needs: overlapping refreshes of one scope are rejected.
    in_flight: Mutex<HashSet<String>>,
    config: InstrumentServiceConfig,
}

fn scope_key(exchange: Option<&str>) -> String {
    exchange
        .map(str::to_uppercase)
        .unwrap_or_else(|| "ALL".to_string())
}

impl InstrumentService {
    pub fn new(
        repository: Arc<dyn InstrumentRepositoryTrait>,
        client: Arc<dyn BrokerClient>,
        registry: Arc<InstanceRegistry>,
        config: InstrumentServiceConfig,
    ) -> Self {
        Self {
            repository,
            client,
            registry,
            in_flight: Mutex::new(HashSet::new()),
            config,
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| {
            warn!("Instrument refresh guard mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// True when the scope has no rows, no completed refresh, or its most
    /// recent completed refresh is older than the configured maximum.
    pub fn needs_refresh(&self, exchange: Option<&str>) -> Result<bool> {
        if self.repository.count(exchange)? == 0 {
            return Ok(true);
        }
        match self.repository.latest_completed_refresh(exchange)? {
            None => Ok(true),
            Some(entry) => {
                let reference = entry.completed_at.unwrap_or(entry.started_at);
                let age = Utc::now() - reference;
                Ok(age > ChronoDuration::hours(self.config.max_age_hours))
            }
        }
    }

    /// Fetches and atomically replaces the catalog for one exchange, or for
    /// every supported exchange when no scope is given.
    ///
    /// Exchanges are refreshed independently: one exchange failing is
    /// recorded as a `failed` log entry (previous catalog left intact) and
    /// the rest proceed. A refresh already running for the same scope is
    /// rejected with a distinct [`Error::Conflict`].
    pub async fn refresh_instruments(
        &self,
        exchange: Option<&str>,
        instance_id: Option<&str>,
    ) -> Result<RefreshSummary> {
        let scope = scope_key(exchange);
        {
            let mut in_flight = self.lock_in_flight();
            if !in_flight.insert(scope.clone()) {
                return Err(Error::Conflict(format!(
                    "instrument refresh already in progress for scope '{}'",
                    scope
                )));
            }
        }

        let result = self.refresh_locked(exchange, instance_id).await;
        self.lock_in_flight().remove(&scope);
        result
    }

    async fn refresh_locked(
        &self,
        exchange: Option<&str>,
        instance_id: Option<&str>,
    ) -> Result<RefreshSummary> {
        let started = Instant::now();
        let instance = match instance_id {
            Some(id) => self.registry.get(id)?,
            None => self
                .registry
                .market_data_pool()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Error::NotFound("no active instance available for instrument refresh".to_string())
                })?,
        };
        let session = instance.session();

        let exchanges: Vec<String> = match exchange {
            Some(ex) => vec![ex.to_uppercase()],
            None => self.config.supported_exchanges.clone(),
        };

        let mut summary = RefreshSummary::default();
        let mut last_error: Option<Error> = None;

        for ex in &exchanges {
            let log_entry = RefreshLogEntry::begin(Some(ex));
            self.repository.insert_refresh_log(&log_entry).await?;

            let outcome = match self.client.get_instruments(&session, ex).await {
                Ok(records) => {
                    let rows: Vec<Instrument> =
                        records.into_iter().map(Instrument::from).collect();
                    self.repository.replace_for_exchange(ex, rows).await
                }
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(stored) => {
                    self.repository
                        .complete_refresh_log(
                            &log_entry.id,
                            RefreshStatus::Completed,
                            stored as i64,
                            None,
                        )
                        .await?;
                    info!("Instrument catalog for {} replaced: {} rows", ex, stored);
                    summary.refreshed.push((ex.clone(), stored));
                }
                Err(e) => {
                    let message = e.to_string();
                    self.repository
                        .complete_refresh_log(
                            &log_entry.id,
                            RefreshStatus::Failed,
                            0,
                            Some(message.clone()),
                        )
                        .await?;
                    warn!(
                        "Instrument refresh for {} failed ({}); previous catalog left intact",
                        ex, message
                    );
                    summary.failed.push((ex.clone(), message));
                    last_error = Some(e);
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;

        // A single-exchange refresh surfaces its failure; a full refresh
        // reports partial results through the summary instead.
        if exchanges.len() == 1 && summary.refreshed.is_empty() {
            if let Some(error) = last_error {
                return Err(error);
            }
        }
        Ok(summary)
    }

    /// Relevance-ranked catalog search.
    pub fn search_instruments(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Instrument>> {
        let trimmed = query.trim();
        if trimmed.chars().count() < self.config.search_min_query_len {
            return Err(ValidationError::InvalidInput(format!(
                "search query must be at least {} characters",
                self.config.search_min_query_len
            ))
            .into());
        }
        let limit = filters
            .limit
            .unwrap_or(self.config.search_default_limit)
            .clamp(1, self.config.search_max_limit);

        self.repository.search(
            trimmed,
            filters.exchange.as_deref(),
            filters.instrument_type.as_deref(),
            limit,
        )
    }

    /// Distinct expiry dates for a symbol prefix, earliest first where the
    /// spelling is parseable.
    pub fn get_expiries(&self, symbol: &str, exchange: &str) -> Result<Vec<String>> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ValidationError::MissingField("symbol".to_string()).into());
        }
        let mut expiries = self.repository.distinct_expiries(symbol, exchange)?;
        expiries.sort_by(|a, b| match (parse_expiry(a), parse_expiry(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        Ok(expiries)
    }

    /// Builds the option chain for one underlying and expiry: strike rows
    /// ascending, each carrying whichever of call/put exist.
    pub fn build_option_chain(
        &self,
        symbol: &str,
        expiry: &str,
        exchange: &str,
    ) -> Result<OptionChain> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ValidationError::MissingField("symbol".to_string()).into());
        }
        if expiry.trim().is_empty() {
            return Err(ValidationError::MissingField("expiry".to_string()).into());
        }

        let rows = self.repository.list_for_chain(symbol, expiry, exchange)?;
        let mut strikes: BTreeMap<rust_decimal::Decimal, OptionChainStrike> = BTreeMap::new();
        for instrument in rows {
            let Some(side) = instrument.option_side() else {
                continue;
            };
            let Some(strike) = instrument.strike else {
                continue;
            };
            let row = strikes.entry(strike).or_insert_with(|| OptionChainStrike {
                strike,
                ce: None,
                pe: None,
            });
            match side {
                OptionSide::Call => row.ce = Some(instrument),
                OptionSide::Put => row.pe = Some(instrument),
            }
        }

        Ok(OptionChain {
            symbol: symbol.to_string(),
            expiry: expiry.to_string(),
            exchange: exchange.to_string(),
            strikes: strikes.into_values().collect(),
        })
    }

    /// Staleness-check hook for the scheduler: refreshes everything when
    /// due, quietly standing down if a refresh is already running.
    pub async fn ensure_fresh(&self) {
        match self.needs_refresh(None) {
            Ok(false) => {}
            Ok(true) => match self.refresh_instruments(None, None).await {
                Ok(summary) => info!(
                    "Scheduled instrument refresh stored {} rows in {} ms",
                    summary.total_instruments(),
                    summary.duration_ms
                ),
                Err(e) if e.is_conflict() => {
                    debug!("Scheduled instrument refresh skipped: already in progress")
                }
                Err(e) => warn!("Scheduled instrument refresh failed: {}", e),
            },
            Err(e) => warn!("Instrument staleness check failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    use crate::instances::MarketDataRole;
    use crate::test_support::{register_instance, MockBrokerClient};
    use tradedesk_broker::InstrumentRecord;

    /// In-memory repository; `replace_delay` simulates a slow catalog
    /// replace so overlapping refreshes can be provoked.
    #[derive(Default)]
    struct MemoryInstrumentRepository {
        rows: Mutex<Vec<Instrument>>,
        log: Mutex<Vec<RefreshLogEntry>>,
        replace_calls: AtomicUsize,
        last_search_limit: AtomicUsize,
        replace_delay: Option<Duration>,
    }

    #[async_trait]
    impl InstrumentRepositoryTrait for MemoryInstrumentRepository {
        fn count(&self, exchange: Option<&str>) -> Result<i64> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|row| exchange.map(|ex| row.exchange == ex).unwrap_or(true))
                .count() as i64)
        }

        async fn replace_for_exchange(
            &self,
            exchange: &str,
            new_rows: Vec<Instrument>,
        ) -> Result<usize> {
            if let Some(delay) = self.replace_delay {
                tokio::time::sleep(delay).await;
            }
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|row| row.exchange != exchange);
            let stored = new_rows.len();
            rows.extend(new_rows);
            Ok(stored)
        }

        fn search(
            &self,
            query: &str,
            exchange: Option<&str>,
            _instrument_type: Option<&str>,
            limit: i64,
        ) -> Result<Vec<Instrument>> {
            self.last_search_limit.store(limit as usize, Ordering::SeqCst);
            let needle = query.to_uppercase();
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|row| {
                    row.symbol.to_uppercase().contains(&needle)
                        && exchange.map(|ex| row.exchange == ex).unwrap_or(true)
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }

        fn distinct_expiries(&self, symbol_prefix: &str, exchange: &str) -> Result<Vec<String>> {
            let rows = self.rows.lock().unwrap();
            let mut expiries: Vec<String> = rows
                .iter()
                .filter(|row| row.exchange == exchange && row.symbol.starts_with(symbol_prefix))
                .filter_map(|row| row.expiry.clone())
                .collect();
            expiries.dedup();
            Ok(expiries)
        }

        fn list_for_chain(
            &self,
            symbol_prefix: &str,
            expiry: &str,
            exchange: &str,
        ) -> Result<Vec<Instrument>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|row| {
                    row.exchange == exchange
                        && row.symbol.starts_with(symbol_prefix)
                        && row.expiry.as_deref() == Some(expiry)
                })
                .cloned()
                .collect())
        }

        fn latest_completed_refresh(
            &self,
            exchange: Option<&str>,
        ) -> Result<Option<RefreshLogEntry>> {
            let log = self.log.lock().unwrap();
            Ok(log
                .iter()
                .filter(|entry| entry.status == RefreshStatus::Completed)
                .filter(|entry| match exchange {
                    Some(ex) => entry.exchange.as_deref() == Some(ex),
                    None => true,
                })
                .max_by_key(|entry| entry.started_at)
                .cloned())
        }

        async fn insert_refresh_log(&self, entry: &RefreshLogEntry) -> Result<()> {
            self.log.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn complete_refresh_log(
            &self,
            id: &str,
            status: RefreshStatus,
            instrument_count: i64,
            error_message: Option<String>,
        ) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            if let Some(entry) = log.iter_mut().find(|entry| entry.id == id) {
                entry.status = status;
                entry.instrument_count = instrument_count;
                entry.completed_at = Some(Utc::now());
                entry.error_message = error_message;
            }
            Ok(())
        }
    }

    fn option_record(symbol: &str, strike: rust_decimal::Decimal) -> InstrumentRecord {
        InstrumentRecord {
            symbol: symbol.to_string(),
            broker_symbol: None,
            name: Some("NIFTY".to_string()),
            exchange: "NFO".to_string(),
            broker_exchange: None,
            token: None,
            expiry: Some("28-NOV-25".to_string()),
            strike: Some(strike),
            lot_size: 75,
            instrument_type: None,
            tick_size: Some(dec!(0.05)),
        }
    }

    fn service_with(
        repository: Arc<MemoryInstrumentRepository>,
    ) -> (Arc<MockBrokerClient>, Arc<InstanceRegistry>, InstrumentService) {
        let client = Arc::new(MockBrokerClient::new());
        let registry = Arc::new(InstanceRegistry::new());
        let service = InstrumentService::new(
            repository,
            client.clone(),
            registry.clone(),
            InstrumentServiceConfig::default(),
        );
        (client, registry, service)
    }

    #[tokio::test]
    async fn test_needs_refresh_lifecycle() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        let (client, registry, service) = service_with(repository.clone());
        register_instance(&registry, "main", MarketDataRole::Primary);

        // Empty catalog: refresh due.
        assert!(service.needs_refresh(Some("NSE")).unwrap());

        client.set_instruments("NSE", vec![option_record("SBIN", dec!(0))]);
        service.refresh_instruments(Some("NSE"), None).await.unwrap();
        assert!(!service.needs_refresh(Some("NSE")).unwrap());

        // Age the completed entry past the 24h bound.
        {
            let mut log = repository.log.lock().unwrap();
            for entry in log.iter_mut() {
                entry.completed_at = Some(Utc::now() - ChronoDuration::hours(25));
            }
        }
        assert!(service.needs_refresh(Some("NSE")).unwrap());
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_catalog_intact() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        let (client, registry, service) = service_with(repository.clone());
        let instance = register_instance(&registry, "main", MarketDataRole::Primary);

        client.set_instruments("NSE", vec![option_record("SBIN", dec!(0))]);
        service.refresh_instruments(Some("NSE"), None).await.unwrap();
        assert_eq!(repository.count(Some("NSE")).unwrap(), 1);

        client.set_failure(&instance.id, crate::test_support::FailureMode::Upstream);
        let result = service.refresh_instruments(Some("NSE"), None).await;
        assert!(result.is_err());
        assert_eq!(repository.count(Some("NSE")).unwrap(), 1);

        let log = repository.log.lock().unwrap();
        let failed = log.iter().filter(|e| e.status == RefreshStatus::Failed).count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_rejected() {
        let repository = Arc::new(MemoryInstrumentRepository {
            replace_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let (client, registry, service) = service_with(repository.clone());
        register_instance(&registry, "main", MarketDataRole::Primary);
        client.set_instruments("NSE", vec![option_record("SBIN", dec!(0))]);

        let (first, second) = futures::join!(
            service.refresh_instruments(Some("NSE"), None),
            service.refresh_instruments(Some("NSE"), None)
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(Error::Conflict(_)))));
        // Exactly one actual catalog replace happened.
        assert_eq!(repository.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_rejects_short_queries() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        let (_, _, service) = service_with(repository);

        let result = service.search_instruments(" a ", &SearchFilters::default());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_limit_is_clamped() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        let (_, _, service) = service_with(repository.clone());

        let filters = SearchFilters {
            limit: Some(9999),
            ..Default::default()
        };
        service.search_instruments("SBIN", &filters).unwrap();
        assert_eq!(repository.last_search_limit.load(Ordering::SeqCst), 500);

        let filters = SearchFilters {
            limit: Some(0),
            ..Default::default()
        };
        service.search_instruments("SBIN", &filters).unwrap();
        assert_eq!(repository.last_search_limit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiries_sorted_chronologically() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        {
            let mut rows = repository.rows.lock().unwrap();
            for expiry in ["05-DEC-25", "28-NOV-25", "29-JAN-26"] {
                let mut record: Instrument = option_record("NIFTY25X", dec!(24000)).into();
                record.expiry = Some(expiry.to_string());
                rows.push(record);
            }
        }
        let (_, _, service) = service_with(repository);

        let expiries = service.get_expiries("NIFTY", "NFO").unwrap();
        assert_eq!(expiries, vec!["28-NOV-25", "05-DEC-25", "29-JAN-26"]);
    }

    #[tokio::test]
    async fn test_option_chain_groups_by_strike() {
        let repository = Arc::new(MemoryInstrumentRepository::default());
        {
            let mut rows = repository.rows.lock().unwrap();
            rows.push(option_record("NIFTY28NOV2524000CE", dec!(24000)).into());
            rows.push(option_record("NIFTY28NOV2524000PE", dec!(24000)).into());
            rows.push(option_record("NIFTY28NOV2524100CE", dec!(24100)).into());
        }
        let (_, _, service) = service_with(repository);

        let chain = service
            .build_option_chain("NIFTY", "28-NOV-25", "NFO")
            .unwrap();
        assert_eq!(chain.strikes.len(), 2);

        let first = &chain.strikes[0];
        assert_eq!(first.strike, dec!(24000));
        assert_eq!(first.ce.as_ref().unwrap().symbol, "NIFTY28NOV2524000CE");
        assert_eq!(first.pe.as_ref().unwrap().symbol, "NIFTY28NOV2524000PE");

        // 24100 has no put leg.
        let second = &chain.strikes[1];
        assert_eq!(second.strike, dec!(24100));
        assert!(second.ce.is_some());
        assert!(second.pe.is_none());
    }
}
