//! Hand-rolled doubles for the upstream and watchlist collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tradedesk_broker::{
    BrokerClient, BrokerError, BrokerSession, ClosePositionRequest, Funds, InstrumentRecord,
    Order, OrderResult, Position, QuoteTick, SymbolRef, Trade,
};

use crate::errors::Result;
use crate::instances::{Instance, InstanceRegistry, MarketDataRole, NewInstance};
use crate::watchlist::{RiskConfigEntry, TrackedSymbolFilter, WatchlistProviderTrait};

/// How a mock instance misbehaves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureMode {
    Upstream,
    Malformed,
}

/// Programmable in-memory [`BrokerClient`] with call counters.
#[derive(Default)]
pub struct MockBrokerClient {
    prices: Mutex<HashMap<String, Decimal>>,
    positions: Mutex<HashMap<String, Vec<Position>>>,
    instruments: Mutex<HashMap<String, Vec<InstrumentRecord>>>,
    failures: Mutex<HashMap<String, FailureMode>>,
    pub quote_calls: AtomicUsize,
    pub position_calls: AtomicUsize,
    pub funds_calls: AtomicUsize,
    pub instrument_calls: AtomicUsize,
    pub close_requests: Mutex<Vec<(String, ClosePositionRequest)>>,
    pub cancel_calls: Mutex<Vec<(String, String)>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_positions(&self, instance_id: &str, positions: Vec<Position>) {
        self.positions
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), positions);
    }

    pub fn set_instruments(&self, exchange: &str, records: Vec<InstrumentRecord>) {
        self.instruments
            .lock()
            .unwrap()
            .insert(exchange.to_string(), records);
    }

    pub fn set_failure(&self, instance_id: &str, mode: FailureMode) {
        self.failures
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), mode);
    }

    pub fn clear_failure(&self, instance_id: &str) {
        self.failures.lock().unwrap().remove(instance_id);
    }

    pub fn quote_call_count(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn close_request_count(&self) -> usize {
        self.close_requests.lock().unwrap().len()
    }

    fn failure_for(&self, session: &BrokerSession) -> Option<BrokerError> {
        match self.failures.lock().unwrap().get(&session.instance_id) {
            Some(FailureMode::Upstream) => Some(BrokerError::Upstream {
                instance: session.instance_id.clone(),
                message: "HTTP 502".to_string(),
            }),
            Some(FailureMode::Malformed) => Some(BrokerError::Malformed {
                instance: session.instance_id.clone(),
                message: "expected JSON object".to_string(),
            }),
            None => None,
        }
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn get_quotes(
        &self,
        session: &BrokerSession,
        symbols: &[SymbolRef],
    ) -> std::result::Result<Vec<QuoteTick>, BrokerError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                prices.get(&symbol.symbol).map(|price| QuoteTick {
                    exchange: symbol.exchange.clone(),
                    symbol: symbol.symbol.clone(),
                    ltp: *price,
                    open: None,
                    high: None,
                    low: None,
                    prev_close: None,
                    volume: None,
                    timestamp: None,
                })
            })
            .collect())
    }

    async fn get_position_book(
        &self,
        session: &BrokerSession,
    ) -> std::result::Result<Vec<Position>, BrokerError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(&session.instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_funds(
        &self,
        session: &BrokerSession,
    ) -> std::result::Result<Funds, BrokerError> {
        self.funds_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        Ok(Funds::default())
    }

    async fn get_order_book(
        &self,
        session: &BrokerSession,
    ) -> std::result::Result<Vec<Order>, BrokerError> {
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        Ok(Vec::new())
    }

    async fn get_trade_book(
        &self,
        session: &BrokerSession,
    ) -> std::result::Result<Vec<Trade>, BrokerError> {
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        Ok(Vec::new())
    }

    async fn get_instruments(
        &self,
        session: &BrokerSession,
        exchange: &str,
    ) -> std::result::Result<Vec<InstrumentRecord>, BrokerError> {
        self.instrument_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        Ok(self
            .instruments
            .lock()
            .unwrap()
            .get(exchange)
            .cloned()
            .unwrap_or_default())
    }

    async fn close_position(
        &self,
        session: &BrokerSession,
        request: &ClosePositionRequest,
    ) -> std::result::Result<OrderResult, BrokerError> {
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        self.close_requests
            .lock()
            .unwrap()
            .push((session.instance_id.clone(), request.clone()));
        Ok(OrderResult {
            order_id: Some("ORD-TEST".to_string()),
            status: "success".to_string(),
        })
    }

    async fn cancel_all_orders(
        &self,
        session: &BrokerSession,
        strategy: &str,
    ) -> std::result::Result<OrderResult, BrokerError> {
        if let Some(error) = self.failure_for(session) {
            return Err(error);
        }
        self.cancel_calls
            .lock()
            .unwrap()
            .push((session.instance_id.clone(), strategy.to_string()));
        Ok(OrderResult {
            order_id: None,
            status: "success".to_string(),
        })
    }
}

/// Fixed-content watchlist collaborator.
#[derive(Default)]
pub struct StaticWatchlist {
    pub tracked: Vec<SymbolRef>,
    pub configs: Vec<RiskConfigEntry>,
}

#[async_trait]
impl WatchlistProviderTrait for StaticWatchlist {
    async fn get_tracked_symbols(&self, _filter: &TrackedSymbolFilter) -> Result<Vec<SymbolRef>> {
        Ok(self.tracked.clone())
    }

    async fn get_symbols_with_auto_exit_config(&self) -> Result<Vec<RiskConfigEntry>> {
        Ok(self.configs.clone())
    }
}

/// Registers a ready-to-use instance and returns it.
pub fn register_instance(
    registry: &InstanceRegistry,
    name: &str,
    role: MarketDataRole,
) -> Instance {
    registry
        .register(NewInstance {
            name: name.to_string(),
            base_url: format!("http://{}.test.local", name),
            api_key: "test-key".to_string(),
            analyzer_mode: false,
            market_data_role: role,
        })
        .expect("register test instance")
}

/// A long position used by engine tests.
pub fn long_position(instance_id: &str, symbol: &str, quantity: i64, entry: Decimal) -> Position {
    Position {
        instance_id: instance_id.to_string(),
        exchange: "NSE".to_string(),
        symbol: symbol.to_string(),
        product: "MIS".to_string(),
        quantity: Decimal::from(quantity),
        average_price: entry,
    }
}
