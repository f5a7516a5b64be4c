//! The uniform async contract every upstream broker session exposes.

use async_trait::async_trait;

use crate::errors::BrokerError;
use crate::models::{
    BrokerSession, ClosePositionRequest, Funds, InstrumentRecord, Order, OrderResult, Position,
    QuoteTick, SymbolRef, Trade,
};

/// Uniform operations against one broker instance.
///
/// Every method may fail with a categorized [`BrokerError`]; callers in the
/// feed layer translate those failures into circuit-breaker bookkeeping and
/// degraded cache reads, so implementations should never panic on bad
/// upstream data; return [`BrokerError::Malformed`] instead.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetches quotes for a batch of symbols.
    async fn get_quotes(
        &self,
        session: &BrokerSession,
        symbols: &[SymbolRef],
    ) -> Result<Vec<QuoteTick>, BrokerError>;

    /// Fetches the position book, normalized and including flat rows.
    async fn get_position_book(
        &self,
        session: &BrokerSession,
    ) -> Result<Vec<Position>, BrokerError>;

    /// Fetches the account funds summary.
    async fn get_funds(&self, session: &BrokerSession) -> Result<Funds, BrokerError>;

    /// Fetches the order book (working and historical orders for the day).
    async fn get_order_book(&self, session: &BrokerSession) -> Result<Vec<Order>, BrokerError>;

    /// Fetches the trade book (executions for the day).
    async fn get_trade_book(&self, session: &BrokerSession) -> Result<Vec<Trade>, BrokerError>;

    /// Fetches the full instrument master contract for one exchange.
    async fn get_instruments(
        &self,
        session: &BrokerSession,
        exchange: &str,
    ) -> Result<Vec<InstrumentRecord>, BrokerError>;

    /// Submits a close (square-off) for one position.
    async fn close_position(
        &self,
        session: &BrokerSession,
        request: &ClosePositionRequest,
    ) -> Result<OrderResult, BrokerError>;

    /// Cancels all working orders tagged with the given strategy.
    async fn cancel_all_orders(
        &self,
        session: &BrokerSession,
        strategy: &str,
    ) -> Result<OrderResult, BrokerError>;
}
