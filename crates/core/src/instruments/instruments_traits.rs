use async_trait::async_trait;

use super::instruments_model::{Instrument, RefreshLogEntry, RefreshStatus};
use crate::errors::Result;

/// Storage interface for the instrument catalog and its refresh log.
///
/// Sync methods are plain indexed reads; async methods go through the
/// storage layer's serialized writer. `replace_for_exchange` is the one
/// operation with an atomicity requirement: a reader must never observe a
/// half-replaced catalog for an exchange.
#[async_trait]
pub trait InstrumentRepositoryTrait: Send + Sync {
    /// Row count for one exchange, or the whole catalog.
    fn count(&self, exchange: Option<&str>) -> Result<i64>;

    /// Atomically replaces all rows for one exchange. Returns the number of
    /// rows stored.
    async fn replace_for_exchange(&self, exchange: &str, rows: Vec<Instrument>) -> Result<usize>;

    /// Relevance-ranked text search over symbol and name.
    ///
    /// The query is treated as literal text; implementations must neutralize
    /// pattern metacharacters so caller input cannot inject search syntax.
    fn search(
        &self,
        query: &str,
        exchange: Option<&str>,
        instrument_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Instrument>>;

    /// Distinct expiries of instruments whose symbol starts with the prefix.
    fn distinct_expiries(&self, symbol_prefix: &str, exchange: &str) -> Result<Vec<String>>;

    /// All instruments for one underlying prefix, expiry and exchange.
    fn list_for_chain(
        &self,
        symbol_prefix: &str,
        expiry: &str,
        exchange: &str,
    ) -> Result<Vec<Instrument>>;

    /// Most recent `completed` refresh log entry for the scope.
    fn latest_completed_refresh(&self, exchange: Option<&str>) -> Result<Option<RefreshLogEntry>>;

    /// Records the start of a refresh attempt.
    async fn insert_refresh_log(&self, entry: &RefreshLogEntry) -> Result<()>;

    /// Finalizes a refresh attempt with its outcome.
    async fn complete_refresh_log(
        &self,
        id: &str,
        status: RefreshStatus,
        instrument_count: i64,
        error_message: Option<String>,
    ) -> Result<()>;
}
