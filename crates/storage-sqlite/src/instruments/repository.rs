use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use tradedesk_core::instruments::{
    Instrument, InstrumentRepositoryTrait, RefreshLogEntry, RefreshStatus,
};
use tradedesk_core::{Error, Result};

use super::model::{InstrumentDB, NewInstrumentDB, RefreshLogDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{instrument_refresh_log, instruments};

/// Rows per INSERT statement during a catalog replace; SQLite's bind
/// parameter budget caps how many rows fit in one statement.
const INSERT_BATCH_SIZE: usize = 1000;

/// Escapes LIKE metacharacters so caller input stays literal text. The
/// pattern itself is always a bound parameter; this only neutralizes
/// wildcards inside it.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Diesel/SQLite implementation of the instrument repository.
///
/// Reads use pooled connections; every write goes through the single-writer
/// actor, whose immediate transaction makes the per-exchange replace
/// all-or-nothing for readers.
pub struct InstrumentRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl InstrumentRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl InstrumentRepositoryTrait for InstrumentRepository {
    fn count(&self, exchange: Option<&str>) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = instruments::table.into_boxed();
        if let Some(ex) = exchange {
            query = query.filter(instruments::exchange.eq(ex.to_uppercase()));
        }
        let total = query
            .count()
            .get_result(&mut conn)
            .map_err(StorageError::from)?;
        Ok(total)
    }

    async fn replace_for_exchange(&self, exchange: &str, rows: Vec<Instrument>) -> Result<usize> {
        let exchange = exchange.to_uppercase();
        let new_rows: Vec<NewInstrumentDB> =
            rows.into_iter().map(NewInstrumentDB::from).collect();

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                diesel::delete(
                    instruments::table.filter(instruments::exchange.eq(&exchange)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;

                let mut stored = 0;
                for chunk in new_rows.chunks(INSERT_BATCH_SIZE) {
                    stored += diesel::insert_into(instruments::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                debug!("Replaced {} catalog rows for {}", stored, exchange);
                Ok(stored)
            })
            .await
    }

    fn search(
        &self,
        query: &str,
        exchange: Option<&str>,
        instrument_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Instrument>> {
        let mut conn = get_connection(&self.pool)?;

        let term = query.to_uppercase();
        let escaped = escape_like(&term);
        let prefix = format!("{}%", escaped);
        let contains = format!("%{}%", escaped);

        let mut search = instruments::table
            .filter(
                instruments::symbol
                    .like(contains.clone())
                    .escape('\\')
                    .or(instruments::name.like(contains).escape('\\')),
            )
            .into_boxed();
        if let Some(ex) = exchange {
            search = search.filter(instruments::exchange.eq(ex.to_uppercase()));
        }
        if let Some(kind) = instrument_type {
            search = search.filter(instruments::instrumenttype.eq(kind.to_string()));
        }

        // Exact symbol first, then symbol prefix, then name prefix, then
        // the remaining substring matches.
        let rows = search
            .order((
                instruments::symbol.eq(term).desc(),
                instruments::symbol.like(prefix.clone()).escape('\\').desc(),
                instruments::name.like(prefix).escape('\\').desc(),
                instruments::symbol.asc(),
            ))
            .limit(limit)
            .select(InstrumentDB::as_select())
            .load::<InstrumentDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    fn distinct_expiries(&self, symbol_prefix: &str, exchange: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;

        let prefix = format!("{}%", escape_like(&symbol_prefix.to_uppercase()));
        let expiries = instruments::table
            .filter(instruments::exchange.eq(exchange.to_uppercase()))
            .filter(instruments::symbol.like(prefix).escape('\\'))
            .filter(instruments::expiry.is_not_null())
            .select(instruments::expiry)
            .distinct()
            .load::<Option<String>>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(expiries.into_iter().flatten().collect())
    }

    fn list_for_chain(
        &self,
        symbol_prefix: &str,
        expiry: &str,
        exchange: &str,
    ) -> Result<Vec<Instrument>> {
        let mut conn = get_connection(&self.pool)?;

        let prefix = format!("{}%", escape_like(&symbol_prefix.to_uppercase()));
        let rows = instruments::table
            .filter(instruments::exchange.eq(exchange.to_uppercase()))
            .filter(instruments::symbol.like(prefix).escape('\\'))
            .filter(instruments::expiry.eq(expiry))
            .select(InstrumentDB::as_select())
            .load::<InstrumentDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    fn latest_completed_refresh(&self, exchange: Option<&str>) -> Result<Option<RefreshLogEntry>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = instrument_refresh_log::table
            .filter(instrument_refresh_log::status.eq(RefreshStatus::Completed.as_str()))
            .into_boxed();
        if let Some(ex) = exchange {
            query = query.filter(instrument_refresh_log::exchange.eq(ex.to_uppercase()));
        }

        let row = query
            .order(instrument_refresh_log::started_at.desc())
            .select(RefreshLogDB::as_select())
            .first::<RefreshLogDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(row.map(RefreshLogEntry::from))
    }

    async fn insert_refresh_log(&self, entry: &RefreshLogEntry) -> Result<()> {
        let row = RefreshLogDB::from(entry);
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(instrument_refresh_log::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn complete_refresh_log(
        &self,
        id: &str,
        status: RefreshStatus,
        instrument_count: i64,
        error_message: Option<String>,
    ) -> Result<()> {
        let id = id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let updated = diesel::update(
                    instrument_refresh_log::table.filter(instrument_refresh_log::id.eq(&id)),
                )
                .set((
                    instrument_refresh_log::status.eq(status.as_str()),
                    instrument_refresh_log::instrument_count.eq(instrument_count),
                    instrument_refresh_log::completed_at
                        .eq(Some(chrono::Utc::now().naive_utc())),
                    instrument_refresh_log::error_message.eq(error_message),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                if updated == 0 {
                    return Err(Error::NotFound(format!("refresh log entry '{}'", id)));
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn instrument(symbol: &str, exchange: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            broker_symbol: Some(format!("{}-EQ", symbol)),
            name: None,
            exchange: exchange.to_string(),
            broker_exchange: Some(exchange.to_string()),
            token: Some("1001".to_string()),
            expiry: None,
            strike: None,
            lot_size: 1,
            instrument_type: None,
            tick_size: Some(dec!(0.05)),
        }
    }

    fn option_instrument(symbol: &str, strike: rust_decimal::Decimal, expiry: &str) -> Instrument {
        Instrument {
            expiry: Some(expiry.to_string()),
            strike: Some(strike),
            lot_size: 75,
            ..instrument(symbol, "NFO")
        }
    }

    async fn setup() -> (TempDir, InstrumentRepository) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("test.db").to_string_lossy().to_string();
        crate::db::init(&db_path).unwrap();
        let pool = crate::db::create_pool(&db_path).unwrap();
        crate::db::run_migrations(&pool).unwrap();
        let writer = crate::db::spawn_writer((*pool).clone());
        (dir, InstrumentRepository::new(pool, writer))
    }

    #[tokio::test]
    async fn test_replace_is_an_atomic_swap() {
        let (_dir, repository) = setup().await;

        let stored = repository
            .replace_for_exchange(
                "NSE",
                vec![instrument("SBIN", "NSE"), instrument("RELIANCE", "NSE")],
            )
            .await
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(repository.count(Some("NSE")).unwrap(), 2);

        // A second replace swaps the whole scope, not appends.
        repository
            .replace_for_exchange("NSE", vec![instrument("TCS", "NSE")])
            .await
            .unwrap();
        assert_eq!(repository.count(Some("NSE")).unwrap(), 1);

        let found = repository.search("TCS", Some("NSE"), None, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "TCS");
    }

    #[tokio::test]
    async fn test_replace_scopes_by_exchange() {
        let (_dir, repository) = setup().await;

        repository
            .replace_for_exchange("NSE", vec![instrument("SBIN", "NSE")])
            .await
            .unwrap();
        repository
            .replace_for_exchange("BSE", vec![instrument("SBIN", "BSE")])
            .await
            .unwrap();

        repository
            .replace_for_exchange("NSE", Vec::new())
            .await
            .unwrap();

        assert_eq!(repository.count(Some("NSE")).unwrap(), 0);
        assert_eq!(repository.count(Some("BSE")).unwrap(), 1);
        assert_eq!(repository.count(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_exact_and_prefix_first() {
        let (_dir, repository) = setup().await;

        let mut with_name = instrument("HDFCBANK", "NSE");
        with_name.name = Some("SBIN Holdings".to_string());
        repository
            .replace_for_exchange(
                "NSE",
                vec![
                    instrument("XSBIN", "NSE"),
                    instrument("SBIN-BE", "NSE"),
                    instrument("SBIN", "NSE"),
                    with_name,
                ],
            )
            .await
            .unwrap();

        let results = repository.search("sbin", None, None, 10).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].symbol, "SBIN");
        assert_eq!(results[1].symbol, "SBIN-BE");
        // Name matches come through too, after symbol matches.
        assert!(results.iter().any(|r| r.symbol == "HDFCBANK"));
    }

    #[tokio::test]
    async fn test_search_treats_metacharacters_literally() {
        let (_dir, repository) = setup().await;

        repository
            .replace_for_exchange(
                "NSE",
                vec![instrument("ABC", "NSE"), instrument("A_C", "NSE")],
            )
            .await
            .unwrap();

        // An underscore is not a single-character wildcard.
        let results = repository.search("A_C", None, None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "A_C");

        // A quoted injection attempt is plain text and matches nothing.
        let results = repository
            .search("foo\" OR 1=1", None, None, 10)
            .unwrap();
        assert!(results.is_empty());

        // A percent sign is not a wildcard either.
        let results = repository.search("%B%", None, None, 10).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_and_limit() {
        let (_dir, repository) = setup().await;

        repository
            .replace_for_exchange("NSE", vec![instrument("SBIN", "NSE")])
            .await
            .unwrap();
        repository
            .replace_for_exchange("BSE", vec![instrument("SBIN", "BSE")])
            .await
            .unwrap();

        let results = repository.search("SBIN", Some("BSE"), None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exchange, "BSE");

        let results = repository.search("SBIN", None, None, 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_expiries_and_chain_rows() {
        let (_dir, repository) = setup().await;

        repository
            .replace_for_exchange(
                "NFO",
                vec![
                    option_instrument("NIFTY28NOV2524000CE", dec!(24000), "28-NOV-25"),
                    option_instrument("NIFTY28NOV2524000PE", dec!(24000), "28-NOV-25"),
                    option_instrument("NIFTY05DEC2524000CE", dec!(24000), "05-DEC-25"),
                    option_instrument("BANKNIFTY28NOV2551000CE", dec!(51000), "28-NOV-25"),
                ],
            )
            .await
            .unwrap();

        let mut expiries = repository.distinct_expiries("NIFTY", "NFO").unwrap();
        expiries.sort();
        assert_eq!(expiries, vec!["05-DEC-25", "28-NOV-25"]);

        let rows = repository
            .list_for_chain("NIFTY", "28-NOV-25", "NFO")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.symbol.starts_with("NIFTY28NOV25")));
    }

    #[tokio::test]
    async fn test_refresh_log_roundtrip() {
        let (_dir, repository) = setup().await;

        let entry = RefreshLogEntry::begin(Some("NSE"));
        repository.insert_refresh_log(&entry).await.unwrap();

        // In-progress entries don't count as completed.
        assert!(repository
            .latest_completed_refresh(Some("NSE"))
            .unwrap()
            .is_none());

        repository
            .complete_refresh_log(&entry.id, RefreshStatus::Completed, 42, None)
            .await
            .unwrap();

        let latest = repository
            .latest_completed_refresh(Some("NSE"))
            .unwrap()
            .expect("completed entry");
        assert_eq!(latest.id, entry.id);
        assert_eq!(latest.instrument_count, 42);
        assert!(latest.completed_at.is_some());

        // Scope filtering: nothing completed for BSE yet.
        assert!(repository
            .latest_completed_refresh(Some("BSE"))
            .unwrap()
            .is_none());
        // Unscoped staleness checks see the NSE entry.
        assert!(repository.latest_completed_refresh(None).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_log_keeps_error() {
        let (_dir, repository) = setup().await;

        let entry = RefreshLogEntry::begin(Some("MCX"));
        repository.insert_refresh_log(&entry).await.unwrap();
        repository
            .complete_refresh_log(
                &entry.id,
                RefreshStatus::Failed,
                0,
                Some("HTTP 502".to_string()),
            )
            .await
            .unwrap();

        assert!(repository
            .latest_completed_refresh(Some("MCX"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_refresh_log_unknown_id() {
        let (_dir, repository) = setup().await;
        let result = repository
            .complete_refresh_log("missing", RefreshStatus::Completed, 0, None)
            .await;
        assert!(result.is_err());
    }
}
