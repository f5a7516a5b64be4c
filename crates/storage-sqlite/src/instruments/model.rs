use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use tradedesk_core::instruments::{Instrument, RefreshLogEntry, RefreshStatus};

use crate::schema::{instrument_refresh_log, instruments};

/// Catalog row as stored. Decimal columns are TEXT to keep exact values in
/// SQLite; conversion happens at this boundary.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = instruments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InstrumentDB {
    pub id: i32,
    pub symbol: String,
    pub brsymbol: Option<String>,
    pub name: Option<String>,
    pub exchange: String,
    pub brexchange: Option<String>,
    pub token: Option<String>,
    pub expiry: Option<String>,
    pub strike: Option<String>,
    pub lotsize: i32,
    pub instrumenttype: Option<String>,
    pub tick_size: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = instruments)]
pub struct NewInstrumentDB {
    pub symbol: String,
    pub brsymbol: Option<String>,
    pub name: Option<String>,
    pub exchange: String,
    pub brexchange: Option<String>,
    pub token: Option<String>,
    pub expiry: Option<String>,
    pub strike: Option<String>,
    pub lotsize: i32,
    pub instrumenttype: Option<String>,
    pub tick_size: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<InstrumentDB> for Instrument {
    fn from(row: InstrumentDB) -> Self {
        Self {
            symbol: row.symbol,
            broker_symbol: row.brsymbol,
            name: row.name,
            exchange: row.exchange,
            broker_exchange: row.brexchange,
            token: row.token,
            expiry: row.expiry,
            strike: row.strike.and_then(|s| Decimal::from_str(&s).ok()),
            lot_size: row.lotsize,
            instrument_type: row.instrumenttype,
            tick_size: row.tick_size.and_then(|s| Decimal::from_str(&s).ok()),
        }
    }
}

impl From<Instrument> for NewInstrumentDB {
    fn from(instrument: Instrument) -> Self {
        Self {
            symbol: instrument.symbol,
            brsymbol: instrument.broker_symbol,
            name: instrument.name,
            exchange: instrument.exchange,
            brexchange: instrument.broker_exchange,
            token: instrument.token,
            expiry: instrument.expiry,
            strike: instrument.strike.map(|d| d.to_string()),
            lotsize: instrument.lot_size,
            instrumenttype: instrument.instrument_type,
            tick_size: instrument.tick_size.map(|d| d.to_string()),
            created_at: Utc::now().naive_utc(),
        }
    }
}

/// Refresh log row as stored.
#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = instrument_refresh_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RefreshLogDB {
    pub id: String,
    pub exchange: Option<String>,
    pub status: String,
    pub instrument_count: i64,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

impl From<RefreshLogDB> for RefreshLogEntry {
    fn from(row: RefreshLogDB) -> Self {
        Self {
            id: row.id,
            exchange: row.exchange,
            // An unknown status string can only come from a newer schema;
            // treat it as a failure so staleness checks stay conservative.
            status: RefreshStatus::parse(&row.status).unwrap_or(RefreshStatus::Failed),
            instrument_count: row.instrument_count,
            started_at: to_utc(row.started_at),
            completed_at: row.completed_at.map(to_utc),
            error_message: row.error_message,
        }
    }
}

impl From<&RefreshLogEntry> for RefreshLogDB {
    fn from(entry: &RefreshLogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            exchange: entry.exchange.clone(),
            status: entry.status.as_str().to_string(),
            instrument_count: entry.instrument_count,
            started_at: entry.started_at.naive_utc(),
            completed_at: entry.completed_at.map(|t| t.naive_utc()),
            error_message: entry.error_message.clone(),
        }
    }
}
