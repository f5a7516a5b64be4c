use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradedesk_broker::InstrumentRecord;
use uuid::Uuid;

/// One row of the instrument catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub broker_symbol: Option<String>,
    pub name: Option<String>,
    pub exchange: String,
    pub broker_exchange: Option<String>,
    pub token: Option<String>,
    /// Expiry as delivered by the broker dump (e.g. `28-NOV-25`); kept
    /// verbatim, parsed only for ordering.
    pub expiry: Option<String>,
    pub strike: Option<Decimal>,
    pub lot_size: i32,
    pub instrument_type: Option<String>,
    pub tick_size: Option<Decimal>,
}

impl From<InstrumentRecord> for Instrument {
    fn from(record: InstrumentRecord) -> Self {
        Self {
            symbol: record.symbol,
            broker_symbol: record.broker_symbol,
            name: record.name,
            exchange: record.exchange,
            broker_exchange: record.broker_exchange,
            token: record.token,
            expiry: record.expiry,
            strike: record.strike,
            lot_size: record.lot_size,
            instrument_type: record.instrument_type,
            tick_size: record.tick_size,
        }
    }
}

/// Call/put classification of an option instrument.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionSide {
    Call,
    Put,
}

impl Instrument {
    /// Classifies an option row by its instrument-type field, falling back
    /// to the symbol suffix.
    pub fn option_side(&self) -> Option<OptionSide> {
        match self.instrument_type.as_deref() {
            Some("CE") => return Some(OptionSide::Call),
            Some("PE") => return Some(OptionSide::Put),
            _ => {}
        }
        if self.symbol.ends_with("CE") {
            Some(OptionSide::Call)
        } else if self.symbol.ends_with("PE") {
            Some(OptionSide::Put)
        } else {
            None
        }
    }
}

/// Status of one catalog refresh attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    InProgress,
    Completed,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One row of the refresh log.
///
/// Drives staleness decisions (no `completed` entry within 24 h means a
/// refresh is due) and documents failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshLogEntry {
    pub id: String,
    /// Exchange scope; `None` covers all supported exchanges.
    pub exchange: Option<String>,
    pub status: RefreshStatus,
    pub instrument_count: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RefreshLogEntry {
    /// A fresh `in_progress` entry for one scope.
    pub fn begin(exchange: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            exchange: exchange.map(str::to_string),
            status: RefreshStatus::InProgress,
            instrument_count: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// Filters for instrument search.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchFilters {
    pub exchange: Option<String>,
    pub instrument_type: Option<String>,
    pub limit: Option<i64>,
}

/// One strike row of an option chain. Either leg may be absent.
#[derive(Clone, Debug, Serialize)]
pub struct OptionChainStrike {
    pub strike: Decimal,
    pub ce: Option<Instrument>,
    pub pe: Option<Instrument>,
}

/// An option chain for one underlying and expiry, strikes ascending.
#[derive(Clone, Debug, Serialize)]
pub struct OptionChain {
    pub symbol: String,
    pub expiry: String,
    pub exchange: String,
    pub strikes: Vec<OptionChainStrike>,
}

/// Outcome of one refresh run across its exchange scope.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RefreshSummary {
    /// (exchange, stored row count) per successfully replaced scope.
    pub refreshed: Vec<(String, usize)>,
    /// (exchange, error) per failed scope; the previous catalog for those
    /// exchanges is left intact.
    pub failed: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl RefreshSummary {
    pub fn total_instruments(&self) -> usize {
        self.refreshed.iter().map(|(_, count)| count).sum()
    }
}

/// Best-effort parse of broker expiry spellings, for chronological sorting.
pub(crate) fn parse_expiry(value: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%d-%b-%y", "%d%b%y", "%Y-%m-%d", "%d-%b-%Y"];
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}
