//! Canonical wire models and the upstream normalization boundary.
//!
//! Different broker builds spell the same field several ways
//! (`quantity`/`netqty`/`net_quantity`, `ltp`/`last_price`, ...). Everything
//! that enters the system is folded into these canonical shapes immediately
//! after fetch, so no other module ever sees a raw upstream payload.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection coordinates for one broker session.
///
/// Derived from an Instance by the core layer; the `analyzer` flag travels
/// with every request so a simulated session can never be mistaken for a
/// live one downstream.
#[derive(Clone, Debug)]
pub struct BrokerSession {
    /// Registry id of the owning instance.
    pub instance_id: String,
    /// Base URL of the instance's REST API.
    pub base_url: String,
    /// API credential for this session.
    pub api_key: String,
    /// True when the instance runs in analyzer (simulated) mode.
    pub analyzer: bool,
}

/// Trade mode a risk threshold set applies to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Direct,
    Futures,
    Options,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Futures => "futures",
            Self::Options => "options",
        }
    }
}

/// An (exchange, symbol) pair, the unit of quote addressing.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub exchange: String,
    pub symbol: String,
}

impl SymbolRef {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }
}

/// One normalized quote for a symbol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuoteTick {
    pub exchange: String,
    pub symbol: String,
    /// Last traded price.
    pub ltp: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub prev_close: Option<Decimal>,
    pub volume: Option<Decimal>,
    /// Upstream quote timestamp when the instance reports one.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One normalized open position.
///
/// Quantity is signed: positive long, negative short.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub instance_id: String,
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }
}

/// Account funds summary for one instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Funds {
    pub available_cash: Decimal,
    pub collateral: Decimal,
    pub utilised_margin: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
}

/// One normalized working or historical order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub action: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub product: String,
    pub status: String,
}

/// One normalized executed trade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub action: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub product: String,
}

/// One instrument row from the broker master contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub broker_symbol: Option<String>,
    pub name: Option<String>,
    pub exchange: String,
    pub broker_exchange: Option<String>,
    pub token: Option<String>,
    pub expiry: Option<String>,
    pub strike: Option<Decimal>,
    pub lot_size: i32,
    pub instrument_type: Option<String>,
    pub tick_size: Option<Decimal>,
}

/// Request to close one position on its owning instance.
#[derive(Clone, Debug, Serialize)]
pub struct ClosePositionRequest {
    pub exchange: String,
    pub symbol: String,
    /// Product type of the position being closed, when known.
    pub product: Option<String>,
    pub trade_mode: TradeMode,
    /// Strategy tag the upstream attributes the exit to.
    pub strategy: String,
    /// Audit tag for why the exit was triggered (e.g. `TARGET_MET`).
    pub reason: String,
}

/// Upstream acknowledgement of an order action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: Option<String>,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Normalization boundary
// ---------------------------------------------------------------------------

/// Reads the first present field among `keys` as a Decimal.
///
/// Accepts both JSON numbers and numeric strings; broker builds disagree on
/// which they emit.
fn decimal_field(raw: &Value, keys: &[&str]) -> Option<Decimal> {
    for key in keys {
        match raw.get(*key) {
            Some(Value::Number(n)) => {
                if let Ok(d) = Decimal::from_str(&n.to_string()) {
                    return Some(d);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(d) = Decimal::from_str(s.trim()) {
                    return Some(d);
                }
            }
            _ => {}
        }
    }
    None
}

/// Reads the first present non-empty field among `keys` as a String.
fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = raw.get(*key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

impl QuoteTick {
    /// Normalizes one raw upstream quote payload.
    ///
    /// Returns None when no last-traded price can be found under any known
    /// spelling; a quote without a price is useless to every consumer.
    pub fn from_upstream(exchange: &str, symbol: &str, raw: &Value) -> Option<Self> {
        let ltp = decimal_field(raw, &["ltp", "last_price", "lastprice", "last_traded_price"])?;
        Some(Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            ltp,
            open: decimal_field(raw, &["open"]),
            high: decimal_field(raw, &["high"]),
            low: decimal_field(raw, &["low"]),
            prev_close: decimal_field(raw, &["prev_close", "close", "previous_close"]),
            volume: decimal_field(raw, &["volume", "vol"]),
            timestamp: None,
        })
    }
}

impl Position {
    /// Normalizes one raw upstream position payload.
    ///
    /// Returns None when the row has no symbol or no quantity under any
    /// known spelling.
    pub fn from_upstream(instance_id: &str, raw: &Value) -> Option<Self> {
        let symbol = string_field(raw, &["symbol", "tradingsymbol", "trading_symbol"])?;
        let quantity = decimal_field(raw, &["quantity", "netqty", "net_quantity", "netQty"])?;
        Some(Self {
            instance_id: instance_id.to_string(),
            exchange: string_field(raw, &["exchange", "exch"]).unwrap_or_default(),
            symbol,
            product: string_field(raw, &["product", "producttype", "product_type"])
                .unwrap_or_else(|| "MIS".to_string()),
            quantity,
            average_price: decimal_field(
                raw,
                &["average_price", "avgprice", "avg_price", "averageprice"],
            )
            .unwrap_or_default(),
        })
    }
}

impl Funds {
    pub fn from_upstream(raw: &Value) -> Self {
        Self {
            available_cash: decimal_field(raw, &["availablecash", "available_cash", "cash"])
                .unwrap_or_default(),
            collateral: decimal_field(raw, &["collateral"]).unwrap_or_default(),
            utilised_margin: decimal_field(raw, &["utiliseddebits", "utilised_margin", "used"])
                .unwrap_or_default(),
            realised_pnl: decimal_field(raw, &["m2mrealized", "realised_pnl", "realized"])
                .unwrap_or_default(),
            unrealised_pnl: decimal_field(raw, &["m2munrealized", "unrealised_pnl", "unrealized"])
                .unwrap_or_default(),
        }
    }
}

impl Order {
    pub fn from_upstream(raw: &Value) -> Option<Self> {
        let symbol = string_field(raw, &["symbol", "tradingsymbol"])?;
        Some(Self {
            order_id: string_field(raw, &["orderid", "order_id"]).unwrap_or_default(),
            exchange: string_field(raw, &["exchange", "exch"]).unwrap_or_default(),
            symbol,
            action: string_field(raw, &["action", "transaction_type", "side"])
                .unwrap_or_default(),
            quantity: decimal_field(raw, &["quantity", "qty"]).unwrap_or_default(),
            price: decimal_field(raw, &["price"]),
            trigger_price: decimal_field(raw, &["trigger_price", "triggerprice"]),
            product: string_field(raw, &["product", "producttype"]).unwrap_or_default(),
            status: string_field(raw, &["order_status", "status"]).unwrap_or_default(),
        })
    }
}

impl Trade {
    pub fn from_upstream(raw: &Value) -> Option<Self> {
        let symbol = string_field(raw, &["symbol", "tradingsymbol"])?;
        Some(Self {
            order_id: string_field(raw, &["orderid", "order_id"]).unwrap_or_default(),
            exchange: string_field(raw, &["exchange", "exch"]).unwrap_or_default(),
            symbol,
            action: string_field(raw, &["action", "transaction_type", "side"])
                .unwrap_or_default(),
            quantity: decimal_field(raw, &["quantity", "qty", "fillsize"]).unwrap_or_default(),
            average_price: decimal_field(raw, &["average_price", "avgprice", "fillprice"])
                .unwrap_or_default(),
            product: string_field(raw, &["product", "producttype"]).unwrap_or_default(),
        })
    }
}

impl InstrumentRecord {
    /// Normalizes one master-contract row.
    ///
    /// Broker dumps use `-1` (or empty) as a "not applicable" sentinel for
    /// expiry, strike, lot size and tick size; those are cleaned up here so
    /// the catalog only ever stores real values.
    pub fn from_upstream(raw: &Value) -> Option<Self> {
        let symbol = string_field(raw, &["symbol", "tradingsymbol"])?;
        let exchange = string_field(raw, &["exchange", "exch"])?;

        let expiry = string_field(raw, &["expiry"]).filter(|v| v != "-1");
        let strike = decimal_field(raw, &["strike"]).filter(|v| *v >= Decimal::ZERO);
        let lot_size = decimal_field(raw, &["lotsize", "lot_size"])
            .and_then(|d| d.to_i32())
            .filter(|v| *v > 0)
            .unwrap_or(1);
        let tick_size =
            decimal_field(raw, &["tick_size", "ticksize"]).filter(|v| *v > Decimal::ZERO);

        Some(Self {
            symbol,
            broker_symbol: string_field(raw, &["brsymbol", "broker_symbol"]),
            name: string_field(raw, &["name"]),
            exchange,
            broker_exchange: string_field(raw, &["brexchange", "broker_exchange"]),
            token: string_field(raw, &["token"]),
            expiry,
            strike,
            lot_size,
            instrument_type: string_field(raw, &["instrumenttype", "instrument_type"]),
            tick_size,
        })
    }
}
