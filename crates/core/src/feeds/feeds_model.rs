use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradedesk_broker::{Funds, Order, Position, QuoteTick, Trade};

use crate::constants;

/// One category of upstream data.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Quotes,
    Positions,
    Funds,
    Orderbook,
    Tradebook,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::Positions => "positions",
            Self::Funds => "funds",
            Self::Orderbook => "orderbook",
            Self::Tradebook => "tradebook",
        }
    }

    pub fn all() -> [FeedKind; 5] {
        [
            Self::Quotes,
            Self::Positions,
            Self::Funds,
            Self::Orderbook,
            Self::Tradebook,
        ]
    }

    /// Feeds invalidated after a mutating order action.
    pub fn mutation_sensitive() -> [FeedKind; 4] {
        [Self::Positions, Self::Funds, Self::Orderbook, Self::Tradebook]
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed-specific payload of a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FeedData {
    Quotes(Vec<QuoteTick>),
    Positions(Vec<Position>),
    Funds(Funds),
    Orders(Vec<Order>),
    Trades(Vec<Trade>),
}

impl FeedData {
    pub fn positions(&self) -> Option<&[Position]> {
        match self {
            Self::Positions(rows) => Some(rows),
            _ => None,
        }
    }
}

/// The cached result of one (instance, feed) fetch.
///
/// A snapshot older than its feed's TTL is stale but still servable as a
/// degraded fallback; it is never treated as fresh by a force refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub data: FeedData,
    pub fetched_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(data: FeedData) -> Self {
        Self {
            data,
            fetched_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

/// One cached quote in the symbol-level cache.
///
/// Written only as a projection of instance-level quote fetches.
#[derive(Clone, Debug)]
pub struct SymbolQuoteEntry {
    pub quote: QuoteTick,
    pub fetched_at: DateTime<Utc>,
}

impl SymbolQuoteEntry {
    pub fn new(quote: QuoteTick) -> Self {
        Self {
            quote,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age <= ttl
    }
}

/// Per-feed freshness bounds.
#[derive(Clone, Debug)]
pub struct FeedTtlConfig {
    pub quotes: Duration,
    pub order_critical_quotes: Duration,
    pub positions: Duration,
    pub funds: Duration,
    pub orderbook: Duration,
    pub tradebook: Duration,
}

impl Default for FeedTtlConfig {
    fn default() -> Self {
        Self {
            quotes: constants::QUOTES_TTL,
            order_critical_quotes: constants::ORDER_CRITICAL_QUOTES_TTL,
            positions: constants::POSITIONS_TTL,
            funds: constants::FUNDS_TTL,
            orderbook: constants::ORDERBOOK_TTL,
            tradebook: constants::TRADEBOOK_TTL,
        }
    }
}

impl FeedTtlConfig {
    pub fn ttl_for(&self, feed: FeedKind) -> Duration {
        match feed {
            FeedKind::Quotes => self.quotes,
            FeedKind::Positions => self.positions,
            FeedKind::Funds => self.funds,
            FeedKind::Orderbook => self.orderbook,
            FeedKind::Tradebook => self.tradebook,
        }
    }
}

/// Options for the ad-hoc quote fetch path.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteFetchOptions {
    /// Override for the freshness bound; the feed default applies when
    /// unset. Ignored when `order_critical` is set.
    pub ttl: Option<Duration>,
    /// Order-placement paths cannot tolerate stale pricing; selects the
    /// tight TTL.
    pub order_critical: bool,
    /// Walk the instance pool retrying symbols that failed on earlier
    /// members.
    pub use_fallback: bool,
}
