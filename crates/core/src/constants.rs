use std::time::Duration;

/// Freshness bound for scheduled/ad-hoc quote reads.
pub const QUOTES_TTL: Duration = Duration::from_secs(5);

/// Tighter quote freshness bound for order-placement paths.
pub const ORDER_CRITICAL_QUOTES_TTL: Duration = Duration::from_secs(2);

/// Freshness bound for position book snapshots.
pub const POSITIONS_TTL: Duration = Duration::from_secs(10);

/// Freshness bound for funds snapshots.
pub const FUNDS_TTL: Duration = Duration::from_secs(30);

/// Freshness bound for order book snapshots.
pub const ORDERBOOK_TTL: Duration = Duration::from_secs(10);

/// Freshness bound for trade book snapshots.
pub const TRADEBOOK_TTL: Duration = Duration::from_secs(15);

/// Symbols per quote fetch batch (upstream quote calls are per-symbol and
/// rate limited, so batches stay small).
pub const QUOTE_BATCH_SIZE: usize = 4;

/// Cap on concurrent quote batches per pool member.
pub const MAX_BATCHES_PER_INSTANCE: usize = 4;

/// Pool members tried before giving up on a symbol in the fallback path.
pub const MAX_FALLBACK_ATTEMPTS: usize = 3;

/// Suppression window after an exit trigger for one position key.
pub const PENDING_EXIT_WINDOW: Duration = Duration::from_secs(30);

/// Strategy tag attached to every order action this system submits.
pub const EXIT_STRATEGY_TAG: &str = "tradedesk-autoexit";

/// Catalog age beyond which a refresh is due.
pub const INSTRUMENT_MAX_AGE_HOURS: i64 = 24;

/// Exchanges covered by a full catalog refresh.
pub const SUPPORTED_EXCHANGES: &[&str] = &["NSE", "NFO", "BSE", "BFO", "MCX", "CDS"];

/// Default instrument search result count.
pub const SEARCH_DEFAULT_LIMIT: i64 = 50;

/// Hard cap on instrument search result count.
pub const SEARCH_MAX_LIMIT: i64 = 500;

/// Minimum query length (after trimming) for instrument search.
pub const SEARCH_MIN_QUERY_LEN: usize = 2;
