use async_trait::async_trait;
use tradedesk_broker::SymbolRef;

use super::watchlist_model::{RiskConfigEntry, TrackedSymbolFilter};
use crate::errors::Result;

/// Read views the watchlist collaborator exposes to this crate.
#[async_trait]
pub trait WatchlistProviderTrait: Send + Sync {
    /// The global tracked-symbol list the quote refresh loop polls for.
    async fn get_tracked_symbols(&self, filter: &TrackedSymbolFilter) -> Result<Vec<SymbolRef>>;

    /// All symbols carrying an auto-exit configuration.
    async fn get_symbols_with_auto_exit_config(&self) -> Result<Vec<RiskConfigEntry>>;
}
