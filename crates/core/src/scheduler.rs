//! Background scheduler for the periodic loops.
//!
//! Five independent loops run concurrently with no ordering between them:
//! quotes, positions and funds refresh, the auto-exit sweep, and the
//! instrument staleness check. Each loop awaits its own sweep before the
//! next tick, so a slow sweep delays itself rather than overlapping; the
//! auto-exit engine and the instrument service carry their own reentrancy
//! guards on top for callers that invoke them directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::autoexit::AutoExitEngine;
use crate::feeds::{FeedCacheService, FeedKind};
use crate::instruments::InstrumentService;

/// Loop cadences.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub quotes_interval: Duration,
    pub positions_interval: Duration,
    pub funds_interval: Duration,
    pub autoexit_interval: Duration,
    pub catalog_check_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quotes_interval: Duration::from_secs(5),
            positions_interval: Duration::from_secs(10),
            funds_interval: Duration::from_secs(30),
            autoexit_interval: Duration::from_secs(3),
            catalog_check_interval: Duration::from_secs(3600),
        }
    }
}

/// Owns the background loop tasks. `start` and `stop` are the lifecycle
/// controls exposed to the request-serving layer.
pub struct Scheduler {
    feeds: Arc<FeedCacheService>,
    autoexit: Arc<AutoExitEngine>,
    instruments: Arc<InstrumentService>,
    config: SchedulerConfig,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        feeds: Arc<FeedCacheService>,
        autoexit: Arc<AutoExitEngine>,
        instruments: Arc<InstrumentService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            feeds,
            autoexit,
            instruments,
            config,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the background loops. A second start while running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }
        info!("Starting background loops");

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.push(spawn_feed_loop(
            self.feeds.clone(),
            FeedKind::Quotes,
            self.config.quotes_interval,
        ));
        handles.push(spawn_feed_loop(
            self.feeds.clone(),
            FeedKind::Positions,
            self.config.positions_interval,
        ));
        handles.push(spawn_feed_loop(
            self.feeds.clone(),
            FeedKind::Funds,
            self.config.funds_interval,
        ));

        let autoexit = self.autoexit.clone();
        handles.push(tokio::spawn(run_loop(
            self.config.autoexit_interval,
            move || {
                let autoexit = autoexit.clone();
                async move { autoexit.run_sweep().await }
            },
        )));

        let instruments = self.instruments.clone();
        handles.push(tokio::spawn(run_loop(
            self.config.catalog_check_interval,
            move || {
                let instruments = instruments.clone();
                async move { instruments.ensure_fresh().await }
            },
        )));
    }

    /// Aborts the background loops and drops engine tracking state (it is
    /// derived and rebuilt from scratch on the next start).
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
        self.autoexit.clear_state();
        info!("Background loops stopped");
    }
}

async fn run_loop<F, Fut>(every: Duration, mut sweep: F)
where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep().await;
    }
}

fn spawn_feed_loop(
    feeds: Arc<FeedCacheService>,
    feed: FeedKind,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run_loop(every, move || {
        let feeds = feeds.clone();
        async move { feeds.refresh(feed, false).await }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::autoexit::AutoExitConfig;
    use crate::feeds::FeedServiceConfig;
    use crate::instances::InstanceRegistry;
    use crate::instruments::InstrumentServiceConfig;
    use crate::test_support::{MockBrokerClient, StaticWatchlist};

    use async_trait::async_trait;
    use crate::errors::Result;
    use crate::instruments::{Instrument, InstrumentRepositoryTrait, RefreshLogEntry, RefreshStatus};

    struct NullRepository;

    #[async_trait]
    impl InstrumentRepositoryTrait for NullRepository {
        fn count(&self, _exchange: Option<&str>) -> Result<i64> {
            Ok(0)
        }
        async fn replace_for_exchange(
            &self,
            _exchange: &str,
            rows: Vec<Instrument>,
        ) -> Result<usize> {
            Ok(rows.len())
        }
        fn search(
            &self,
            _query: &str,
            _exchange: Option<&str>,
            _instrument_type: Option<&str>,
            _limit: i64,
        ) -> Result<Vec<Instrument>> {
            Ok(Vec::new())
        }
        fn distinct_expiries(&self, _symbol_prefix: &str, _exchange: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn list_for_chain(
            &self,
            _symbol_prefix: &str,
            _expiry: &str,
            _exchange: &str,
        ) -> Result<Vec<Instrument>> {
            Ok(Vec::new())
        }
        fn latest_completed_refresh(
            &self,
            _exchange: Option<&str>,
        ) -> Result<Option<RefreshLogEntry>> {
            Ok(None)
        }
        async fn insert_refresh_log(&self, _entry: &RefreshLogEntry) -> Result<()> {
            Ok(())
        }
        async fn complete_refresh_log(
            &self,
            _id: &str,
            _status: RefreshStatus,
            _instrument_count: i64,
            _error_message: Option<String>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn build_scheduler() -> Scheduler {
        let client = Arc::new(MockBrokerClient::new());
        let registry = Arc::new(InstanceRegistry::new());
        let watchlist = Arc::new(StaticWatchlist::default());
        let feeds = Arc::new(FeedCacheService::new(
            client.clone(),
            registry.clone(),
            watchlist.clone(),
            FeedServiceConfig::default(),
        ));
        let autoexit = Arc::new(AutoExitEngine::new(
            client.clone(),
            registry.clone(),
            feeds.clone(),
            watchlist,
            AutoExitConfig::default(),
        ));
        let instruments = Arc::new(InstrumentService::new(
            Arc::new(NullRepository),
            client,
            registry,
            InstrumentServiceConfig::default(),
        ));
        Scheduler::new(feeds, autoexit, instruments, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let scheduler = build_scheduler();
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.handles.lock().unwrap().len(), 5);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_aborts_loops() {
        let scheduler = build_scheduler();
        scheduler.start();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.handles.lock().unwrap().is_empty());
    }
}
