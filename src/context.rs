//! Application context (§9 design note): explicit dependency injection
//! replacing the global-singleton pattern the distilled spec flagged. One
//! `AppContext` owns every long-lived component; handlers and background
//! tasks receive `Arc` references instead of reaching for statics.

use crate::collector::Collector;
use crate::config::AppConfig;
use crate::error::CoreResult;
use crate::exchange::RetryPolicy;
use crate::exchange::binance_client::BinanceExchangeClient;
use crate::exchange::stream::StreamCollector;
use crate::historical::{HistoricalService, HistoricalServiceConfig};
use crate::retention::RetentionScheduler;
use crate::store::CandleStore;
use std::sync::Arc;
use std::time::Duration;

pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<CandleStore>,
    pub exchange: Arc<BinanceExchangeClient>,
    pub stream: Arc<StreamCollector>,
    pub collector: Arc<Collector>,
    pub historical: Arc<HistoricalService<BinanceExchangeClient>>,
}

impl AppContext {
    pub fn build(config: AppConfig) -> CoreResult<Self> {
        let store = Arc::new(CandleStore::open(&config.db_path)?);
        let retry = RetryPolicy::new(
            config.retry_max_retries,
            Duration::from_secs(2),
            RetryPolicy::default_classifier,
        );
        let exchange = Arc::new(BinanceExchangeClient::new(retry));
        let stream = Arc::new(StreamCollector::new(Arc::clone(&store)));
        let collector = Arc::new(Collector::new(Arc::clone(&store), Arc::clone(&stream)));
        let historical = Arc::new(if config.cache_enabled {
            HistoricalService::new(
                Arc::clone(&store),
                Arc::clone(&exchange),
                HistoricalServiceConfig::default(),
            )
        } else {
            HistoricalService::without_cache(
                Arc::clone(&store),
                Arc::clone(&exchange),
                HistoricalServiceConfig::default(),
            )
        });

        Ok(AppContext {
            config,
            store,
            exchange,
            stream,
            collector,
            historical,
        })
    }

    /// Resubscribes every enabled watched pair and starts the retention
    /// scheduler in the background. Call once after construction.
    pub fn spawn_background_tasks(&self) -> CoreResult<()> {
        self.collector.start()?;
        let scheduler = RetentionScheduler::new(Arc::clone(&self.store));
        tokio::spawn(scheduler.run());
        Ok(())
    }
}
