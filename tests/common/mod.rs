use std::sync::{Arc, Once};

use ethers::types::Address;

use feed_history::{
    config::SamplingConfig,
    price_oracle::{FeedMetadata, HistoricalPriceService},
};

pub mod mocks;

use mocks::{EchoExecutor, MockFeedRegistry, MockPriceFeeds};

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn address(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn metadata(first_round_timestamp: u64, latest_round_id: u128, latest_round_timestamp: u64) -> FeedMetadata {
    FeedMetadata { first_round_timestamp, latest_round_id, latest_round_timestamp }
}

/// Service wired to mocks, with the mocks handed back for inspection.
pub struct TestHarness {
    pub registry: Arc<MockFeedRegistry>,
    pub feeds: Arc<MockPriceFeeds>,
    pub executor: Arc<EchoExecutor>,
    pub service: HistoricalPriceService,
}

impl TestHarness {
    pub fn new(registry: MockFeedRegistry, feeds: MockPriceFeeds, executor: EchoExecutor) -> Self {
        Self::with_sampling(registry, feeds, executor, SamplingConfig::default())
    }

    pub fn with_sampling(
        registry: MockFeedRegistry,
        feeds: MockPriceFeeds,
        executor: EchoExecutor,
        sampling: SamplingConfig,
    ) -> Self {
        init_tracing();
        let registry = Arc::new(registry);
        let feeds = Arc::new(feeds);
        let executor = Arc::new(executor);
        let service = HistoricalPriceService::new(registry.clone(), feeds.clone(), executor.clone(), sampling);
        Self { registry, feeds, executor, service }
    }
}
