use ethers::types::Address;
use futures::future::try_join_all;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{debug, info, instrument, warn};

use crate::{
    blockchain::{decode_round_data, FeedRegistryClient, PriceFeedClient},
    config::SamplingConfig,
    errors::PriceError,
    multicall::{BatchExecutor, DecodedCallResult},
    price_oracle::{
        feed_resolver::PriceFeedResolver,
        raw_calls::{build_raw_calls, RawCallDescriptor},
        sampling::{SamplingOutcome, SamplingPlanner},
        types::{FeedMetadata, FeedReference, PricePoint, FIRST_ROUND_ID},
    },
};

/// Historical USD prices for an asset, read from its Chainlink feed.
///
/// Each request resolves the feed, reads three pieces of feed metadata, plans
/// a sparse set of rounds over the last year, and reads those rounds through
/// the batch executor. Requests share nothing but the injected handles.
#[derive(Clone)]
pub struct HistoricalPriceService {
    resolver: PriceFeedResolver,
    feeds: Arc<dyn PriceFeedClient>,
    executor: Arc<dyn BatchExecutor>,
    planner: SamplingPlanner,
}

impl std::fmt::Debug for HistoricalPriceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalPriceService")
            .field("resolver", &self.resolver)
            .field("feeds", &self.feeds)
            .field("executor", &self.executor)
            .field("sampling", self.planner.config())
            .finish()
    }
}

impl HistoricalPriceService {
    pub fn new(
        registry: Arc<dyn FeedRegistryClient>,
        feeds: Arc<dyn PriceFeedClient>,
        executor: Arc<dyn BatchExecutor>,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            resolver: PriceFeedResolver::new(registry),
            feeds,
            executor,
            planner: SamplingPlanner::new(sampling),
        }
    }

    pub async fn resolve_feed(&self, asset: Address) -> Result<Option<FeedReference>, PriceError> {
        self.resolver.resolve_feed(asset).await
    }

    /// Reads the first round's timestamp, the latest round id and the latest
    /// timestamp concurrently. The reads are not atomic with each other.
    pub async fn fetch_feed_metadata(&self, feed: Address) -> Result<FeedMetadata, PriceError> {
        let (first_round_timestamp, latest_round_id, latest_round_timestamp) = tokio::try_join!(
            self.feeds.get_timestamp(feed, FIRST_ROUND_ID),
            self.feeds.latest_round(feed),
            self.feeds.latest_timestamp(feed),
        )
        .map_err(|source| PriceError::MetadataFetch { feed, source })?;

        Ok(FeedMetadata { first_round_timestamp, latest_round_id, latest_round_timestamp })
    }

    pub fn plan(&self, metadata: &FeedMetadata) -> SamplingOutcome {
        self.planner.plan(metadata)
    }

    /// Everything up to execution: resolve, read metadata, plan, build calls.
    /// An empty vec means the asset has nothing to read.
    async fn prepare_asset(&self, asset: Address) -> Result<Vec<RawCallDescriptor>, PriceError> {
        let Some(reference) = self.resolver.resolve_feed(asset).await? else {
            return Ok(Vec::new());
        };

        let metadata = self.fetch_feed_metadata(reference.feed).await?;
        let plan = match self.planner.plan(&metadata) {
            SamplingOutcome::Plan(plan) => plan,
            SamplingOutcome::Empty(reason) => {
                warn!(?asset, feed = ?reference.feed, ?reason, ?metadata, "Feed has no usable round history");
                return Ok(Vec::new());
            }
        };

        debug!(
            ?asset,
            feed = ?reference.feed,
            latest_round_id = %metadata.latest_round_id,
            first_round_id = %plan.first_round_id,
            increment = %plan.increment,
            samples = plan.len(),
            "Computed sampling plan"
        );

        Ok(build_raw_calls(asset, self.feeds.as_ref(), reference.feed, &plan.round_ids))
    }

    async fn execute(&self, descriptors: Vec<RawCallDescriptor>) -> Result<Vec<PricePoint>, PriceError> {
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        let requested = descriptors.len();
        let prepared = descriptors
            .into_iter()
            .map(|descriptor| descriptor.prepare(self.executor.as_ref()))
            .collect();

        let results = self
            .executor
            .execute_multicalls(prepared)
            .await
            .map_err(|e| PriceError::BatchExecution(e.to_string()))?;

        if results.len() != requested {
            return Err(PriceError::BatchExecution(format!(
                "Executor returned {} results for {} calls",
                results.len(),
                requested
            )));
        }

        let mut points = Vec::with_capacity(results.len());
        let mut skipped = 0usize;
        for result in &results {
            match to_price_point(result)? {
                Some(point) => points.push(point),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, requested, "Skipped rounds without data");
        }
        Ok(points)
    }

    /// Sampled price history for `asset`, oldest first as returned by the
    /// executor. Empty when the asset has no feed or the feed has no usable
    /// history.
    #[instrument(skip(self))]
    pub async fn get_historical_prices(&self, asset: Address) -> Result<Vec<PricePoint>, PriceError> {
        let start = Instant::now();
        let descriptors = self.prepare_asset(asset).await?;
        let points = self.execute(descriptors).await?;

        info!(points = points.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Fetched historical prices");
        Ok(points)
    }

    /// Like `get_historical_prices` for several assets, with all round reads
    /// submitted to the executor in a single call. Every requested asset is a
    /// key of the result.
    #[instrument(skip(self, assets), fields(assets = assets.len()))]
    pub async fn get_historical_prices_for_assets(
        &self,
        assets: &[Address],
    ) -> Result<HashMap<Address, Vec<PricePoint>>, PriceError> {
        let start = Instant::now();
        let mut unique = assets.to_vec();
        unique.sort();
        unique.dedup();

        let prepared = try_join_all(unique.iter().map(|asset| self.prepare_asset(*asset))).await?;
        let descriptors = prepared.into_iter().flatten().collect::<Vec<_>>();
        let points = self.execute(descriptors).await?;

        let mut by_asset: HashMap<Address, Vec<PricePoint>> =
            unique.iter().map(|asset| (*asset, Vec::new())).collect();
        for point in points {
            by_asset.entry(point.asset_id).or_default().push(point);
        }

        info!(
            assets = by_asset.len(),
            with_data = by_asset.values().filter(|p| !p.is_empty()).count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched historical prices"
        );
        Ok(by_asset)
    }
}

/// `None` for rounds the feed has no data for: a failed read, or a zero
/// answer or timestamp.
fn to_price_point(result: &DecodedCallResult) -> Result<Option<PricePoint>, PriceError> {
    if !result.success {
        return Ok(None);
    }

    let round = decode_round_data(&result.tokens).map_err(|e| PriceError::BatchExecution(e.to_string()))?;
    if round.answer.is_zero() || round.updated_at == 0 {
        return Ok(None);
    }

    Ok(Some(PricePoint {
        asset_id: result.metadata.asset_id,
        round_id: round.round_id,
        timestamp: round.updated_at,
        price: round.answer,
    }))
}
