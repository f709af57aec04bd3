use async_trait::async_trait;
use ethers::types::Address;
use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace};

use crate::{
    blockchain::FeedRegistryClient,
    errors::{BlockchainError, PriceError},
    price_oracle::types::{FeedReference, USD_QUOTE},
};

/// Finds the feed reporting an asset's USD price through the feed registry.
#[derive(Debug, Clone)]
pub struct PriceFeedResolver {
    registry: Arc<dyn FeedRegistryClient>,
    quote: Address,
}

impl PriceFeedResolver {
    pub fn new(registry: Arc<dyn FeedRegistryClient>) -> Self {
        Self { registry, quote: *USD_QUOTE }
    }

    /// `Ok(None)` when no USD feed is registered for `asset`; that is an
    /// ordinary outcome for most tokens.
    pub async fn resolve_feed(&self, asset: Address) -> Result<Option<FeedReference>, PriceError> {
        let feed = self.registry.get_feed(asset, self.quote).await?;
        match feed {
            Some(feed) => {
                debug!(?asset, ?feed, "Resolved USD price feed");
                Ok(Some(FeedReference { asset, feed }))
            }
            None => {
                debug!(?asset, "No USD price feed registered");
                Ok(None)
            }
        }
    }
}

/// In-process cache in front of a registry client.
///
/// Both hits and misses are cached; errors are not. Entries live for the
/// configured TTL and are never persisted.
pub struct CachedFeedRegistry {
    inner: Arc<dyn FeedRegistryClient>,
    cache: Cache<(Address, Address), Option<Address>>,
}

impl CachedFeedRegistry {
    pub fn new(inner: Arc<dyn FeedRegistryClient>, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder().time_to_live(ttl).max_capacity(max_capacity).build(),
        }
    }
}

impl std::fmt::Debug for CachedFeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFeedRegistry")
            .field("inner", &self.inner)
            .field("cache_size", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl FeedRegistryClient for CachedFeedRegistry {
    async fn get_feed(&self, base: Address, quote: Address) -> Result<Option<Address>, BlockchainError> {
        let key = (base, quote);
        if let Some(cached) = self.cache.get(&key).await {
            trace!(?base, "Feed registry cache hit");
            return Ok(cached);
        }

        let feed = self.inner.get_feed(base, quote).await?;
        self.cache.insert(key, feed).await;
        Ok(feed)
    }
}
