//! # Chain Clients
//!
//! Typed, rate-limited access to the two Chainlink contracts the historical
//! price pipeline reads: the feed registry and the per-asset price feeds.
//!
//! The traits are the seams the service is built against; the `Ethers*`
//! implementations work over any `ethers` middleware. Contract handles are
//! cheap wrappers around the shared client, so a feed handle is bound per call
//! while the underlying connection is reused.

use async_trait::async_trait;
use ethers::{
    abi::{AbiEncode, ParamType, Token},
    contract::{abigen, ContractError},
    providers::Middleware,
    types::{Address, I256, U256},
};
use std::sync::Arc;
use tracing::debug;

use crate::errors::BlockchainError;
use crate::multicall::RawCall;
use crate::price_oracle::types::{u256_to_round_id, u256_to_u64, RoundId};
use crate::rate_limiter::ChainRateLimiter;

abigen!(
    FeedRegistry,
    r#"[
        function getFeed(address base, address quote) external view returns (address aggregator)
    ]"#,
);

abigen!(
    ChainlinkAggregator,
    r#"[
        function getTimestamp(uint256 roundId) external view returns (uint256)
        function latestRound() external view returns (uint256)
        function latestTimestamp() external view returns (uint256)
        function decimals() external view returns (uint8)
        function getRoundData(uint80 roundId) external view returns (uint80, int256, uint256, uint256, uint80)
    ]"#,
);

//================================================================================================//
//                                             TYPES                                              //
//================================================================================================//

/// Decoded `getRoundData` return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: RoundId,
    pub answer: I256,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: RoundId,
}

pub fn round_data_outputs() -> Vec<ParamType> {
    vec![
        ParamType::Uint(80),
        ParamType::Int(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(80),
    ]
}

/// Uninvoked `getRoundData(round_id)` against `feed`.
pub fn round_data_raw_call(feed: Address, round_id: RoundId) -> RawCall {
    RawCall {
        target: feed,
        calldata: GetRoundDataCall { round_id }.encode().into(),
        outputs: round_data_outputs(),
    }
}

pub fn decode_round_data(tokens: &[Token]) -> Result<RoundData, BlockchainError> {
    match tokens {
        [Token::Uint(round_id), Token::Int(answer), Token::Uint(started_at), Token::Uint(updated_at), Token::Uint(answered_in_round)] => {
            Ok(RoundData {
                round_id: u256_to_round_id(*round_id, "roundId")?,
                answer: I256::from_raw(*answer),
                started_at: u256_to_u64(*started_at, "startedAt")?,
                updated_at: u256_to_u64(*updated_at, "updatedAt")?,
                answered_in_round: u256_to_round_id(*answered_in_round, "answeredInRound")?,
            })
        }
        other => Err(BlockchainError::DataEncoding(format!(
            "Unexpected getRoundData return shape: {} tokens",
            other.len()
        ))),
    }
}

fn contract_error<M: Middleware>(method: &str, e: ContractError<M>) -> BlockchainError {
    if matches!(e, ContractError::Revert(_)) {
        BlockchainError::Revert(format!("{}: {}", method, e))
    } else {
        BlockchainError::ContractCall(format!("{}: {}", method, e))
    }
}

//================================================================================================//
//                                             TRAITS                                             //
//================================================================================================//

#[async_trait]
pub trait FeedRegistryClient: std::fmt::Debug + Send + Sync {
    /// Feed reporting `base` priced in `quote`, or `None` when the registry has
    /// no such pairing.
    async fn get_feed(&self, base: Address, quote: Address) -> Result<Option<Address>, BlockchainError>;
}

#[async_trait]
pub trait PriceFeedClient: std::fmt::Debug + Send + Sync {
    async fn get_timestamp(&self, feed: Address, round_id: RoundId) -> Result<u64, BlockchainError>;
    async fn latest_round(&self, feed: Address) -> Result<RoundId, BlockchainError>;
    async fn latest_timestamp(&self, feed: Address) -> Result<u64, BlockchainError>;
    async fn decimals(&self, feed: Address) -> Result<u8, BlockchainError>;

    fn round_data_call(&self, feed: Address, round_id: RoundId) -> RawCall {
        round_data_raw_call(feed, round_id)
    }
}

//================================================================================================//
//                                         IMPLEMENTATION                                         //
//================================================================================================//

/// Registry client over an `ethers` middleware.
///
/// Unknown pairs surface as `None` whether the registry reverts with a reason
/// or the node answers a bare `execution reverted` without revert data; ethers
/// classifies both as `ContractError::Revert`. Any other JSON-RPC error
/// propagates.
pub struct EthersFeedRegistry<M> {
    registry: FeedRegistry<M>,
    rate_limiter: Arc<ChainRateLimiter>,
}

impl<M: Middleware + 'static> EthersFeedRegistry<M> {
    pub fn new(client: Arc<M>, registry_address: Address, rate_limiter: Arc<ChainRateLimiter>) -> Self {
        Self { registry: FeedRegistry::new(registry_address, client), rate_limiter }
    }
}

impl<M> std::fmt::Debug for EthersFeedRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthersFeedRegistry")
            .field("address", &self.registry.address())
            .field("chain", &self.rate_limiter.chain())
            .finish()
    }
}

#[async_trait]
impl<M: Middleware + 'static> FeedRegistryClient for EthersFeedRegistry<M> {
    async fn get_feed(&self, base: Address, quote: Address) -> Result<Option<Address>, BlockchainError> {
        let result = self
            .rate_limiter
            .execute_rpc_call("getFeed", || async move {
                self.registry.get_feed(base, quote).call().await.map_err(|e| contract_error("getFeed", e))
            })
            .await;

        match result {
            Ok(feed) if feed.is_zero() => Ok(None),
            Ok(feed) => Ok(Some(feed)),
            // The registry reverts with "Feed not found" for unknown pairs
            Err(BlockchainError::Revert(reason)) => {
                debug!(?base, ?quote, %reason, "Feed registry has no feed for pair");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

pub struct EthersPriceFeedClient<M> {
    client: Arc<M>,
    rate_limiter: Arc<ChainRateLimiter>,
}

impl<M: Middleware + 'static> EthersPriceFeedClient<M> {
    pub fn new(client: Arc<M>, rate_limiter: Arc<ChainRateLimiter>) -> Self {
        Self { client, rate_limiter }
    }

    fn aggregator(&self, feed: Address) -> ChainlinkAggregator<M> {
        ChainlinkAggregator::new(feed, self.client.clone())
    }
}

impl<M> std::fmt::Debug for EthersPriceFeedClient<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthersPriceFeedClient")
            .field("chain", &self.rate_limiter.chain())
            .finish()
    }
}

#[async_trait]
impl<M: Middleware + 'static> PriceFeedClient for EthersPriceFeedClient<M> {
    async fn get_timestamp(&self, feed: Address, round_id: RoundId) -> Result<u64, BlockchainError> {
        let aggregator = self.aggregator(feed);
        let raw = self
            .rate_limiter
            .execute_rpc_call("getTimestamp", || async move {
                aggregator
                    .get_timestamp(U256::from(round_id))
                    .call()
                    .await
                    .map_err(|e| contract_error("getTimestamp", e))
            })
            .await?;
        u256_to_u64(raw, "getTimestamp")
    }

    async fn latest_round(&self, feed: Address) -> Result<RoundId, BlockchainError> {
        let aggregator = self.aggregator(feed);
        let raw = self
            .rate_limiter
            .execute_rpc_call("latestRound", || async move {
                aggregator.latest_round().call().await.map_err(|e| contract_error("latestRound", e))
            })
            .await?;
        u256_to_round_id(raw, "latestRound")
    }

    async fn latest_timestamp(&self, feed: Address) -> Result<u64, BlockchainError> {
        let aggregator = self.aggregator(feed);
        let raw = self
            .rate_limiter
            .execute_rpc_call("latestTimestamp", || async move {
                aggregator.latest_timestamp().call().await.map_err(|e| contract_error("latestTimestamp", e))
            })
            .await?;
        u256_to_u64(raw, "latestTimestamp")
    }

    async fn decimals(&self, feed: Address) -> Result<u8, BlockchainError> {
        let aggregator = self.aggregator(feed);
        self.rate_limiter
            .execute_rpc_call("decimals", || async move {
                aggregator.decimals().call().await.map_err(|e| contract_error("decimals", e))
            })
            .await
    }
}
