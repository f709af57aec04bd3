use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::{
    abi::{ParamType, Token},
    types::{Address, U256},
};

use feed_history::{
    blockchain::{FeedRegistryClient, PriceFeedClient},
    errors::BlockchainError,
    multicall::{BatchExecutor, DecodedCallResult, PreparedCall},
    price_oracle::{FeedMetadata, RoundId},
};

// === Mock Feed Registry ===
#[derive(Debug, Default)]
pub struct MockFeedRegistry {
    pub feeds: HashMap<Address, Address>,
    pub calls: AtomicUsize,
}

impl MockFeedRegistry {
    pub fn with_feeds(feeds: impl IntoIterator<Item = (Address, Address)>) -> Self {
        Self { feeds: feeds.into_iter().collect(), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl FeedRegistryClient for MockFeedRegistry {
    async fn get_feed(&self, base: Address, _quote: Address) -> Result<Option<Address>, BlockchainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.feeds.get(&base).copied())
    }
}

// === Mock Price Feeds ===
#[derive(Debug, Default)]
pub struct MockPriceFeeds {
    pub metadata: HashMap<Address, FeedMetadata>,
    pub failing_feeds: HashSet<Address>,
    /// Feeds whose `latestRound()` alone reverts.
    pub reverting_latest_round: HashSet<Address>,
    pub reads: AtomicUsize,
}

impl MockPriceFeeds {
    pub fn with_metadata(metadata: impl IntoIterator<Item = (Address, FeedMetadata)>) -> Self {
        Self { metadata: metadata.into_iter().collect(), ..Default::default() }
    }

    pub fn failing(mut self, feed: Address) -> Self {
        self.failing_feeds.insert(feed);
        self
    }

    pub fn reverting_latest_round(mut self, feed: Address) -> Self {
        self.reverting_latest_round.insert(feed);
        self
    }

    fn lookup(&self, feed: Address) -> Result<FeedMetadata, BlockchainError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_feeds.contains(&feed) {
            return Err(BlockchainError::Provider("upstream timeout".to_string()));
        }
        self.metadata
            .get(&feed)
            .copied()
            .ok_or_else(|| BlockchainError::Revert(format!("unknown feed {:?}", feed)))
    }
}

#[async_trait]
impl PriceFeedClient for MockPriceFeeds {
    async fn get_timestamp(&self, feed: Address, round_id: RoundId) -> Result<u64, BlockchainError> {
        assert_eq!(round_id, 1, "only the first round's timestamp is read");
        Ok(self.lookup(feed)?.first_round_timestamp)
    }

    async fn latest_round(&self, feed: Address) -> Result<RoundId, BlockchainError> {
        let metadata = self.lookup(feed)?;
        if self.reverting_latest_round.contains(&feed) {
            return Err(BlockchainError::Revert("latestRound: execution reverted".to_string()));
        }
        Ok(metadata.latest_round_id)
    }

    async fn latest_timestamp(&self, feed: Address) -> Result<u64, BlockchainError> {
        Ok(self.lookup(feed)?.latest_round_timestamp)
    }

    async fn decimals(&self, feed: Address) -> Result<u8, BlockchainError> {
        self.lookup(feed).map(|_| 8)
    }
}

// === Echo Executor ===
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Answer every round with price = timestamp = round id.
    Echo,
    /// Fail the whole execution.
    Fail,
    /// Drop the last result.
    Truncate,
}

/// Executes nothing on chain. Decodes the round id out of each
/// `getRoundData` calldata and answers from it.
#[derive(Debug)]
pub struct EchoExecutor {
    pub mode: ExecutorMode,
    /// Rounds reported as failed inner calls.
    pub missing_rounds: HashSet<RoundId>,
    pub invocations: AtomicUsize,
    pub received: Mutex<Vec<PreparedCall>>,
}

impl EchoExecutor {
    pub fn new(mode: ExecutorMode) -> Self {
        Self {
            mode,
            missing_rounds: HashSet::new(),
            invocations: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_missing_rounds(mut self, rounds: impl IntoIterator<Item = RoundId>) -> Self {
        self.missing_rounds.extend(rounds);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

pub fn round_id_from_calldata(calldata: &[u8]) -> RoundId {
    let decoded = ethers::abi::decode(&[ParamType::Uint(80)], &calldata[4..]).unwrap();
    match &decoded[0] {
        Token::Uint(value) => value.as_u128(),
        other => panic!("unexpected token {:?}", other),
    }
}

#[async_trait]
impl BatchExecutor for EchoExecutor {
    async fn execute_multicalls(&self, calls: Vec<PreparedCall>) -> Result<Vec<DecodedCallResult>, BlockchainError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().extend(calls.iter().cloned());

        if self.mode == ExecutorMode::Fail {
            return Err(BlockchainError::Provider("multicall reverted".to_string()));
        }

        let mut results: Vec<DecodedCallResult> = calls
            .iter()
            .map(|prepared| {
                let round_id = round_id_from_calldata(&prepared.call.calldata);
                if self.missing_rounds.contains(&round_id) {
                    return DecodedCallResult { metadata: prepared.metadata, success: false, tokens: Vec::new() };
                }
                let round = U256::from(round_id);
                DecodedCallResult {
                    metadata: prepared.metadata,
                    success: true,
                    tokens: vec![
                        Token::Uint(round),
                        Token::Int(round),
                        Token::Uint(round),
                        Token::Uint(round),
                        Token::Uint(round),
                    ],
                }
            })
            .collect();

        if self.mode == ExecutorMode::Truncate {
            results.pop();
        }
        Ok(results)
    }
}
