use ethers::types::{Address, I256, U256};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{BlockchainError, PriceError};

/// Chainlink round identifier. Feeds declare it as `uint80`.
pub type RoundId = u128;

/// Round ids of a feed start at 1.
pub const FIRST_ROUND_ID: RoundId = 1;

pub const SECONDS_PER_DAY: u64 = 86_400;

lazy_static! {
    /// `Denominations.USD` in the Chainlink feed registry. Not a token; the
    /// registry reserves this address to mean "US Dollar" as the quote side.
    pub static ref USD_QUOTE: Address = Address::from_str("0x0000000000000000000000000000000000000348")
        .expect("Invalid USD denomination address");
}

/// An asset paired with the feed that reports its USD price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedReference {
    pub asset: Address,
    pub feed: Address,
}

/// The three values the sampling plan is derived from.
///
/// They come from independent reads, so `latest_round_id` and
/// `latest_round_timestamp` may describe slightly different rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedMetadata {
    pub first_round_timestamp: u64,
    pub latest_round_id: RoundId,
    pub latest_round_timestamp: u64,
}

/// One historical observation read back from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub asset_id: Address,
    pub round_id: RoundId,
    pub timestamp: u64,
    /// Raw feed answer, scaled by the feed's `decimals()`.
    #[serde(with = "i256_dec")]
    pub price: I256,
}

impl PricePoint {
    /// The answer as a float, given the feed's decimals.
    pub fn price_f64(&self, decimals: u8) -> Result<f64, PriceError> {
        let formatted = ethers::utils::format_units(self.price, decimals as u32)
            .map_err(|e| PriceError::Validation(format!("Failed to format price {}: {}", self.price, e)))?;
        formatted
            .parse::<f64>()
            .map_err(|e| PriceError::Validation(format!("Failed to parse price {}: {}", formatted, e)))
    }
}

pub fn u256_to_u64(value: U256, field: &'static str) -> Result<u64, BlockchainError> {
    if value > U256::from(u64::MAX) {
        return Err(BlockchainError::OutOfRange { field, value: value.to_string() });
    }
    Ok(value.as_u64())
}

pub fn u256_to_round_id(value: U256, field: &'static str) -> Result<RoundId, BlockchainError> {
    if value > U256::from(u128::MAX) {
        return Err(BlockchainError::OutOfRange { field, value: value.to_string() });
    }
    Ok(value.as_u128())
}

mod i256_dec {
    use ethers::types::I256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        I256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}
