//! # Centralized Error Handling
//!
//! Typed error enums for the crate. Chain access failures are `BlockchainError`,
//! failures of the historical price pipeline are `PriceError`, and the binary
//! folds everything into `FeedHistoryError`.
//!
//! A missing feed and a feed without usable rounds are not errors: both surface
//! as an empty price list.

use thiserror::Error;

/// The top-level error type used by the command line entry point.
#[derive(Error, Debug)]
pub enum FeedHistoryError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
    #[error("Price feed error: {0}")]
    Price(#[from] PriceError),
    #[error("Output error: {0}")]
    Output(String),
}

impl From<eyre::Report> for FeedHistoryError {
    fn from(e: eyre::Report) -> Self {
        FeedHistoryError::Config(format!("{:#}", e))
    }
}

/// Errors related to RPC access, contract calls and ABI handling.
#[derive(Error, Debug, Clone)]
pub enum BlockchainError {
    #[error("RPC provider error: {0}")]
    Provider(String),
    #[error("Contract call reverted: {0}")]
    Revert(String),
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    #[error("Data encoding/decoding error: {0}")]
    DataEncoding(String),
    #[error("Rate limit error: {0}")]
    RateLimitError(String),
    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// Errors raised while fetching historical prices for an asset.
#[derive(Error, Debug, Clone)]
pub enum PriceError {
    #[error("Failed to fetch feed metadata for {feed:?}: {source}")]
    MetadataFetch {
        feed: ethers::types::Address,
        #[source]
        source: BlockchainError,
    },
    #[error("Batch execution failed: {0}")]
    BatchExecution(String),
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
    #[error("Validation error: {0}")]
    Validation(String),
}
