//! Sampled historical USD prices for on-chain assets, read from Chainlink
//! price feeds and batched through Multicall3.

pub mod blockchain;
pub mod config;
pub mod errors;
pub mod multicall;
pub mod price_oracle;
pub mod rate_limiter;
