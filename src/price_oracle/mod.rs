// src/price_oracle/mod.rs

//! Historical USD prices from Chainlink feeds.
//!
//! `HistoricalPriceService` drives the pipeline: `feed_resolver` finds the
//! feed, `sampling` picks which rounds to read, `raw_calls` turns those rounds
//! into uninvoked reads, and a `BatchExecutor` runs them.

pub mod feed_resolver;
pub mod historical_price_provider;
pub mod raw_calls;
pub mod sampling;
pub mod types;

pub use feed_resolver::{CachedFeedRegistry, PriceFeedResolver};
pub use historical_price_provider::HistoricalPriceService;
pub use raw_calls::{build_raw_calls, RawCallDescriptor};
pub use sampling::{compute_sampling_plan, EmptyPlanReason, SamplingOutcome, SamplingPlan, SamplingPlanner};
pub use types::{FeedMetadata, FeedReference, PricePoint, RoundId, USD_QUOTE};
