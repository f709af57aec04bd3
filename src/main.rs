//! Command line entry point: prints sampled USD price history for one or more
//! assets as JSON.
//!
//! 1. Load configuration → initialise tracing
//! 2. Build the HTTP provider, rate limiter, feed clients and multicall executor
//!    for the selected chain
//! 3. Fetch every asset's history in a single batched pass and print it

use std::{collections::HashMap, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use clap::Parser;
use ethers::{
    providers::{Http, Provider},
    types::Address,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use feed_history::{
    blockchain::{EthersFeedRegistry, EthersPriceFeedClient, FeedRegistryClient, PriceFeedClient},
    config::{ChainSettings, Config},
    errors::FeedHistoryError,
    multicall::MulticallExecutor,
    price_oracle::{CachedFeedRegistry, HistoricalPriceService, PricePoint},
    rate_limiter::ChainRateLimiter,
};

#[derive(Parser, Debug)]
#[command(name = "feed-history", version, about = "Sampled historical USD prices from Chainlink feeds")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config/feed_history.json")]
    config: PathBuf,

    /// Chain name as configured under `chains`
    #[arg(long, default_value = "ethereum")]
    chain: String,

    /// Also print prices scaled by each feed's decimals
    #[arg(long)]
    scaled: bool,

    /// Asset addresses
    #[arg(required = true)]
    assets: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AssetHistory {
    asset: Address,
    feed: Option<Address>,
    decimals: Option<u8>,
    points: Vec<PointOutput>,
}

#[derive(Debug, Serialize)]
struct PointOutput {
    #[serde(flatten)]
    point: PricePoint,
    time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price_usd: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<(), FeedHistoryError> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config).await?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level))
        .add_directive(directive("ethers_providers=warn")?)
        .add_directive(directive("ethers=warn")?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let assets = cli
        .assets
        .iter()
        .map(|raw| {
            Address::from_str(raw).map_err(|e| FeedHistoryError::Config(format!("Invalid asset address {}: {}", raw, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let chain_config = config.get_chain_config(&cli.chain)?;
    let registry_address = chain_config.feed_registry_address.ok_or_else(|| {
        FeedHistoryError::Config(format!("Chain {} has no feed_registry_address configured", cli.chain))
    })?;

    let provider = Arc::new(
        Provider::<Http>::try_from(chain_config.rpc_url.as_str())
            .map_err(|e| FeedHistoryError::Config(format!("Invalid RPC URL for {}: {}", cli.chain, e)))?,
    );
    let rate_limiter = Arc::new(ChainRateLimiter::new(&cli.chain, Arc::new(ChainSettings::from(chain_config))));

    let registry: Arc<dyn FeedRegistryClient> = Arc::new(CachedFeedRegistry::new(
        Arc::new(EthersFeedRegistry::new(provider.clone(), registry_address, rate_limiter.clone())),
        Duration::from_secs(3600),
        10_000,
    ));
    let feeds: Arc<dyn PriceFeedClient> = Arc::new(EthersPriceFeedClient::new(provider.clone(), rate_limiter.clone()));
    let executor = Arc::new(MulticallExecutor::from_config(provider, chain_config, rate_limiter.clone()));

    let service = HistoricalPriceService::new(registry, feeds.clone(), executor, config.sampling);

    info!(chain = %cli.chain, assets = assets.len(), "Fetching historical prices");
    let mut histories = service.get_historical_prices_for_assets(&assets).await?;

    let mut output = Vec::with_capacity(assets.len());
    let mut decimals_by_feed: HashMap<Address, u8> = HashMap::new();
    for asset in &assets {
        let points = histories.remove(asset).unwrap_or_default();
        let feed = if cli.scaled && !points.is_empty() {
            service.resolve_feed(*asset).await?.map(|r| r.feed)
        } else {
            None
        };

        let decimals = match feed {
            Some(feed) => match decimals_by_feed.get(&feed) {
                Some(decimals) => Some(*decimals),
                None => {
                    let decimals = feeds.decimals(feed).await?;
                    decimals_by_feed.insert(feed, decimals);
                    Some(decimals)
                }
            },
            None => None,
        };

        let points = points
            .into_iter()
            .map(|point| {
                let price_usd = match decimals {
                    Some(decimals) => match point.price_f64(decimals) {
                        Ok(price) => Some(price),
                        Err(e) => {
                            warn!(?asset, round_id = %point.round_id, error = %e, "Could not scale price");
                            None
                        }
                    },
                    None => None,
                };
                PointOutput {
                    time: DateTime::<Utc>::from_timestamp(point.timestamp as i64, 0),
                    price_usd,
                    point,
                }
            })
            .collect();

        output.push(AssetHistory { asset: *asset, feed, decimals, points });
    }

    let rendered = serde_json::to_string_pretty(&output).map_err(|e| FeedHistoryError::Output(e.to_string()))?;
    println!("{}", rendered);

    let stats = rate_limiter.stats();
    info!(
        rpc_calls = stats.total_calls,
        failed = stats.failed_calls,
        wait_ms = stats.total_wait_time_ms,
        "Done"
    );
    Ok(())
}

fn directive(raw: &str) -> Result<tracing_subscriber::filter::Directive, FeedHistoryError> {
    raw.parse()
        .map_err(|e| FeedHistoryError::Config(format!("Invalid log directive {}: {}", raw, e)))
}
