use ethers::types::Address;

use crate::{
    blockchain::PriceFeedClient,
    multicall::{BatchExecutor, CallMetadata, PreparedCall, RawCall},
    price_oracle::types::RoundId,
};

/// One pending `getRoundData` read, tagged with the asset it prices.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCallDescriptor {
    pub asset_id: Address,
    pub round_id: RoundId,
    pub call: RawCall,
}

impl RawCallDescriptor {
    pub fn prepare(self, executor: &dyn BatchExecutor) -> PreparedCall {
        executor.get_data_from_raw_call(self.call, CallMetadata { asset_id: self.asset_id })
    }
}

/// One descriptor per round id, in the same order. Nothing is executed.
pub fn build_raw_calls(
    asset_id: Address,
    feeds: &dyn PriceFeedClient,
    feed: Address,
    round_ids: &[RoundId],
) -> Vec<RawCallDescriptor> {
    round_ids
        .iter()
        .map(|&round_id| RawCallDescriptor {
            asset_id,
            round_id,
            call: feeds.round_data_call(feed, round_id),
        })
        .collect()
}
