//! # Multicall Batch Executor
//!
//! Groups independent contract reads into Multicall3 `tryAggregate` calls so a
//! few hundred reads cost a handful of `eth_call` round trips. Results come back
//! in request order, each carrying the metadata the caller attached to it.
//!
//! Inner call failures do not fail the batch: they come back with
//! `success == false`. A response that cannot be decoded, or that does not line
//! up with the request, fails the whole execution.

use async_trait::async_trait;
use ethers::{
    abi::{ParamType, Token},
    providers::Middleware,
    types::{Address, Bytes, TransactionRequest},
};
use futures::{stream, StreamExt, TryStreamExt};
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

use crate::config::PerChainConfig;
use crate::errors::BlockchainError;
use crate::rate_limiter::ChainRateLimiter;

lazy_static! {
    static ref TRY_AGGREGATE_SELECTOR: [u8; 4] = {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&ethers::utils::id("tryAggregate(bool,(address,bytes)[])")[0..4]);
        selector
    };
}

//================================================================================================//
//                                             TYPES                                              //
//================================================================================================//

/// An uninvoked, fully parameterized contract read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCall {
    pub target: Address,
    pub calldata: Bytes,
    /// Shape of the return data, used to decode it.
    pub outputs: Vec<ParamType>,
}

/// Caller data carried through execution for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallMetadata {
    pub asset_id: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub call: RawCall,
    pub metadata: CallMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCallResult {
    pub metadata: CallMetadata,
    pub success: bool,
    /// Decoded return values. Empty when `success` is false.
    pub tokens: Vec<Token>,
}

//================================================================================================//
//                                             TRAIT                                              //
//================================================================================================//

#[async_trait]
pub trait BatchExecutor: std::fmt::Debug + Send + Sync {
    fn get_data_from_raw_call(&self, call: RawCall, metadata: CallMetadata) -> PreparedCall {
        PreparedCall { call, metadata }
    }

    /// Executes every call and returns one result per call, in order.
    async fn execute_multicalls(&self, calls: Vec<PreparedCall>) -> Result<Vec<DecodedCallResult>, BlockchainError>;
}

//================================================================================================//
//                                         IMPLEMENTATION                                         //
//================================================================================================//

/// `BatchExecutor` backed by a deployed Multicall3 contract.
pub struct MulticallExecutor<M> {
    client: Arc<M>,
    address: Address,
    max_calls_per_batch: usize,
    max_concurrent_batches: usize,
    rate_limiter: Arc<ChainRateLimiter>,
}

impl<M> std::fmt::Debug for MulticallExecutor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticallExecutor")
            .field("address", &self.address)
            .field("max_calls_per_batch", &self.max_calls_per_batch)
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("chain", &self.rate_limiter.chain())
            .finish()
    }
}

impl<M: Middleware + 'static> MulticallExecutor<M> {
    pub fn new(
        client: Arc<M>,
        address: Address,
        max_calls_per_batch: usize,
        max_concurrent_batches: usize,
        rate_limiter: Arc<ChainRateLimiter>,
    ) -> Self {
        Self {
            client,
            address,
            max_calls_per_batch: max_calls_per_batch.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
            rate_limiter,
        }
    }

    pub fn from_config(client: Arc<M>, chain_config: &PerChainConfig, rate_limiter: Arc<ChainRateLimiter>) -> Self {
        Self::new(
            client,
            chain_config.multicall_address,
            chain_config.max_calls_per_batch,
            chain_config.max_concurrent_batches,
            rate_limiter,
        )
    }

    async fn execute_batch(&self, index: usize, batch: &[PreparedCall]) -> Result<Vec<DecodedCallResult>, BlockchainError> {
        let tx = TransactionRequest::new()
            .to(self.address)
            .data(encode_try_aggregate(batch));

        trace!(batch = index, calls = batch.len(), "Executing multicall batch");

        let response = self
            .rate_limiter
            .execute_rpc_call("multicall", || async move {
                self.client
                    .call(&tx.into(), None)
                    .await
                    .map_err(|e| BlockchainError::Provider(e.to_string()))
            })
            .await?;

        let returns = decode_try_aggregate_response(&response)?;
        if returns.len() != batch.len() {
            return Err(BlockchainError::DataEncoding(format!(
                "Multicall batch {} returned {} results for {} calls",
                index,
                returns.len(),
                batch.len()
            )));
        }

        batch
            .iter()
            .zip(returns)
            .map(|(prepared, (success, data))| decode_call_result(prepared, success, &data))
            .collect()
    }
}

#[async_trait]
impl<M: Middleware + 'static> BatchExecutor for MulticallExecutor<M> {
    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    async fn execute_multicalls(&self, calls: Vec<PreparedCall>) -> Result<Vec<DecodedCallResult>, BlockchainError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let batch_count = (calls.len() + self.max_calls_per_batch - 1) / self.max_calls_per_batch;
        debug!(
            calls = calls.len(),
            batches = batch_count,
            max_calls_per_batch = self.max_calls_per_batch,
            "Dispatching multicall batches"
        );

        let pending = calls
            .chunks(self.max_calls_per_batch)
            .enumerate()
            .map(|(index, batch)| self.execute_batch(index, batch))
            .collect::<Vec<_>>();

        // `buffered` keeps batch order regardless of completion order.
        let batches: Vec<Vec<DecodedCallResult>> = stream::iter(pending)
            .buffered(self.max_concurrent_batches)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }
}

//================================================================================================//
//                                           HELPERS                                              //
//================================================================================================//

pub fn encode_try_aggregate(calls: &[PreparedCall]) -> Bytes {
    let encoded_calls = calls
        .iter()
        .map(|prepared| {
            Token::Tuple(vec![
                Token::Address(prepared.call.target),
                Token::Bytes(prepared.call.calldata.to_vec()),
            ])
        })
        .collect();

    let encoded_params = ethers::abi::encode(&[Token::Bool(false), Token::Array(encoded_calls)]);

    let mut call_data = TRY_AGGREGATE_SELECTOR.to_vec();
    call_data.extend_from_slice(&encoded_params);
    Bytes::from(call_data)
}

pub fn decode_try_aggregate_response(data: &[u8]) -> Result<Vec<(bool, Bytes)>, BlockchainError> {
    let decoded = ethers::abi::decode(
        &[ParamType::Array(Box::new(ParamType::Tuple(vec![ParamType::Bool, ParamType::Bytes])))],
        data,
    )
    .map_err(|e| BlockchainError::DataEncoding(format!("Failed to decode multicall result: {}", e)))?;

    match decoded.into_iter().next() {
        Some(Token::Array(entries)) => entries
            .into_iter()
            .map(|token| match token {
                Token::Tuple(fields) => match fields.as_slice() {
                    [Token::Bool(success), Token::Bytes(bytes)] => Ok((*success, Bytes::from(bytes.clone()))),
                    _ => Err(BlockchainError::DataEncoding("Invalid tuple format in multicall response".to_string())),
                },
                _ => Err(BlockchainError::DataEncoding("Invalid return data format".to_string())),
            })
            .collect(),
        _ => Err(BlockchainError::DataEncoding("Invalid multicall response format".to_string())),
    }
}

fn decode_call_result(prepared: &PreparedCall, success: bool, data: &[u8]) -> Result<DecodedCallResult, BlockchainError> {
    // A call to an address without code succeeds with empty return data.
    if !success || data.is_empty() {
        return Ok(DecodedCallResult { metadata: prepared.metadata, success: false, tokens: Vec::new() });
    }

    let tokens = ethers::abi::decode(&prepared.call.outputs, data).map_err(|e| {
        BlockchainError::DataEncoding(format!(
            "Failed to decode return data of call to {:?}: {}",
            prepared.call.target, e
        ))
    })?;

    Ok(DecodedCallResult { metadata: prepared.metadata, success: true, tokens })
}
