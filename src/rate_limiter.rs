// File: src/rate_limiter.rs

use crate::config::ChainSettings;
use crate::errors::BlockchainError;
use futures::Future;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
pub struct RpcCallMetrics {
    pub total_calls: AtomicU64,
    pub successful_calls: AtomicU64,
    pub failed_calls: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcCallStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_wait_time_ms: u64,
}

/// Per-chain gate every outgoing RPC request passes through: a governor quota,
/// a concurrency semaphore, and a bounded wait for both.
///
/// Calls are not retried here. A failed request is reported to the caller as is.
#[derive(Debug)]
pub struct ChainRateLimiter {
    chain: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    concurrency_limiter: Arc<Semaphore>,
    metrics: RpcCallMetrics,
    settings: Arc<ChainSettings>,
}

impl ChainRateLimiter {
    pub fn new(chain: &str, settings: Arc<ChainSettings>) -> Self {
        let defaults = ChainSettings::default();
        let rps = NonZeroU32::new(settings.rps_limit)
            .or_else(|| NonZeroU32::new(defaults.rps_limit))
            .unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(settings.rate_limit_burst_size)
            .or_else(|| NonZeroU32::new(defaults.rate_limit_burst_size))
            .unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(burst);

        // Hard cap at 50 concurrent
        let max_concurrent = settings.max_concurrent_requests.clamp(1, 50);

        info!(
            chain = chain,
            rps_limit = rps.get(),
            max_concurrent = max_concurrent,
            "Initialized chain rate limiter"
        );

        Self {
            chain: chain.to_string(),
            rate_limiter: Arc::new(GovernorRateLimiter::direct(quota)),
            concurrency_limiter: Arc::new(Semaphore::new(max_concurrent as usize)),
            metrics: RpcCallMetrics::default(),
            settings,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub async fn execute_rpc_call<F, Fut, T>(
        &self,
        method_name: &str,
        call_fn: F,
    ) -> Result<T, BlockchainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BlockchainError>>,
    {
        self.metrics.total_calls.fetch_add(1, Ordering::Relaxed);
        let wait_budget = Duration::from_secs(self.settings.rate_limit_timeout_secs);
        let wait_start = Instant::now();

        let _permit = timeout(wait_budget, self.concurrency_limiter.acquire())
            .await
            .map_err(|_| self.wait_timed_out(method_name, "concurrency"))?
            .map_err(|_| BlockchainError::RateLimitError("Concurrency semaphore closed".to_string()))?;

        timeout(wait_budget, self.rate_limiter.until_ready())
            .await
            .map_err(|_| self.wait_timed_out(method_name, "quota"))?;

        let waited = wait_start.elapsed();
        self.metrics.total_wait_time_ms.fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        trace!(
            chain = %self.chain,
            method = method_name,
            wait_ms = waited.as_millis(),
            "Rate limit check passed"
        );

        let result = call_fn().await;
        match &result {
            Ok(_) => {
                self.metrics.successful_calls.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.failed_calls.fetch_add(1, Ordering::Relaxed);
                debug!(chain = %self.chain, method = method_name, error = %e, "RPC call failed");
            }
        }
        result
    }

    fn wait_timed_out(&self, method_name: &str, limiter: &str) -> BlockchainError {
        self.metrics.failed_calls.fetch_add(1, Ordering::Relaxed);
        BlockchainError::RateLimitError(format!(
            "Timed out after {}s waiting on {} limiter for {} on {}",
            self.settings.rate_limit_timeout_secs, limiter, method_name, self.chain
        ))
    }

    pub fn stats(&self) -> RpcCallStats {
        RpcCallStats {
            total_calls: self.metrics.total_calls.load(Ordering::Relaxed),
            successful_calls: self.metrics.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.metrics.failed_calls.load(Ordering::Relaxed),
            total_wait_time_ms: self.metrics.total_wait_time_ms.load(Ordering::Relaxed),
        }
    }
}
