//! Sampling plan over a feed's round history.
//!
//! A feed can hold millions of rounds, so reading all of them is out of the
//! question. The planner estimates how many rounds the feed produces per day,
//! bounds the window to `lookback_days` worth of rounds ending at the latest
//! round, and walks that window with a fixed stride.
//!
//! All arithmetic is integer. Rounding is half-up (`floor(x + 1/2)`), which is
//! what `Math.round` does for the non-negative values involved here.

use crate::config::SamplingConfig;
use crate::price_oracle::types::{FeedMetadata, RoundId, FIRST_ROUND_ID, SECONDS_PER_DAY};

/// Why a feed yields no samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPlanReason {
    /// `latestRound()` returned 0.
    NoRounds,
    /// The latest timestamp precedes the first round's timestamp.
    InvertedTimestamps,
    /// Rounds are produced faster than one every half second on average, so
    /// the per-round interval rounds to zero.
    ZeroRoundInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Strictly increasing, stepped by `increment`, never above the latest round.
    pub round_ids: Vec<RoundId>,
    pub seconds_per_round: u128,
    pub rounds_per_day: u128,
    pub max_rounds: u128,
    pub first_round_id: RoundId,
    pub increment: RoundId,
}

impl SamplingPlan {
    pub fn len(&self) -> usize {
        self.round_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.round_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplingOutcome {
    Plan(SamplingPlan),
    Empty(EmptyPlanReason),
}

impl SamplingOutcome {
    pub fn round_ids(&self) -> &[RoundId] {
        match self {
            SamplingOutcome::Plan(plan) => &plan.round_ids,
            SamplingOutcome::Empty(_) => &[],
        }
    }

    pub fn into_plan(self) -> Option<SamplingPlan> {
        match self {
            SamplingOutcome::Plan(plan) => Some(plan),
            SamplingOutcome::Empty(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SamplingPlanner {
    config: SamplingConfig,
}

impl SamplingPlanner {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn plan(&self, metadata: &FeedMetadata) -> SamplingOutcome {
        let FeedMetadata { first_round_timestamp, latest_round_id, latest_round_timestamp } = *metadata;

        if latest_round_id == 0 {
            return SamplingOutcome::Empty(EmptyPlanReason::NoRounds);
        }
        if latest_round_timestamp < first_round_timestamp {
            return SamplingOutcome::Empty(EmptyPlanReason::InvertedTimestamps);
        }

        let elapsed = (latest_round_timestamp - first_round_timestamp) as u128;
        let seconds_per_round = div_round_half_up(elapsed, latest_round_id);
        if seconds_per_round == 0 {
            return SamplingOutcome::Empty(EmptyPlanReason::ZeroRoundInterval);
        }

        let rounds_per_day = (SECONDS_PER_DAY as u128 / seconds_per_round).max(1);
        let max_rounds = rounds_per_day.saturating_mul(self.config.lookback_days as u128);
        let first_round_id = latest_round_id.saturating_sub(max_rounds).max(FIRST_ROUND_ID);
        let increment = div_round_half_up(
            rounds_per_day * self.config.stride_numerator as u128,
            self.config.stride_denominator.max(1) as u128,
        )
        .max(1);

        let mut round_ids = Vec::with_capacity(((latest_round_id - first_round_id) / increment + 1) as usize);
        let mut round_id = first_round_id;
        while round_id <= latest_round_id {
            round_ids.push(round_id);
            match round_id.checked_add(increment) {
                Some(next) => round_id = next,
                None => break,
            }
        }

        SamplingOutcome::Plan(SamplingPlan {
            round_ids,
            seconds_per_round,
            rounds_per_day,
            max_rounds,
            first_round_id,
            increment,
        })
    }
}

/// Plan with the default one-year window and 0.8 day stride.
pub fn compute_sampling_plan(
    first_round_timestamp: u64,
    latest_round_id: RoundId,
    latest_round_timestamp: u64,
) -> SamplingOutcome {
    SamplingPlanner::default().plan(&FeedMetadata {
        first_round_timestamp,
        latest_round_id,
        latest_round_timestamp,
    })
}

/// `floor(numerator / denominator + 1/2)` without overflow. `denominator > 0`.
fn div_round_half_up(numerator: u128, denominator: u128) -> u128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder >= denominator - remainder {
        quotient + 1
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn plan(first_ts: u64, latest_round_id: RoundId, latest_ts: u64) -> SamplingPlan {
        compute_sampling_plan(first_ts, latest_round_id, latest_ts)
            .into_plan()
            .expect("expected a non-empty plan")
    }

    #[test]
    fn test_rounding_is_half_up() {
        assert_eq!(div_round_half_up(3, 2), 2); // 1.5
        assert_eq!(div_round_half_up(5, 2), 3); // 2.5
        assert_eq!(div_round_half_up(7, 5), 1); // 1.4
        assert_eq!(div_round_half_up(8, 5), 2); // 1.6
        assert_eq!(div_round_half_up(1, 3), 0); // 0.33
        assert_eq!(div_round_half_up(u128::MAX, u128::MAX), 1);
    }

    #[test]
    fn test_one_year_of_86_4_second_rounds() {
        let plan = plan(0, 365_000, 31_536_000);

        assert_eq!(plan.seconds_per_round, 86); // 86.4
        assert_eq!(plan.rounds_per_day, 1004); // 86400 / 86 = 1004.65
        assert_eq!(plan.max_rounds, 366_460);
        assert_eq!(plan.first_round_id, 1);
        assert_eq!(plan.increment, 803); // 803.2
        assert_eq!(plan.len(), 455);
        assert_eq!(plan.round_ids[0], 1);
        assert_eq!(plan.round_ids[1], 804);
        assert_eq!(*plan.round_ids.last().unwrap(), 364_563);
    }

    #[test]
    fn test_long_history_is_cut_to_one_year() {
        // 100k rounds, one every 1000s
        let plan = plan(1_600_000_000, 100_000, 1_700_000_000);

        assert_eq!(plan.seconds_per_round, 1000);
        assert_eq!(plan.rounds_per_day, 86);
        assert_eq!(plan.max_rounds, 31_390);
        assert_eq!(plan.first_round_id, 68_610);
        assert_eq!(plan.increment, 69); // 68.8
        assert_eq!(plan.len(), 455);
        assert_eq!(*plan.round_ids.last().unwrap(), 99_936);
    }

    #[test]
    fn test_slow_feed_samples_every_round() {
        // One round every two days
        let plan = plan(0, 10, 10 * 172_800);

        assert_eq!(plan.rounds_per_day, 1);
        assert_eq!(plan.increment, 1);
        assert_eq!(plan.round_ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_round_feed() {
        let plan = plan(1_000, 1, 1_000 + 3_600);
        assert_eq!(plan.round_ids, vec![1]);
    }

    #[test]
    fn test_half_second_interval_rounds_up() {
        // 0.5 s/round rounds to 1 s/round instead of collapsing to zero
        let plan = plan(0, 2_000_000, 1_000_000);
        assert_eq!(plan.seconds_per_round, 1);
        assert_eq!(plan.rounds_per_day, 86_400);
        assert_eq!(plan.increment, 69_120);
    }

    #[test]
    fn test_degenerate_inputs_are_empty() {
        assert_eq!(compute_sampling_plan(0, 0, 100), SamplingOutcome::Empty(EmptyPlanReason::NoRounds));
        assert_eq!(
            compute_sampling_plan(200, 10, 100),
            SamplingOutcome::Empty(EmptyPlanReason::InvertedTimestamps)
        );
        assert_eq!(
            compute_sampling_plan(100, 10, 100),
            SamplingOutcome::Empty(EmptyPlanReason::ZeroRoundInterval)
        );
        // Phase-encoded proxy round ids dwarf any elapsed time
        assert_eq!(
            compute_sampling_plan(1_600_000_000, (5u128 << 64) | 120, 1_700_000_000),
            SamplingOutcome::Empty(EmptyPlanReason::ZeroRoundInterval)
        );
        assert!(compute_sampling_plan(0, 0, 0).round_ids().is_empty());
    }

    #[test]
    fn test_custom_window_and_stride() {
        let planner = SamplingPlanner::new(SamplingConfig {
            lookback_days: 30,
            stride_numerator: 1,
            stride_denominator: 1,
        });
        let outcome = planner.plan(&FeedMetadata {
            first_round_timestamp: 0,
            latest_round_id: 1_000,
            latest_round_timestamp: 1_000 * 3_600,
        });
        let plan = outcome.into_plan().unwrap();

        assert_eq!(plan.rounds_per_day, 24);
        assert_eq!(plan.max_rounds, 720);
        assert_eq!(plan.first_round_id, 280);
        assert_eq!(plan.increment, 24);
        assert_eq!(plan.len(), 31);
    }

    #[test]
    fn test_tiny_stride_factor_still_progresses() {
        let planner = SamplingPlanner::new(SamplingConfig {
            lookback_days: 365,
            stride_numerator: 1,
            stride_denominator: 10,
        });
        let plan = planner
            .plan(&FeedMetadata { first_round_timestamp: 0, latest_round_id: 5, latest_round_timestamp: 5 * 200_000 })
            .into_plan()
            .unwrap();
        assert_eq!(plan.increment, 1);
        assert_eq!(plan.round_ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_randomized_plans_are_monotonic_and_bounded() {
        let mut rng = StdRng::seed_from_u64(0x5eed_feed);

        for _ in 0..2_000 {
            let latest_round_id: RoundId = rng.gen_range(1..=5_000_000);
            let first_ts: u64 = rng.gen_range(1_500_000_000..1_700_000_000);
            let span: u64 = if rng.gen_bool(0.1) { rng.gen_range(0..1_000) } else { rng.gen_range(0..=315_360_000) };

            match compute_sampling_plan(first_ts, latest_round_id, first_ts + span) {
                SamplingOutcome::Empty(reason) => {
                    assert_eq!(reason, EmptyPlanReason::ZeroRoundInterval);
                    assert!((span as u128) * 2 < latest_round_id);
                }
                SamplingOutcome::Plan(plan) => {
                    let lower = latest_round_id.saturating_sub(plan.max_rounds).max(1);
                    assert!(!plan.is_empty());
                    assert!(plan.increment >= 1);
                    assert_eq!(plan.round_ids[0], lower);
                    if latest_round_id <= plan.max_rounds {
                        assert_eq!(plan.round_ids[0], 1);
                    }
                    for pair in plan.round_ids.windows(2) {
                        assert_eq!(pair[1] - pair[0], plan.increment);
                    }
                    let last = *plan.round_ids.last().unwrap();
                    assert!(last <= latest_round_id);
                    assert!(last + plan.increment > latest_round_id);
                    assert!(plan.round_ids.iter().all(|id| (lower..=latest_round_id).contains(id)));
                    assert!(plan.len() as u128 <= plan.max_rounds / plan.increment + 1);
                }
            }
        }
    }
}
