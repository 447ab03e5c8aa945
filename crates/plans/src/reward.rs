//! Monthly reward policy.

use crate::plan::Plan;
use relaymeter_types::{mul_div_u64, Amount, ComputeUnits};

/// Turns a provider's compute units into the combined provider + delegator
/// reward owed out of a subscription's monthly pool.
pub trait RewardPolicy {
    /// Must return the whole pool when `provider_cu == total_cu`, zero when
    /// `provider_cu == 0`, and zero (never a division) when `total_cu == 0`.
    fn total_monthly_reward(
        &self,
        plan: &Plan,
        provider_cu: ComputeUnits,
        total_cu: ComputeUnits,
    ) -> Amount;
}

/// Splits the plan price pro rata by compute units, truncating.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalReward;

impl RewardPolicy for ProportionalReward {
    fn total_monthly_reward(
        &self,
        plan: &Plan,
        provider_cu: ComputeUnits,
        total_cu: ComputeUnits,
    ) -> Amount {
        calc_total_monthly_reward(plan.price, provider_cu, total_cu)
    }
}

/// `floor(pool * provider_cu / total_cu)`.
///
/// `provider_cu` is clamped to `total_cu` so the result never exceeds the pool.
pub fn calc_total_monthly_reward(
    pool: Amount,
    provider_cu: ComputeUnits,
    total_cu: ComputeUnits,
) -> Amount {
    if total_cu == 0 {
        return 0;
    }
    mul_div_u64(pool, provider_cu.min(total_cu), total_cu).unwrap_or(0)
}
