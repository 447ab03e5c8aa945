//! Monthly payout query surface.

use crate::dual_staking::ProviderRewards;
use crate::errors::{Result, SettlementError};
use crate::payout::PayoutKeeper;
use relaymeter_types::{AccountAddress, Amount};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyPayoutRequest {
    /// Provider account address
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyPayoutResponse {
    pub amount: Amount,
}

impl PayoutKeeper<'_> {
    /// Settle and pay the requesting provider's monthly rewards.
    ///
    /// Transfers are issued on every call; see
    /// [`compute_payout`](Self::compute_payout) for a side-effect free preview.
    pub fn monthly_payout(
        &self,
        request: Option<&MonthlyPayoutRequest>,
        rewards: &mut dyn ProviderRewards,
    ) -> Result<MonthlyPayoutResponse> {
        let request =
            request.ok_or_else(|| SettlementError::InvalidArgument("invalid request".into()))?;

        let provider: AccountAddress = request.provider.parse().map_err(|e| {
            SettlementError::InvalidArgument(format!(
                "invalid provider address {}: {e}",
                request.provider
            ))
        })?;

        debug!(target: "treasury", provider = %provider, "Monthly payout requested");
        let amount = self.settle_provider(&provider, rewards)?;
        Ok(MonthlyPayoutResponse { amount })
    }
}
