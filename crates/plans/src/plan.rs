//! Service plan definitions.

use crate::errors::PlanError;
use crate::geolocation::GeoCatalog;
use relaymeter_types::{Amount, Height};
use serde::{Deserialize, Serialize};

/// Usage limits and pairing rules attached to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    /// Geolocation mask of regions the plan may be served from
    pub geolocation_profile: u32,
    /// CU a subscription may consume over its whole month
    pub total_cu_limit: u64,
    /// CU a subscription may consume per epoch
    pub epoch_cu_limit: u64,
    pub max_providers_to_pair: u64,
}

/// A purchasable service plan. The monthly `price` is the reward pool that
/// providers serving a subscription of this plan share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub index: String,
    /// Height at which this version of the plan was registered
    pub block: Height,
    pub price: Amount,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allow_overuse: bool,
    #[serde(default)]
    pub overuse_rate: u64,
    #[serde(default)]
    pub annual_discount_percentage: u64,
    pub policy: PlanPolicy,
}

impl Plan {
    /// Basic semantic validation performed before a plan version is stored.
    pub fn validate(&self, geo: &GeoCatalog) -> Result<(), PlanError> {
        if self.index.trim().is_empty() {
            return Err(PlanError::EmptyIndex);
        }
        if self.price == 0 {
            return Err(PlanError::ZeroPrice(self.index.clone()));
        }
        if self.policy.epoch_cu_limit > self.policy.total_cu_limit {
            return Err(PlanError::InvalidCuLimits {
                epoch: self.policy.epoch_cu_limit,
                total: self.policy.total_cu_limit,
            });
        }
        if self.policy.max_providers_to_pair == 0 {
            return Err(PlanError::InvalidMaxProviders(self.index.clone()));
        }
        if self.annual_discount_percentage > 100 {
            return Err(PlanError::InvalidDiscount(
                self.annual_discount_percentage,
            ));
        }
        if !geo.validate(self.policy.geolocation_profile) {
            return Err(PlanError::InvalidGeolocation(
                self.policy.geolocation_profile,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_plan(index: &str, block: Height, price: Amount) -> Plan {
    Plan {
        index: index.to_string(),
        block,
        price,
        description: format!("{index} plan"),
        allow_overuse: false,
        overuse_rate: 0,
        annual_discount_percentage: 20,
        policy: PlanPolicy {
            geolocation_profile: crate::Geolocation::GL.value(),
            total_cu_limit: 1_000_000,
            epoch_cu_limit: 10_000,
            max_providers_to_pair: 5,
        },
    }
}
