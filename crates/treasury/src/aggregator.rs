//! Usage aggregation.
//!
//! Folds every tracked-usage record into one [`SubscriptionUsage`] per
//! subscription: the CU served by all providers together, and the per-chain
//! CU served by the one provider being settled. Addition commutes, so the
//! result does not depend on the order keys are enumerated in.

use crate::errors::{Result, SettlementError};
use relaymeter_storage::{SubscriptionStore, UsageLedger};
use relaymeter_types::{ChainId, ComputeUnits, Height};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Aggregated usage of one subscription, from the target provider's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUsage {
    /// CU served by every provider on every chain
    pub total_cu: ComputeUnits,
    /// Whether the target provider served any CU
    pub relevant: bool,
    pub anchor_height: Height,
    /// CU served by the target provider, per chain
    pub provider_chain_cu: BTreeMap<ChainId, ComputeUnits>,
}

impl SubscriptionUsage {
    /// CU served by the target provider across all chains.
    pub fn provider_cu(&self) -> ComputeUnits {
        self.provider_chain_cu
            .values()
            .fold(0, |acc, cu| acc.saturating_add(*cu))
    }
}

/// Subscription ID → aggregated usage, ascending by ID.
pub type UsageAggregate = BTreeMap<String, SubscriptionUsage>;

/// Accumulates records of one subscription; frozen by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SubscriptionUsageBuilder {
    anchor_height: Height,
    total_cu: ComputeUnits,
    provider_chain_cu: BTreeMap<ChainId, ComputeUnits>,
}

impl SubscriptionUsageBuilder {
    pub fn new(anchor_height: Height) -> Self {
        Self {
            anchor_height,
            total_cu: 0,
            provider_chain_cu: BTreeMap::new(),
        }
    }

    /// Fold one record in. `from_target` marks CU served by the provider
    /// being settled.
    pub fn add(&mut self, chain: &str, cu: ComputeUnits, from_target: bool) -> Result<()> {
        self.total_cu = self
            .total_cu
            .checked_add(cu)
            .ok_or(SettlementError::CalculationOverflow("subscription total CU"))?;

        if from_target && cu > 0 {
            self.provider_chain_cu.insert(chain.to_string(), cu);
        }
        Ok(())
    }

    pub fn build(self) -> SubscriptionUsage {
        SubscriptionUsage {
            total_cu: self.total_cu,
            relevant: !self.provider_chain_cu.is_empty(),
            anchor_height: self.anchor_height,
            provider_chain_cu: self.provider_chain_cu,
        }
    }
}

/// Scan every tracked-usage key once and aggregate per subscription.
///
/// A key whose subscription no longer exists aborts the scan; a record
/// missing at the subscription's anchor height is skipped.
pub fn aggregate_usage(
    ledger: &dyn UsageLedger,
    subscriptions: &dyn SubscriptionStore,
    target_provider: &str,
) -> Result<UsageAggregate> {
    let keys = ledger.tracked_usage_keys(None)?;
    let mut anchors: BTreeMap<String, Height> = BTreeMap::new();
    let mut builders: BTreeMap<String, SubscriptionUsageBuilder> = BTreeMap::new();

    for key in &keys {
        let id = key.decode()?;

        let anchor_height = match anchors.get(&id.subscription) {
            Some(height) => *height,
            None => {
                let Some(sub) = subscriptions.subscription(&id.subscription)? else {
                    error!(
                        target: "treasury",
                        sub = %id.subscription,
                        provider = %id.provider,
                        chain_id = %id.chain,
                        "cannot get tracked CU: subscription not found"
                    );
                    return Err(SettlementError::SubscriptionNotFound {
                        subscription: id.subscription,
                        provider: id.provider,
                        chain: id.chain,
                    });
                };
                anchors.insert(id.subscription.clone(), sub.anchor_height);
                sub.anchor_height
            }
        };

        let Some(usage) =
            ledger.tracked_usage(&id.subscription, &id.provider, &id.chain, anchor_height)?
        else {
            debug!(
                target: "treasury",
                key = %key,
                anchor_height,
                "No tracked usage at subscription anchor, skipping"
            );
            continue;
        };

        builders
            .entry(id.subscription.clone())
            .or_insert_with(|| SubscriptionUsageBuilder::new(anchor_height))
            .add(&id.chain, usage.cu, id.provider == target_provider)?;
    }

    debug!(
        target: "treasury",
        provider = target_provider,
        keys = keys.len(),
        subscriptions = builders.len(),
        "Aggregated tracked usage"
    );

    Ok(builders
        .into_iter()
        .map(|(sub, builder)| (sub, builder.build()))
        .collect())
}
