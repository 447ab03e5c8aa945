//! Monthly payout settlement.
//!
//! [`PayoutKeeper::settle_provider`] aggregates usage, resolves every plan and
//! computes every reward before the first transfer, so a consistency failure
//! never leaves a partial payout behind. It pays on every call.
//!
//! [`PayoutKeeper::compute_payout`] together with [`disburse`] is the
//! retry-safe path: the computed [`PayoutPlan`] carries one settlement id per
//! (provider, subscription, chain, anchor height) and the journal makes sure
//! each id is paid at most once.

use crate::aggregator::aggregate_usage;
use crate::dual_staking::ProviderRewards;
use crate::errors::{Result, SettlementError};
use anyhow::anyhow;
use relaymeter_plans::{Plan, PlanCatalog, RewardPolicy};
use relaymeter_storage::{SubscriptionStore, UsageLedger};
use relaymeter_types::{AccountAddress, Amount, ComputeUnits, Height};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Reason tag attached to every subscription reward transfer.
pub const SUBSCRIPTION_MODULE: &str = "subscription";

/// Resolves the plan a subscription was bought under.
pub trait PlanRegistry {
    fn plan_for_subscription(&self, subscription: &str, at_height: Height) -> anyhow::Result<Plan>;
}

/// [`PlanRegistry`] backed by subscription snapshots and a [`PlanCatalog`].
pub struct CatalogPlanRegistry<'a> {
    subscriptions: &'a dyn SubscriptionStore,
    catalog: &'a PlanCatalog,
}

impl<'a> CatalogPlanRegistry<'a> {
    pub fn new(subscriptions: &'a dyn SubscriptionStore, catalog: &'a PlanCatalog) -> Self {
        Self {
            subscriptions,
            catalog,
        }
    }
}

impl PlanRegistry for CatalogPlanRegistry<'_> {
    fn plan_for_subscription(&self, subscription: &str, at_height: Height) -> anyhow::Result<Plan> {
        let snapshot = self
            .subscriptions
            .subscription(subscription)?
            .ok_or_else(|| anyhow!("subscription {subscription} not found"))?;
        Ok(self.catalog.plan_at(&snapshot.plan_index, at_height)?.clone())
    }
}

/// One (subscription, chain) reward owed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutEntry {
    pub subscription: String,
    pub chain: String,
    pub anchor_height: Height,
    pub plan_index: String,
    pub provider_cu: ComputeUnits,
    pub total_cu: ComputeUnits,
    /// Provider + delegators reward out of the plan's pool
    pub total_reward: Amount,
    /// Provider's own part of `total_reward`
    pub provider_share: Amount,
    pub settlement_id: String,
}

/// Everything a provider is owed, in subscription then chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    pub provider: AccountAddress,
    pub entries: Vec<PayoutEntry>,
}

impl PayoutPlan {
    pub fn total_reward(&self) -> Result<Amount> {
        self.entries.iter().try_fold(0u64, |acc, e| {
            acc.checked_add(e.total_reward)
                .ok_or(SettlementError::CalculationOverflow("payout plan total reward"))
        })
    }

    pub fn total_provider_share(&self) -> Result<Amount> {
        self.entries.iter().try_fold(0u64, |acc, e| {
            acc.checked_add(e.provider_share)
                .ok_or(SettlementError::CalculationOverflow("payout plan provider share"))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic idempotency key of one payout entry.
pub fn settlement_id(
    provider: &AccountAddress,
    subscription: &str,
    chain: &str,
    anchor_height: Height,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(provider.as_bytes());
    for part in [subscription, chain] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(&anchor_height.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Records which settlement ids have already been paid.
pub trait SettlementJournal {
    fn is_settled(&self, settlement_id: &str) -> anyhow::Result<bool>;
    fn record(&mut self, settlement_id: &str, amount: Amount) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemorySettlementJournal {
    settled: BTreeMap<String, Amount>,
}

impl InMemorySettlementJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settled.is_empty()
    }

    pub fn amount(&self, settlement_id: &str) -> Option<Amount> {
        self.settled.get(settlement_id).copied()
    }
}

impl SettlementJournal for InMemorySettlementJournal {
    fn is_settled(&self, settlement_id: &str) -> anyhow::Result<bool> {
        Ok(self.settled.contains_key(settlement_id))
    }

    fn record(&mut self, settlement_id: &str, amount: Amount) -> anyhow::Result<()> {
        self.settled.insert(settlement_id.to_string(), amount);
        Ok(())
    }
}

/// Outcome of a [`disburse`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementReport {
    /// Provider share paid by this call
    pub paid: Amount,
    pub settled: usize,
    /// Entries already present in the journal
    pub skipped: usize,
}

/// Pay every entry of `plan` not yet recorded in `journal`.
///
/// An entry is recorded only after its transfer succeeded, so calling again
/// after a failure resumes where the previous call stopped.
///
/// Delivery is at-least-once: if the journal rejects a record after the
/// transfer went through, the error is returned and a later call pays that
/// entry again. Journals that can fail should be reconciled against the
/// account ledger before retrying.
pub fn disburse(
    plan: &PayoutPlan,
    rewards: &mut dyn ProviderRewards,
    journal: &mut dyn SettlementJournal,
) -> Result<DisbursementReport> {
    let mut report = DisbursementReport::default();

    for entry in &plan.entries {
        if journal.is_settled(&entry.settlement_id)? {
            debug!(
                target: "treasury",
                settlement_id = %entry.settlement_id,
                "Payout entry already settled"
            );
            report.skipped += 1;
            continue;
        }

        let share = transfer(rewards, &plan.provider, &entry.chain, entry.total_reward)?;
        if let Err(e) = journal.record(&entry.settlement_id, share) {
            error!(
                target: "treasury",
                settlement_id = %entry.settlement_id,
                provider = %plan.provider,
                chain = %entry.chain,
                share,
                "Transfer applied but not journaled: {e}"
            );
            return Err(e.into());
        }

        report.paid = report
            .paid
            .checked_add(share)
            .ok_or(SettlementError::CalculationOverflow("disbursed amount"))?;
        report.settled += 1;
    }

    info!(
        target: "treasury",
        provider = %plan.provider,
        paid = report.paid,
        settled = report.settled,
        skipped = report.skipped,
        "Payout plan disbursed"
    );
    Ok(report)
}

fn transfer(
    rewards: &mut dyn ProviderRewards,
    provider: &AccountAddress,
    chain: &str,
    total_reward: Amount,
) -> Result<Amount> {
    rewards
        .reward_providers_and_delegators(provider, chain, total_reward, SUBSCRIPTION_MODULE, true)
        .map_err(|source| {
            warn!(
                target: "treasury",
                provider = %provider,
                chain,
                total_reward,
                "Reward transfer failed: {source}"
            );
            SettlementError::Transfer {
                provider: provider.to_string(),
                chain: chain.to_string(),
                source,
            }
        })
}

/// Settlement engine over the usage ledger, subscriptions and plans.
pub struct PayoutKeeper<'a> {
    ledger: &'a dyn UsageLedger,
    subscriptions: &'a dyn SubscriptionStore,
    plans: &'a dyn PlanRegistry,
    policy: &'a dyn RewardPolicy,
}

impl<'a> PayoutKeeper<'a> {
    pub fn new(
        ledger: &'a dyn UsageLedger,
        subscriptions: &'a dyn SubscriptionStore,
        plans: &'a dyn PlanRegistry,
        policy: &'a dyn RewardPolicy,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            plans,
            policy,
        }
    }

    /// Everything `provider` is owed, with provider shares previewed but
    /// nothing transferred.
    pub fn compute_payout(
        &self,
        provider: &AccountAddress,
        rewards: &dyn ProviderRewards,
    ) -> Result<PayoutPlan> {
        let mut entries = self.owed_rewards(provider)?;
        for entry in &mut entries {
            let share = rewards
                .provider_share(provider, &entry.chain, entry.total_reward)
                .map_err(|source| SettlementError::RewardPreview {
                    provider: provider.to_string(),
                    chain: entry.chain.clone(),
                    source,
                })?;
            entry.provider_share = share;
        }
        Ok(PayoutPlan {
            provider: *provider,
            entries,
        })
    }

    /// Compute and immediately pay everything `provider` is owed. Returns the
    /// sum of the provider's own shares. Not idempotent.
    pub fn settle_provider(
        &self,
        provider: &AccountAddress,
        rewards: &mut dyn ProviderRewards,
    ) -> Result<Amount> {
        let owed = self.owed_rewards(provider)?;

        let mut total: Amount = 0;
        for entry in &owed {
            let share = transfer(rewards, provider, &entry.chain, entry.total_reward)?;
            total = total
                .checked_add(share)
                .ok_or(SettlementError::CalculationOverflow("monthly payout"))?;
        }

        info!(
            target: "treasury",
            provider = %provider,
            entries = owed.len(),
            amount = total,
            "Monthly payout settled"
        );
        Ok(total)
    }

    /// Same as [`disburse`], for a plan computed by this keeper.
    pub fn disburse(
        &self,
        plan: &PayoutPlan,
        rewards: &mut dyn ProviderRewards,
        journal: &mut dyn SettlementJournal,
    ) -> Result<DisbursementReport> {
        disburse(plan, rewards, journal)
    }

    /// Per-(subscription, chain) rewards, provider shares left at zero.
    fn owed_rewards(&self, provider: &AccountAddress) -> Result<Vec<PayoutEntry>> {
        let target = provider.to_string();
        let aggregate = aggregate_usage(self.ledger, self.subscriptions, &target)?;

        let mut entries = Vec::new();
        for (subscription, usage) in aggregate.iter().filter(|(_, usage)| usage.relevant) {
            let plan = self
                .plans
                .plan_for_subscription(subscription, usage.anchor_height)
                .map_err(|source| SettlementError::PlanNotFound {
                    subscription: subscription.clone(),
                    height: usage.anchor_height,
                    source,
                })?;

            for (chain, provider_cu) in &usage.provider_chain_cu {
                let total_reward =
                    self.policy
                        .total_monthly_reward(&plan, *provider_cu, usage.total_cu);
                debug!(
                    target: "treasury",
                    sub = %subscription,
                    chain_id = %chain,
                    provider_cu,
                    total_cu = usage.total_cu,
                    total_reward,
                    "Computed monthly reward"
                );
                entries.push(PayoutEntry {
                    subscription: subscription.clone(),
                    chain: chain.clone(),
                    anchor_height: usage.anchor_height,
                    plan_index: plan.index.clone(),
                    provider_cu: *provider_cu,
                    total_cu: usage.total_cu,
                    total_reward,
                    provider_share: 0,
                    settlement_id: settlement_id(
                        provider,
                        subscription,
                        chain,
                        usage.anchor_height,
                    ),
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_ledger::{AccountLedger, InMemoryAccountLedger, MockAccountLedger};
    use crate::dual_staking::DualStakingRewards;
    use relaymeter_plans::{GeoCatalog, Geolocation, PlanPolicy, ProportionalReward};
    use relaymeter_storage::{MemoryStorage, SubscriptionSnapshot};

    fn account(n: u8) -> AccountAddress {
        AccountAddress([n; 32])
    }

    fn plan(price: Amount) -> Plan {
        Plan {
            index: "basic".to_string(),
            block: 1,
            price,
            description: String::new(),
            allow_overuse: false,
            overuse_rate: 0,
            annual_discount_percentage: 0,
            policy: PlanPolicy {
                geolocation_profile: Geolocation::GL.value(),
                total_cu_limit: 1_000_000,
                epoch_cu_limit: 1_000,
                max_providers_to_pair: 3,
            },
        }
    }

    fn fixture() -> (MemoryStorage, PlanCatalog) {
        let store = MemoryStorage::new();
        store
            .put_subscription(SubscriptionSnapshot {
                id: "sub1".to_string(),
                anchor_height: 10,
                plan_index: "basic".to_string(),
            })
            .unwrap();
        let a = account(1).to_string();
        let b = account(2).to_string();
        store.add_tracked_usage("sub1", &a, "ETH1", 100, 10).unwrap();
        store.add_tracked_usage("sub1", &b, "ETH1", 50, 10).unwrap();
        store.add_tracked_usage("sub1", &a, "LAV1", 50, 10).unwrap();

        let mut catalog = PlanCatalog::new();
        catalog.add_plan(plan(2_000), &GeoCatalog::standard()).unwrap();
        (store, catalog)
    }

    #[test]
    fn test_settlement_id_deterministic() {
        let id = settlement_id(&account(1), "sub1", "ETH1", 10);
        assert_eq!(id, settlement_id(&account(1), "sub1", "ETH1", 10));
        assert_eq!(id.len(), 64);
        assert_ne!(id, settlement_id(&account(1), "sub1", "ETH1", 11));
        assert_ne!(id, settlement_id(&account(2), "sub1", "ETH1", 10));
        // component boundaries are not ambiguous
        assert_ne!(
            settlement_id(&account(1), "sub1E", "TH1", 10),
            settlement_id(&account(1), "sub1", "ETH1", 10)
        );
    }

    #[test]
    fn test_compute_payout_entries() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let rewards = DualStakingRewards::new(InMemoryAccountLedger::new());

        let plan = keeper.compute_payout(&account(1), &rewards).unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].chain, "ETH1");
        assert_eq!(plan.entries[0].total_cu, 200);
        assert_eq!(plan.entries[0].total_reward, 1_000);
        assert_eq!(plan.entries[1].chain, "LAV1");
        assert_eq!(plan.entries[1].total_reward, 500);
        assert_eq!(plan.total_reward().unwrap(), 1_500);
        assert_eq!(plan.total_provider_share().unwrap(), 1_500);
        assert_eq!(rewards.ledger().total_credited().unwrap(), 0);
    }

    #[test]
    fn test_settle_provider_pays() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

        let paid = keeper.settle_provider(&account(2), &mut rewards).unwrap();
        assert_eq!(paid, 500);
        assert_eq!(rewards.ledger().balance(&account(2)).unwrap(), 500);
        assert_eq!(
            rewards.ledger().get_credit_calls()[0].2,
            SUBSCRIPTION_MODULE
        );
    }

    #[test]
    fn test_missing_plan_is_fatal() {
        let (store, _) = fixture();
        let empty = PlanCatalog::new();
        let registry = CatalogPlanRegistry::new(&store, &empty);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

        let err = keeper.settle_provider(&account(1), &mut rewards).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::PlanNotFound { ref subscription, height: 10, .. } if subscription == "sub1"
        ));
        assert!(rewards.ledger().get_credit_calls().is_empty());
    }

    #[test]
    fn test_disburse_skips_settled_entries() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut rewards = DualStakingRewards::new(InMemoryAccountLedger::new());
        let mut journal = InMemorySettlementJournal::new();

        let plan = keeper.compute_payout(&account(1), &rewards).unwrap();
        let first = keeper.disburse(&plan, &mut rewards, &mut journal).unwrap();
        assert_eq!(first.paid, 1_500);
        assert_eq!(first.settled, 2);
        assert_eq!(journal.len(), 2);

        let second = disburse(&plan, &mut rewards, &mut journal).unwrap();
        assert_eq!(second.paid, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(rewards.ledger().balance(&account(1)).unwrap(), 1_500);
    }

    #[test]
    fn test_preview_failure_is_not_a_transfer() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut rewards = DualStakingRewards::new(MockAccountLedger::new());
        rewards.stake_provider(account(1), "ETH1", u64::MAX, 0).unwrap();
        rewards.delegate(account(9), &account(1), "ETH1", 1).unwrap();

        let err = keeper.compute_payout(&account(1), &rewards).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::RewardPreview { ref chain, .. } if chain == "ETH1"
        ));
        assert!(err.to_string().starts_with("cannot preview reward split"));
        assert!(rewards.ledger().get_credit_calls().is_empty());
    }

    struct RejectingJournal;

    impl SettlementJournal for RejectingJournal {
        fn is_settled(&self, _settlement_id: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn record(&mut self, _settlement_id: &str, _amount: Amount) -> anyhow::Result<()> {
            Err(anyhow!("journal is read-only"))
        }
    }

    #[test]
    fn test_unjournaled_transfer_is_reported() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

        let plan = keeper.compute_payout(&account(1), &rewards).unwrap();
        let err = disburse(&plan, &mut rewards, &mut RejectingJournal).unwrap_err();
        assert!(matches!(err, SettlementError::Storage(_)));
        // the first entry's transfer already went through
        assert_eq!(rewards.ledger().get_credit_calls().len(), 1);
        assert_eq!(rewards.ledger().balance(&account(1)).unwrap(), 1_000);
    }

    #[test]
    fn test_disburse_resumes_after_failure() {
        let (store, catalog) = fixture();
        let registry = CatalogPlanRegistry::new(&store, &catalog);
        let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
        let mut failing = DualStakingRewards::new(MockAccountLedger::failing_after(1));
        let mut journal = InMemorySettlementJournal::new();

        let plan = keeper.compute_payout(&account(1), &failing).unwrap();
        let err = disburse(&plan, &mut failing, &mut journal).unwrap_err();
        assert!(matches!(err, SettlementError::Transfer { .. }));
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.amount(&plan.entries[0].settlement_id), Some(1_000));

        let mut healthy = DualStakingRewards::new(InMemoryAccountLedger::new());
        let report = disburse(&plan, &mut healthy, &mut journal).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.paid, 500);
    }
}
