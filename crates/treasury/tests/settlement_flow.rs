//! End-to-end settlement tests: tracked usage in storage, plans in a
//! catalog, rewards paid through the provider/delegator split.

use relaymeter_plans::{
    GeoCatalog, Geolocation, Plan, PlanCatalog, PlanPolicy, ProportionalReward, RewardPolicy,
};
use relaymeter_storage::{MemoryStorage, SledStorage, SubscriptionSnapshot, SubscriptionStore, UsageLedger};
use relaymeter_treasury::{
    AccountLedger, CatalogPlanRegistry, DualStakingRewards, InMemoryAccountLedger,
    InMemorySettlementJournal, MockAccountLedger, MonthlyPayoutRequest, PayoutKeeper,
    PlanRegistry, ProviderRewards, SettlementError, SUBSCRIPTION_MODULE,
};
use relaymeter_types::{AccountAddress, Height};
use std::cell::Cell;
use tempfile::TempDir;

const CHAIN: &str = "ETH1";
const ANCHOR: Height = 100;

fn provider_a() -> AccountAddress {
    AccountAddress([0xa1; 32])
}

fn provider_b() -> AccountAddress {
    AccountAddress([0xb2; 32])
}

fn idle_provider() -> AccountAddress {
    AccountAddress([0xc3; 32])
}

fn basic_plan(price: u64) -> Plan {
    Plan {
        index: "basic".to_string(),
        block: 1,
        price,
        description: "basic monthly plan".to_string(),
        allow_overuse: false,
        overuse_rate: 0,
        annual_discount_percentage: 10,
        policy: PlanPolicy {
            geolocation_profile: Geolocation::GL.value(),
            total_cu_limit: 10_000,
            epoch_cu_limit: 500,
            max_providers_to_pair: 5,
        },
    }
}

fn catalog() -> PlanCatalog {
    let mut catalog = PlanCatalog::new();
    catalog
        .add_plan(basic_plan(3_000), &GeoCatalog::standard())
        .unwrap();
    catalog
}

/// A served 100 CU and B served 50 CU on one chain for one subscription.
fn populate<S: UsageLedger + SubscriptionStore>(store: &S) {
    store
        .put_subscription(SubscriptionSnapshot {
            id: "sub1".to_string(),
            anchor_height: ANCHOR,
            plan_index: "basic".to_string(),
        })
        .unwrap();
    store
        .add_tracked_usage("sub1", &provider_a().to_string(), CHAIN, 100, ANCHOR)
        .unwrap();
    store
        .add_tracked_usage("sub1", &provider_b().to_string(), CHAIN, 50, ANCHOR)
        .unwrap();
}

/// Counts lookups, delegating to a catalog.
struct CountingRegistry<'a> {
    inner: CatalogPlanRegistry<'a>,
    lookups: Cell<usize>,
}

impl PlanRegistry for CountingRegistry<'_> {
    fn plan_for_subscription(&self, subscription: &str, at_height: Height) -> anyhow::Result<Plan> {
        self.lookups.set(self.lookups.get() + 1);
        self.inner.plan_for_subscription(subscription, at_height)
    }
}

#[test]
fn test_proportional_payout_end_to_end() {
    let store = MemoryStorage::new();
    populate(&store);
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);

    let mut rewards = DualStakingRewards::new(InMemoryAccountLedger::new());
    rewards.stake_provider(provider_a(), CHAIN, 100, 1_000).unwrap();
    let delegator = AccountAddress([0xd4; 32]);
    rewards.delegate(delegator, &provider_a(), CHAIN, 100).unwrap();

    let expected_total = ProportionalReward.total_monthly_reward(&basic_plan(3_000), 100, 150);
    assert_eq!(expected_total, 2_000);
    let expected_share = rewards.provider_share(&provider_a(), CHAIN, expected_total).unwrap();

    let request = MonthlyPayoutRequest {
        provider: provider_a().to_string(),
    };
    let response = keeper.monthly_payout(Some(&request), &mut rewards).unwrap();

    // delegators' pool 1000, commission 100 → delegator 900, provider 1100
    assert_eq!(response.amount, expected_share);
    assert_eq!(response.amount, 1_100);
    assert_eq!(rewards.ledger().balance(&provider_a()).unwrap(), 1_100);
    assert_eq!(rewards.ledger().balance(&delegator).unwrap(), 900);
    assert_eq!(rewards.ledger().balance(&provider_b()).unwrap(), 0);
}

#[test]
fn test_idle_provider_gets_nothing_without_plan_lookup() {
    let store = MemoryStorage::new();
    populate(&store);
    let catalog = catalog();
    let registry = CountingRegistry {
        inner: CatalogPlanRegistry::new(&store, &catalog),
        lookups: Cell::new(0),
    };
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

    let paid = keeper.settle_provider(&idle_provider(), &mut rewards).unwrap();
    assert_eq!(paid, 0);
    assert_eq!(registry.lookups.get(), 0);
    assert!(rewards.ledger().get_credit_calls().is_empty());

    // not-found is distinct from a zero record
    assert_eq!(
        store
            .tracked_usage("sub1", &idle_provider().to_string(), CHAIN, ANCHOR)
            .unwrap(),
        None
    );

    keeper.settle_provider(&provider_b(), &mut rewards).unwrap();
    assert_eq!(registry.lookups.get(), 1);
}

#[test]
fn test_missing_subscription_aborts_without_transfer() {
    let store = MemoryStorage::new();
    populate(&store);
    store
        .add_tracked_usage("orphan", &provider_a().to_string(), CHAIN, 10, ANCHOR)
        .unwrap();
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

    let err = keeper.settle_provider(&provider_a(), &mut rewards).unwrap_err();
    assert!(matches!(
        err,
        SettlementError::SubscriptionNotFound { ref subscription, .. } if subscription == "orphan"
    ));
    assert!(rewards.ledger().get_credit_calls().is_empty());
}

#[test]
fn test_transfer_failure_propagates() {
    let store = MemoryStorage::new();
    populate(&store);
    store
        .add_tracked_usage("sub1", &provider_a().to_string(), "LAV1", 30, ANCHOR)
        .unwrap();
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(MockAccountLedger::failing_after(1));

    let err = keeper.settle_provider(&provider_a(), &mut rewards).unwrap_err();
    match err {
        SettlementError::Transfer { chain, .. } => assert_eq!(chain, "LAV1"),
        other => panic!("unexpected error: {other}"),
    }
    // the first transfer is not rolled back
    assert_eq!(rewards.ledger().get_credit_calls().len(), 1);
}

#[test]
fn test_settle_twice_pays_twice() {
    let store = MemoryStorage::new();
    populate(&store);
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(MockAccountLedger::new());

    let first = keeper.settle_provider(&provider_b(), &mut rewards).unwrap();
    let second = keeper.settle_provider(&provider_b(), &mut rewards).unwrap();
    assert_eq!(first, 1_000);
    assert_eq!(second, 1_000);
    assert_eq!(rewards.ledger().balance(&provider_b()).unwrap(), 2_000);
    assert!(rewards
        .ledger()
        .get_credit_calls()
        .iter()
        .all(|(_, _, reason)| reason == SUBSCRIPTION_MODULE));
}

#[test]
fn test_disburse_is_idempotent() {
    let store = MemoryStorage::new();
    populate(&store);
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(InMemoryAccountLedger::new());
    let mut journal = InMemorySettlementJournal::new();

    let plan = keeper.compute_payout(&provider_a(), &rewards).unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].provider_share, 2_000);

    for _ in 0..3 {
        keeper.disburse(&plan, &mut rewards, &mut journal).unwrap();
    }
    assert_eq!(rewards.ledger().balance(&provider_a()).unwrap(), 2_000);
    assert_eq!(journal.len(), 1);

    // recomputing yields the same settlement ids
    let recomputed = keeper.compute_payout(&provider_a(), &rewards).unwrap();
    assert_eq!(recomputed.entries[0].settlement_id, plan.entries[0].settlement_id);
}

#[test]
fn test_sled_backed_settlement() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStorage::new(temp_dir.path()).unwrap();
    populate(&store);
    let catalog = catalog();
    let registry = CatalogPlanRegistry::new(&store, &catalog);
    let keeper = PayoutKeeper::new(&store, &store, &registry, &ProportionalReward);
    let mut rewards = DualStakingRewards::new(InMemoryAccountLedger::new());

    assert_eq!(keeper.settle_provider(&provider_a(), &mut rewards).unwrap(), 2_000);
    assert_eq!(keeper.settle_provider(&provider_b(), &mut rewards).unwrap(), 1_000);
    assert_eq!(rewards.ledger().total_credited().unwrap(), 3_000);
}
