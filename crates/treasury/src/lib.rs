//! Relaymeter Treasury Module
//!
//! Aggregates tracked usage per subscription, turns a provider's share of
//! each subscription's compute units into a monthly reward, and pays it out
//! through the provider/delegator split.

pub mod account_ledger;
pub mod aggregator;
pub mod dual_staking;
pub mod errors;
pub mod payout;
pub mod query;

pub use account_ledger::{AccountLedger, InMemoryAccountLedger, MockAccountLedger};
pub use aggregator::{aggregate_usage, SubscriptionUsage, SubscriptionUsageBuilder, UsageAggregate};
pub use dual_staking::{DualStakingRewards, ProviderRewards, RewardSplit, StakeEntry, StakeError};
pub use errors::SettlementError;
pub use payout::{
    disburse, CatalogPlanRegistry, DisbursementReport, InMemorySettlementJournal, PayoutEntry,
    PayoutKeeper, PayoutPlan, PlanRegistry, SettlementJournal, settlement_id, SUBSCRIPTION_MODULE,
};
pub use query::{MonthlyPayoutRequest, MonthlyPayoutResponse};
