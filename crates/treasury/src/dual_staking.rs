//! Provider / delegator reward split.
//!
//! A provider stakes per chain and may accept delegations. A reward earned on
//! a chain is split pro rata between the provider's own stake and the
//! delegated stake; the provider additionally keeps a commission on the
//! delegators' part. All math is integer and truncating, and rounding dust
//! always stays with the provider, so the shares sum to the reward exactly.

use crate::account_ledger::AccountLedger;
use anyhow::Result;
use relaymeter_types::{apply_bps, mul_div_u64, AccountAddress, Amount, ChainId, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Rewards collaborator used by settlement.
pub trait ProviderRewards {
    /// Provider's own share of `total_reward`, without transferring anything.
    fn provider_share(
        &self,
        provider: &AccountAddress,
        chain: &str,
        total_reward: Amount,
    ) -> Result<Amount>;

    /// Split `total_reward` between the provider and its delegators and
    /// transfer every share. Returns the provider's share when
    /// `provider_share_only`, otherwise the total distributed.
    fn reward_providers_and_delegators(
        &mut self,
        provider: &AccountAddress,
        chain: &str,
        total_reward: Amount,
        reason: &str,
        provider_share_only: bool,
    ) -> Result<Amount>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StakeError {
    #[error("commission {0} bps exceeds 10000 bps")]
    InvalidCommission(u64),

    #[error("provider {provider} is not staked on chain {chain}")]
    ProviderNotStaked { provider: String, chain: String },

    #[error("delegation amount must be non-zero")]
    ZeroDelegation,

    #[error("arithmetic overflow in stake accounting")]
    Overflow,
}

/// A provider's stake on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEntry {
    pub self_stake: u64,
    /// Commission kept from the delegators' part, in basis points
    pub commission_bps: u64,
    pub delegations: BTreeMap<AccountAddress, u64>,
}

/// Outcome of splitting one reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub provider: Amount,
    pub delegators: Vec<(AccountAddress, Amount)>,
}

impl RewardSplit {
    pub fn total(&self) -> Amount {
        self.delegators
            .iter()
            .fold(self.provider, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

impl StakeEntry {
    pub fn delegated(&self) -> Result<u64, StakeError> {
        self.delegations
            .values()
            .try_fold(0u64, |acc, stake| acc.checked_add(*stake))
            .ok_or(StakeError::Overflow)
    }

    pub fn split(&self, total_reward: Amount) -> Result<RewardSplit, StakeError> {
        if self.commission_bps > BPS_DENOMINATOR {
            return Err(StakeError::InvalidCommission(self.commission_bps));
        }
        let delegated = self.delegated()?;
        let stake = self
            .self_stake
            .checked_add(delegated)
            .ok_or(StakeError::Overflow)?;

        if stake == 0 || delegated == 0 {
            return Ok(RewardSplit {
                provider: total_reward,
                delegators: Vec::new(),
            });
        }

        let delegators_pool = mul_div_u64(total_reward, delegated, stake).ok_or(StakeError::Overflow)?;
        let commission = apply_bps(delegators_pool, self.commission_bps).ok_or(StakeError::Overflow)?;
        let distributable = delegators_pool
            .checked_sub(commission)
            .ok_or(StakeError::Overflow)?;

        let mut delegators = Vec::with_capacity(self.delegations.len());
        let mut paid: Amount = 0;
        for (delegator, amount) in &self.delegations {
            let share = mul_div_u64(distributable, *amount, delegated).ok_or(StakeError::Overflow)?;
            paid = paid.checked_add(share).ok_or(StakeError::Overflow)?;
            delegators.push((*delegator, share));
        }

        Ok(RewardSplit {
            provider: total_reward.checked_sub(paid).ok_or(StakeError::Overflow)?,
            delegators,
        })
    }
}

/// Stake registry that pays rewards into an [`AccountLedger`].
#[derive(Debug, Default)]
pub struct DualStakingRewards<L: AccountLedger> {
    stakes: BTreeMap<(AccountAddress, ChainId), StakeEntry>,
    ledger: L,
}

impl<L: AccountLedger> DualStakingRewards<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            stakes: BTreeMap::new(),
            ledger,
        }
    }

    /// Register (or re-stake) a provider on a chain, keeping existing delegations.
    pub fn stake_provider(
        &mut self,
        provider: AccountAddress,
        chain: &str,
        self_stake: u64,
        commission_bps: u64,
    ) -> Result<(), StakeError> {
        if commission_bps > BPS_DENOMINATOR {
            return Err(StakeError::InvalidCommission(commission_bps));
        }
        let entry = self.stakes.entry((provider, chain.to_string())).or_default();
        entry.self_stake = self_stake;
        entry.commission_bps = commission_bps;
        info!(
            target: "treasury",
            provider = %provider,
            chain,
            self_stake,
            commission_bps,
            "Provider staked"
        );
        Ok(())
    }

    /// Delegate `amount` to a staked provider.
    pub fn delegate(
        &mut self,
        delegator: AccountAddress,
        provider: &AccountAddress,
        chain: &str,
        amount: u64,
    ) -> Result<(), StakeError> {
        if amount == 0 {
            return Err(StakeError::ZeroDelegation);
        }
        let entry = self
            .stakes
            .get_mut(&(*provider, chain.to_string()))
            .ok_or_else(|| StakeError::ProviderNotStaked {
                provider: provider.to_string(),
                chain: chain.to_string(),
            })?;
        let current = entry.delegations.entry(delegator).or_insert(0);
        *current = current.checked_add(amount).ok_or(StakeError::Overflow)?;
        debug!(target: "treasury", delegator = %delegator, provider = %provider, chain, amount, "Delegated");
        Ok(())
    }

    pub fn stake(&self, provider: &AccountAddress, chain: &str) -> Option<&StakeEntry> {
        self.stakes.get(&(*provider, chain.to_string()))
    }

    /// Split for a provider; an unstaked provider keeps the whole reward.
    pub fn split_for(
        &self,
        provider: &AccountAddress,
        chain: &str,
        total_reward: Amount,
    ) -> Result<RewardSplit, StakeError> {
        match self.stake(provider, chain) {
            Some(entry) => entry.split(total_reward),
            None => Ok(RewardSplit {
                provider: total_reward,
                delegators: Vec::new(),
            }),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }
}

impl<L: AccountLedger> ProviderRewards for DualStakingRewards<L> {
    fn provider_share(
        &self,
        provider: &AccountAddress,
        chain: &str,
        total_reward: Amount,
    ) -> Result<Amount> {
        Ok(self.split_for(provider, chain, total_reward)?.provider)
    }

    fn reward_providers_and_delegators(
        &mut self,
        provider: &AccountAddress,
        chain: &str,
        total_reward: Amount,
        reason: &str,
        provider_share_only: bool,
    ) -> Result<Amount> {
        let split = self.split_for(provider, chain, total_reward)?;

        let credits: Vec<(AccountAddress, Amount)> = std::iter::once((*provider, split.provider))
            .chain(split.delegators.iter().copied())
            .filter(|(_, amount)| *amount > 0)
            .collect();
        if !credits.is_empty() {
            self.ledger.credit_batch(&credits, reason)?;
        }

        debug!(
            target: "treasury",
            provider = %provider,
            chain,
            total_reward,
            provider_share = split.provider,
            delegators = split.delegators.len(),
            "Reward split paid"
        );

        Ok(if provider_share_only {
            split.provider
        } else {
            split.total()
        })
    }
}
