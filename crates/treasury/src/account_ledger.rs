//! Account ledger interface for reward payouts
//!
//! The settlement core only ever credits accounts; minting and the actual
//! token bookkeeping belong to the surrounding chain. Every credit carries the
//! reason tag of the module that requested it.

use anyhow::{anyhow, Result};
use relaymeter_types::{AccountAddress, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interface for account ledger operations.
pub trait AccountLedger: Send + Sync {
    /// Credit an account, tagging the transfer with `reason`.
    fn credit(&mut self, account: &AccountAddress, amount: Amount, reason: &str) -> Result<()>;

    /// Apply every credit or none of them.
    fn credit_batch(&mut self, credits: &[(AccountAddress, Amount)], reason: &str) -> Result<()>;

    /// Retrieve an account's balance.
    fn balance(&self, account: &AccountAddress) -> Result<Amount>;

    /// Sum of every credit ever applied.
    fn total_credited(&self) -> Result<Amount>;

    /// Retrieve all balances (snapshot).
    fn get_all_balances(&self) -> Result<BTreeMap<AccountAddress, Amount>>;
}

// -----------------------------------------------------------------------------
// In-memory implementation (for tooling or testing)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryAccountLedger {
    balances: BTreeMap<AccountAddress, Amount>,
    total_credited: Amount,
}

impl InMemoryAccountLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountLedger for InMemoryAccountLedger {
    fn credit(&mut self, account: &AccountAddress, amount: Amount, _reason: &str) -> Result<()> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance overflow for {account}"))?;
        self.total_credited = self.total_credited.saturating_add(amount);
        Ok(())
    }

    fn credit_batch(&mut self, credits: &[(AccountAddress, Amount)], _reason: &str) -> Result<()> {
        let mut staged: BTreeMap<AccountAddress, Amount> = BTreeMap::new();
        let mut added: Amount = 0;
        for (account, amount) in credits {
            let current = match staged.get(account) {
                Some(balance) => *balance,
                None => self.balances.get(account).copied().unwrap_or(0),
            };
            let updated = current
                .checked_add(*amount)
                .ok_or_else(|| anyhow!("balance overflow for {account}"))?;
            staged.insert(*account, updated);
            added = added.saturating_add(*amount);
        }

        self.balances.extend(staged);
        self.total_credited = self.total_credited.saturating_add(added);
        Ok(())
    }

    fn balance(&self, account: &AccountAddress) -> Result<Amount> {
        Ok(self.balances.get(account).copied().unwrap_or(0))
    }

    fn total_credited(&self) -> Result<Amount> {
        Ok(self.total_credited)
    }

    fn get_all_balances(&self) -> Result<BTreeMap<AccountAddress, Amount>> {
        Ok(self.balances.clone())
    }
}

// -----------------------------------------------------------------------------
// Mock ledger (records calls, can be told to fail)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct MockAccountLedger {
    inner: InMemoryAccountLedger,
    credit_calls: Vec<(AccountAddress, Amount, String)>,
    /// Fail every credit once this many have succeeded
    fail_after: Option<usize>,
}

impl MockAccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(successful_credits: usize) -> Self {
        Self {
            fail_after: Some(successful_credits),
            ..Self::default()
        }
    }

    pub fn get_credit_calls(&self) -> &[(AccountAddress, Amount, String)] {
        &self.credit_calls
    }

    pub fn clear_calls(&mut self) {
        self.credit_calls.clear();
    }
}

impl AccountLedger for MockAccountLedger {
    fn credit(&mut self, account: &AccountAddress, amount: Amount, reason: &str) -> Result<()> {
        if self
            .fail_after
            .is_some_and(|limit| self.credit_calls.len() >= limit)
        {
            return Err(anyhow!("ledger unavailable"));
        }
        self.inner.credit(account, amount, reason)?;
        self.credit_calls.push((*account, amount, reason.to_string()));
        Ok(())
    }

    fn credit_batch(&mut self, credits: &[(AccountAddress, Amount)], reason: &str) -> Result<()> {
        if self
            .fail_after
            .is_some_and(|limit| self.credit_calls.len() + credits.len() > limit)
        {
            return Err(anyhow!("ledger unavailable"));
        }
        self.inner.credit_batch(credits, reason)?;
        self.credit_calls.extend(
            credits
                .iter()
                .map(|(account, amount)| (*account, *amount, reason.to_string())),
        );
        Ok(())
    }

    fn balance(&self, account: &AccountAddress) -> Result<Amount> {
        self.inner.balance(account)
    }

    fn total_credited(&self) -> Result<Amount> {
        self.inner.total_credited()
    }

    fn get_all_balances(&self) -> Result<BTreeMap<AccountAddress, Amount>> {
        self.inner.get_all_balances()
    }
}
