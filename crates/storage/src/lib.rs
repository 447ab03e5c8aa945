//! Relaymeter storage
//!
//! Persistent tracked-usage accumulators and subscription snapshots, behind
//! the [`UsageLedger`] and [`SubscriptionStore`] traits, with a sled-backed
//! implementation and an in-memory backend for tests and tooling.

use anyhow::Result;
use parking_lot::RwLock;
use relaymeter_types::{ComputeUnits, Height};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub mod keys;

pub use keys::*;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// CU served under one key for one subscription instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedUsage {
    pub cu: ComputeUnits,
    /// Height at which the owning subscription was instantiated
    pub anchor_height: Height,
}

/// Identity and anchor of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    /// Subscription identifier (the consumer's address)
    pub id: String,
    /// Height at which the subscription was instantiated
    pub anchor_height: Height,
    /// Plan the subscription was bought for
    pub plan_index: String,
}

/// Per-key record versions: anchor height → accumulated CU.
type UsageVersions = BTreeMap<Height, ComputeUnits>;

/// Tracked-usage accumulators keyed by (subscription, provider, chain).
pub trait UsageLedger {
    /// Enumerate keys in ascending byte order. `None` or an empty filter
    /// returns every key; otherwise only keys of that subscription.
    fn tracked_usage_keys(&self, subscription: Option<&str>) -> Result<Vec<TrackedUsageKey>>;

    /// Record stored for `anchor_height` exactly, if any.
    fn tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        anchor_height: Height,
    ) -> Result<Option<TrackedUsage>>;

    /// Monotonically add `cu` to the record for `anchor_height` (saturating),
    /// creating it on first use. Returns the updated record.
    fn add_tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        cu: ComputeUnits,
        anchor_height: Height,
    ) -> Result<TrackedUsage>;

    /// Drop every record of a subscription. Returns how many keys were removed.
    fn remove_tracked_usage(&self, subscription: &str) -> Result<usize>;
}

/// Read/write access to subscription snapshots.
pub trait SubscriptionStore {
    fn subscription(&self, id: &str) -> Result<Option<SubscriptionSnapshot>>;
    fn put_subscription(&self, subscription: SubscriptionSnapshot) -> Result<()>;
    fn remove_subscription(&self, id: &str) -> Result<bool>;
    fn list_subscriptions(&self) -> Result<Vec<SubscriptionSnapshot>>;
}

fn filter_prefix(subscription: Option<&str>) -> Option<String> {
    subscription
        .filter(|sub| !sub.is_empty())
        .map(TrackedUsageKey::subscription_prefix)
}

/// Sled-backed implementation
pub struct SledStorage {
    db: Db,
    tracked_usage: Tree,
    subscriptions: Tree,
}

impl SledStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let tracked_usage = db.open_tree("tracked_usage")?;
        let subscriptions = db.open_tree("subscriptions")?;

        Ok(Self {
            db,
            tracked_usage,
            subscriptions,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn versions(&self, key: &TrackedUsageKey) -> Result<Option<UsageVersions>> {
        self.tracked_usage
            .get(key.as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }
}

impl UsageLedger for SledStorage {
    fn tracked_usage_keys(&self, subscription: Option<&str>) -> Result<Vec<TrackedUsageKey>> {
        let iter = match filter_prefix(subscription) {
            Some(prefix) => self.tracked_usage.scan_prefix(prefix.as_bytes()),
            None => self.tracked_usage.iter(),
        };

        iter.map(|r| {
            let (k, _) = r?;
            Ok(TrackedUsageKey::from_bytes(&k).map_err(StorageError::from)?)
        })
        .collect()
    }

    fn tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        anchor_height: Height,
    ) -> Result<Option<TrackedUsage>> {
        let key = TrackedUsageKey::encode(subscription, provider, chain)?;
        Ok(self.versions(&key)?.and_then(|versions| {
            versions.get(&anchor_height).map(|&cu| TrackedUsage {
                cu,
                anchor_height,
            })
        }))
    }

    fn add_tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        cu: ComputeUnits,
        anchor_height: Height,
    ) -> Result<TrackedUsage> {
        let key = TrackedUsageKey::encode(subscription, provider, chain)?;

        // The closure may run more than once under contention; it leaves the
        // stored value untouched when the record cannot be decoded.
        let mut failure: Option<serde_json::Error> = None;
        let updated = self.tracked_usage.update_and_fetch(key.as_bytes(), |old| {
            failure = None;
            let mut versions: UsageVersions = match old
                .map(|bytes| serde_json::from_slice::<UsageVersions>(bytes))
                .transpose()
            {
                Ok(versions) => versions.unwrap_or_default(),
                Err(e) => {
                    failure = Some(e);
                    return old.map(<[u8]>::to_vec);
                }
            };
            let entry = versions.entry(anchor_height).or_insert(0);
            *entry = entry.saturating_add(cu);
            match serde_json::to_vec(&versions) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    failure = Some(e);
                    old.map(<[u8]>::to_vec)
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(StorageError::from(e).into());
        }

        let versions: UsageVersions = updated
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?
            .unwrap_or_default();
        let record = TrackedUsage {
            cu: versions.get(&anchor_height).copied().unwrap_or(0),
            anchor_height,
        };
        debug!(target: "storage", key = %key, anchor_height, cu = record.cu, "Tracked usage updated");
        Ok(record)
    }

    fn remove_tracked_usage(&self, subscription: &str) -> Result<usize> {
        let prefix = TrackedUsageKey::subscription_prefix(subscription);
        let mut removed = 0;
        for entry in self.tracked_usage.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            if self.tracked_usage.remove(&key)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl SubscriptionStore for SledStorage {
    fn subscription(&self, id: &str) -> Result<Option<SubscriptionSnapshot>> {
        self.subscriptions
            .get(id.as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn put_subscription(&self, sub: SubscriptionSnapshot) -> Result<()> {
        self.subscriptions
            .insert(sub.id.as_bytes(), serde_json::to_vec(&sub)?)?;
        Ok(())
    }

    fn remove_subscription(&self, id: &str) -> Result<bool> {
        Ok(self.subscriptions.remove(id.as_bytes())?.is_some())
    }

    fn list_subscriptions(&self) -> Result<Vec<SubscriptionSnapshot>> {
        self.subscriptions
            .iter()
            .map(|r| {
                let (_, v) = r?;
                Ok(serde_json::from_slice::<SubscriptionSnapshot>(&v)?)
            })
            .collect()
    }
}

/// In-memory testing backend
#[derive(Default)]
pub struct MemoryStorage {
    tracked_usage: Arc<RwLock<BTreeMap<TrackedUsageKey, UsageVersions>>>,
    subscriptions: Arc<RwLock<BTreeMap<String, SubscriptionSnapshot>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageLedger for MemoryStorage {
    fn tracked_usage_keys(&self, subscription: Option<&str>) -> Result<Vec<TrackedUsageKey>> {
        let prefix = filter_prefix(subscription);
        Ok(self
            .tracked_usage
            .read()
            .keys()
            .filter(|k| {
                prefix
                    .as_deref()
                    .map(|p| k.as_str().starts_with(p))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    fn tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        anchor_height: Height,
    ) -> Result<Option<TrackedUsage>> {
        let key = TrackedUsageKey::encode(subscription, provider, chain)?;
        Ok(self
            .tracked_usage
            .read()
            .get(&key)
            .and_then(|versions| versions.get(&anchor_height))
            .map(|&cu| TrackedUsage { cu, anchor_height }))
    }

    fn add_tracked_usage(
        &self,
        subscription: &str,
        provider: &str,
        chain: &str,
        cu: ComputeUnits,
        anchor_height: Height,
    ) -> Result<TrackedUsage> {
        let key = TrackedUsageKey::encode(subscription, provider, chain)?;
        let mut usage = self.tracked_usage.write();
        let entry = usage
            .entry(key)
            .or_default()
            .entry(anchor_height)
            .or_insert(0);
        *entry = entry.saturating_add(cu);
        Ok(TrackedUsage {
            cu: *entry,
            anchor_height,
        })
    }

    fn remove_tracked_usage(&self, subscription: &str) -> Result<usize> {
        let prefix = TrackedUsageKey::subscription_prefix(subscription);
        let mut usage = self.tracked_usage.write();
        let before = usage.len();
        usage.retain(|k, _| !k.as_str().starts_with(&prefix));
        Ok(before - usage.len())
    }
}

impl SubscriptionStore for MemoryStorage {
    fn subscription(&self, id: &str) -> Result<Option<SubscriptionSnapshot>> {
        Ok(self.subscriptions.read().get(id).cloned())
    }

    fn put_subscription(&self, sub: SubscriptionSnapshot) -> Result<()> {
        self.subscriptions.write().insert(sub.id.clone(), sub);
        Ok(())
    }

    fn remove_subscription(&self, id: &str) -> Result<bool> {
        Ok(self.subscriptions.write().remove(id).is_some())
    }

    fn list_subscriptions(&self) -> Result<Vec<SubscriptionSnapshot>> {
        Ok(self.subscriptions.read().values().cloned().collect())
    }
}
