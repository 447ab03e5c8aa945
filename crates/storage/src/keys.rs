//! Tracked-usage key encoding.
//!
//! A key is the subscription, provider and chain joined by a single space.
//! None of the components may be empty or contain the separator, which keeps
//! the encoding lossless and makes `"<sub> "` a prefix selecting exactly one
//! subscription's keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const KEY_SEPARATOR: char = ' ';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid {component} in tracked usage key: {value:?}")]
    InvalidComponent {
        component: &'static str,
        value: String,
    },

    #[error("malformed tracked usage key: {0:?}")]
    Malformed(String),

    #[error("tracked usage key is not valid UTF-8")]
    NotUtf8,
}

/// The decoded identity of one usage accumulator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackedUsageId {
    pub subscription: String,
    pub provider: String,
    pub chain: String,
}

/// Opaque encoded form of a [`TrackedUsageId`]. Ordering follows the encoded
/// bytes, which is also the order storage backends enumerate keys in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackedUsageKey(String);

impl TrackedUsageKey {
    pub fn encode(subscription: &str, provider: &str, chain: &str) -> Result<Self, KeyError> {
        check_component("subscription", subscription)?;
        check_component("provider", provider)?;
        check_component("chain", chain)?;
        Ok(Self(format!(
            "{subscription}{KEY_SEPARATOR}{provider}{KEY_SEPARATOR}{chain}"
        )))
    }

    pub fn decode(&self) -> Result<TrackedUsageId, KeyError> {
        let mut parts = self.0.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(sub), Some(provider), Some(chain), None)
                if !sub.is_empty() && !provider.is_empty() && !chain.is_empty() =>
            {
                Ok(TrackedUsageId {
                    subscription: sub.to_string(),
                    provider: provider.to_string(),
                    chain: chain.to_string(),
                })
            }
            _ => Err(KeyError::Malformed(self.0.clone())),
        }
    }

    /// Rebuild a key read back from a storage backend.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw = std::str::from_utf8(bytes).map_err(|_| KeyError::NotUtf8)?;
        Self::try_from(raw.to_string())
    }

    /// Prefix shared by every key of one subscription.
    pub fn subscription_prefix(subscription: &str) -> String {
        format!("{subscription}{KEY_SEPARATOR}")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TrackedUsageId {
    pub fn key(&self) -> Result<TrackedUsageKey, KeyError> {
        TrackedUsageKey::encode(&self.subscription, &self.provider, &self.chain)
    }
}

impl TryFrom<String> for TrackedUsageKey {
    type Error = KeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let key = Self(raw);
        key.decode()?;
        Ok(key)
    }
}

impl From<TrackedUsageKey> for String {
    fn from(key: TrackedUsageKey) -> Self {
        key.0
    }
}

impl fmt::Display for TrackedUsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_component(component: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() || value.contains(KEY_SEPARATOR) {
        return Err(KeyError::InvalidComponent {
            component,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let key = TrackedUsageKey::encode("rmsub", "rmprov", "ETH1").unwrap();
        assert_eq!(key.as_str(), "rmsub rmprov ETH1");

        let id = key.decode().unwrap();
        assert_eq!(id.subscription, "rmsub");
        assert_eq!(id.provider, "rmprov");
        assert_eq!(id.chain, "ETH1");
        assert_eq!(id.key().unwrap(), key);
    }

    #[test]
    fn test_rejects_separator_and_empty() {
        assert!(matches!(
            TrackedUsageKey::encode("a b", "p", "c"),
            Err(KeyError::InvalidComponent {
                component: "subscription",
                ..
            })
        ));
        assert!(matches!(
            TrackedUsageKey::encode("a", "", "c"),
            Err(KeyError::InvalidComponent {
                component: "provider",
                ..
            })
        ));
        assert!(TrackedUsageKey::encode("a", "p", "").is_err());
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            TrackedUsageKey::from_bytes(b"only two"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            TrackedUsageKey::from_bytes(b"a b c d"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            TrackedUsageKey::from_bytes(b"a  c"),
            Err(KeyError::Malformed(_))
        ));
        assert_eq!(
            TrackedUsageKey::from_bytes(&[0xff, 0x20, 0x61]),
            Err(KeyError::NotUtf8)
        );
        assert!(TrackedUsageKey::from_bytes(b"a b c").is_ok());
    }

    #[test]
    fn test_json_goes_through_validation() {
        let key = TrackedUsageKey::encode("rmsub", "rmprov", "ETH1").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"rmsub rmprov ETH1\"");
        assert_eq!(serde_json::from_str::<TrackedUsageKey>(&json).unwrap(), key);

        assert!(serde_json::from_str::<TrackedUsageKey>("\"only two\"").is_err());
        assert!(serde_json::from_str::<TrackedUsageKey>("\"a  c\"").is_err());
    }

    #[test]
    fn test_prefix_selects_one_subscription() {
        let prefix = TrackedUsageKey::subscription_prefix("rmab");
        let own = TrackedUsageKey::encode("rmab", "p", "c").unwrap();
        let other = TrackedUsageKey::encode("rmabc", "p", "c").unwrap();
        assert!(own.as_str().starts_with(&prefix));
        assert!(!other.as_str().starts_with(&prefix));
    }
}
