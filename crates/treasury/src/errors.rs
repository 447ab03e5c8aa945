use relaymeter_storage::KeyError;
use relaymeter_types::Height;
use thiserror::Error;

/// Errors that can occur while aggregating usage and settling payouts.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "cannot get tracked CU: subscription {subscription} not found \
         (provider {provider}, chain {chain})"
    )]
    SubscriptionNotFound {
        subscription: String,
        provider: String,
        chain: String,
    },

    #[error("cannot resolve plan of subscription {subscription} at height {height}: {source}")]
    PlanNotFound {
        subscription: String,
        height: Height,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot preview reward split for provider {provider} on chain {chain}: {source}")]
    RewardPreview {
        provider: String,
        chain: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("reward transfer failed for provider {provider} on chain {chain}: {source}")]
    Transfer {
        provider: String,
        chain: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("arithmetic overflow while performing settlement calculation: {0}")]
    CalculationOverflow(&'static str),

    #[error("malformed tracked usage key: {0}")]
    Key(#[from] KeyError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SettlementError>;
