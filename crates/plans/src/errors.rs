use relaymeter_types::Height;
use thiserror::Error;

/// Errors raised while parsing geolocation masks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("invalid geolocation value: {0}")]
    InvalidValue(String),

    #[error("invalid geolocation code: {0}")]
    InvalidCode(String),
}

/// Errors raised by plan validation and plan lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan index must not be empty")]
    EmptyIndex,

    #[error("plan {0} must have a non-zero price")]
    ZeroPrice(String),

    #[error("epoch CU limit {epoch} exceeds total CU limit {total}")]
    InvalidCuLimits { epoch: u64, total: u64 },

    #[error("plan {0} must allow pairing with at least one provider")]
    InvalidMaxProviders(String),

    #[error("annual discount percentage {0} exceeds 100")]
    InvalidDiscount(u64),

    #[error("plan geolocation profile {0:#x} is not a valid geolocation mask")]
    InvalidGeolocation(u32),

    #[error("plan {index} not found at height {height}")]
    PlanNotFound { index: String, height: Height },

    #[error("plan {index} version at block {block} is not newer than block {latest}")]
    StaleVersion {
        index: String,
        block: Height,
        latest: Height,
    },
}
