//! Relaymeter Plans
//!
//! Plan definitions and their versioned catalog, the geolocation capability
//! codec used by plan policies, and the policy that turns a provider's share
//! of a subscription's compute units into a monthly reward.

pub mod errors;
pub mod geolocation;
pub mod plan;
pub mod registry;
pub mod reward;

pub use errors::*;
pub use geolocation::*;
pub use plan::*;
pub use registry::*;
pub use reward::*;
