//! Versioned plan catalog.
//!
//! A plan index may be re-registered with new terms; every version is kept
//! and pinned to the block it was registered at, so a subscription anchored
//! at height `h` always resolves the terms that were live at `h`.

use crate::errors::PlanError;
use crate::geolocation::GeoCatalog;
use crate::plan::Plan;
use relaymeter_types::Height;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanCatalog {
    /// plan index → (registration block → plan version)
    versions: BTreeMap<String, BTreeMap<Height, Plan>>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new version of a plan. Versions must be strictly newer than
    /// the latest stored version of the same index.
    pub fn add_plan(&mut self, plan: Plan, geo: &GeoCatalog) -> Result<(), PlanError> {
        plan.validate(geo)?;

        let versions = self.versions.entry(plan.index.clone()).or_default();
        if let Some((&latest, _)) = versions.last_key_value() {
            if plan.block <= latest {
                return Err(PlanError::StaleVersion {
                    index: plan.index.clone(),
                    block: plan.block,
                    latest,
                });
            }
        }

        info!(
            target: "plans",
            index = %plan.index,
            block = plan.block,
            price = plan.price,
            "Registered plan version"
        );
        versions.insert(plan.block, plan);
        Ok(())
    }

    /// Resolve the version of `index` that was live at `height`.
    pub fn plan_at(&self, index: &str, height: Height) -> Result<&Plan, PlanError> {
        let plan = self
            .versions
            .get(index)
            .and_then(|versions| versions.range(..=height).next_back())
            .map(|(_, plan)| plan)
            .ok_or_else(|| PlanError::PlanNotFound {
                index: index.to_string(),
                height,
            })?;

        debug!(target: "plans", index, height, block = plan.block, "Resolved plan version");
        Ok(plan)
    }

    /// Latest registered version of `index`.
    pub fn latest(&self, index: &str) -> Option<&Plan> {
        self.versions
            .get(index)
            .and_then(|versions| versions.last_key_value())
            .map(|(_, plan)| plan)
    }

    /// All plan indices, ascending.
    pub fn indices(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
