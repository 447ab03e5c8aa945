//! Geolocation capability masks.
//!
//! A mask is a `u32` where every set bit names one serviced region. Two values
//! are reserved: [`Geolocation::GLS`] (zero, the single-region placeholder that
//! is never a valid mask) and [`Geolocation::GL`] (all regions, accepted as-is
//! even though it carries bits outside the known regions).
//!
//! The derived region tables live in a [`GeoCatalog`] that is built once and
//! shared by reference.

use crate::errors::GeoError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Known regions and the two sentinels.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum Geolocation {
    /// Single-region placeholder.
    #[default]
    GLS = 0x0,
    USC = 0x1,
    EU = 0x2,
    USE = 0x4,
    USW = 0x8,
    AF = 0x10,
    AS = 0x20,
    AU = 0x40,
    /// All regions.
    GL = 0xFFFF,
}

impl Geolocation {
    /// Every enum value, ascending by numeric value.
    pub const ALL: [Geolocation; 9] = [
        Geolocation::GLS,
        Geolocation::USC,
        Geolocation::EU,
        Geolocation::USE,
        Geolocation::USW,
        Geolocation::AF,
        Geolocation::AS,
        Geolocation::AU,
        Geolocation::GL,
    ];

    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Geolocation::GLS => "GLS",
            Geolocation::USC => "USC",
            Geolocation::EU => "EU",
            Geolocation::USE => "USE",
            Geolocation::USW => "USW",
            Geolocation::AF => "AF",
            Geolocation::AS => "AS",
            Geolocation::AU => "AU",
            Geolocation::GL => "GL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|geo| geo.name() == name)
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|geo| geo.value() == value)
    }

    fn is_sentinel(self) -> bool {
        matches!(self, Geolocation::GLS | Geolocation::GL)
    }
}

impl fmt::Display for Geolocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Geolocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Geolocation {
    /// Unknown names decode to the zero value ([`Geolocation::GLS`]).
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Geolocation::from_name(&name).unwrap_or_default())
    }
}

/// Returns true if at most one bit is set.
pub fn is_single_region(mask: u32) -> bool {
    mask & mask.wrapping_sub(1) == 0
}

/// Precomputed region tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoCatalog {
    /// Valid single regions (sentinels excluded), ascending.
    regions: Vec<Geolocation>,
    /// OR of every valid region bit.
    regions_mask: u32,
}

impl GeoCatalog {
    /// Build the catalog for the standard region table.
    pub fn standard() -> Self {
        let regions: Vec<Geolocation> = Geolocation::ALL
            .into_iter()
            .filter(|geo| !geo.is_sentinel())
            .collect();
        let regions_mask = regions.iter().fold(0, |acc, geo| acc | geo.value());
        Self {
            regions,
            regions_mask,
        }
    }

    /// Valid single regions in ascending order.
    pub fn regions(&self) -> &[Geolocation] {
        &self.regions
    }

    /// OR of every valid region bit.
    pub fn regions_mask(&self) -> u32 {
        self.regions_mask
    }

    /// A mask is valid if it is the all-regions sentinel, or if it is not the
    /// placeholder and only carries known region bits.
    pub fn validate(&self, mask: u32) -> bool {
        if mask == Geolocation::GL.value() {
            return true;
        }
        mask != Geolocation::GLS.value() && mask & !self.regions_mask == 0
    }

    /// Parse either a decimal mask or a comma-separated list of region names.
    pub fn parse(&self, input: &str) -> Result<u32, GeoError> {
        if let Some(mask) = parse_decimal(input) {
            if mask != Geolocation::GL.value() && !self.validate(mask) {
                return Err(GeoError::InvalidValue(input.to_string()));
            }
            return Ok(mask);
        }

        let mut mask = 0u32;
        for token in input.split(',') {
            match Geolocation::from_name(token) {
                Some(geo) if geo != Geolocation::GLS => mask |= geo.value(),
                _ => return Err(GeoError::InvalidCode(token.to_string())),
            }
        }
        Ok(mask)
    }

    /// Split a mask into the single regions it covers, ascending by value.
    pub fn decompose(&self, mask: u32) -> Vec<Geolocation> {
        self.regions
            .iter()
            .copied()
            .filter(|geo| geo.value() & mask != 0)
            .collect()
    }

    /// Render the region catalog as `NAME: 0xhex` pairs, ascending by value.
    ///
    /// Lists every region except the placeholder, independent of any mask.
    pub fn format(&self) -> String {
        Geolocation::ALL
            .into_iter()
            .filter(|geo| *geo != Geolocation::GLS)
            .map(|geo| format!("{}: {:#x}", geo.name(), geo.value()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for GeoCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Strict unsigned decimal literal; anything else is treated as region names.
fn parse_decimal(input: &str) -> Option<u32> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    input.parse::<u32>().ok()
}
