//! Flavor model matching the frontend Flavor interface.

use serde::{Deserialize, Serialize};

/// Flavors inserted the first time the catalog is observed empty.
pub const DEFAULT_FLAVORS: [&str; 7] = [
    "Monster Energy Original Green \"OG\"",
    "Monster Energy Zero Sugar",
    "Monster Energy Nitro Super Dry",
    "Ultra Zero Ultra (White)",
    "Ultra Strawberry Dreams",
    "Juice Monster Mango Loco",
    "Rehab Tea + Lemonade",
];

/// A catalog entry for a product variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flavor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_custom: bool,
}

impl Flavor {
    /// Names compare ignoring case when checking for duplicates.
    pub fn same_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Persisted form of a flavor when the id is the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavorRecord {
    pub name: String,
    #[serde(default)]
    pub is_custom: bool,
}

impl FlavorRecord {
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_custom: true,
        }
    }

    pub fn into_flavor(self, id: String) -> Flavor {
        Flavor {
            id,
            name: self.name,
            is_custom: self.is_custom,
        }
    }
}

/// Records for the default seed list.
pub fn default_flavor_records() -> Vec<FlavorRecord> {
    DEFAULT_FLAVORS
        .iter()
        .map(|name| FlavorRecord {
            name: (*name).to_string(),
            is_custom: false,
        })
        .collect()
}

/// Request body for adding or renaming a flavor.
#[derive(Debug, Clone, Deserialize)]
pub struct FlavorNameRequest {
    #[serde(default)]
    pub name: String,
}
