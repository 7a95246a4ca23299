//! Fixture loading and the canonical demo data set.

use crate::memory::{check_value, InMemoryStore};
use chrono::{TimeZone, Utc};
use market_core::types::{GeoPoint, Interaction, InteractionType, Item, ItemId, Vendor};
use market_core::{RecsError, RecsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// A self-contained catalog + interaction snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub vendors: Vec<Vendor>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixtureSummary {
    pub vendors: usize,
    pub items: usize,
    pub interactions: usize,
}

impl Fixture {
    pub fn from_path(path: impl AsRef<Path>) -> RecsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl InMemoryStore {
    /// Load a fixture. Every interaction is checked before anything is
    /// written, so a bad fixture leaves the store untouched. Interactions
    /// already in the log are skipped, which makes re-applying a no-op.
    pub fn apply_fixture(&self, fixture: Fixture) -> RecsResult<FixtureSummary> {
        let incoming: HashSet<ItemId> = fixture.items.iter().map(|item| item.id).collect();
        for interaction in &fixture.interactions {
            if !incoming.contains(&interaction.item_id) && !self.has_item(interaction.item_id) {
                return Err(RecsError::Validation(format!(
                    "fixture interaction references unknown item {}",
                    interaction.item_id
                )));
            }
            check_value(interaction.value)?;
        }

        let vendors = fixture.vendors.len();
        let items = fixture.items.len();
        let offered = fixture.interactions.len();
        for vendor in fixture.vendors {
            self.put_vendor(vendor);
        }
        for item in fixture.items {
            self.put_item(item);
        }
        let summary = FixtureSummary {
            vendors,
            items,
            interactions: self.append_missing(fixture.interactions),
        };

        info!(
            vendors = summary.vendors,
            items = summary.items,
            interactions = summary.interactions,
            skipped = offered - summary.interactions,
            "Fixture applied"
        );
        Ok(summary)
    }
}

/// Two vendors, three products and a handful of located interactions.
pub fn demo_fixture() -> Fixture {
    let vendors = vec![
        Vendor {
            id: 1,
            name: "Tech Store".to_string(),
            description: Some("Your one-stop shop for tech gadgets".to_string()),
            rating: Some(4.5),
        },
        Vendor {
            id: 2,
            name: "Gadget Hub".to_string(),
            description: Some("Latest and greatest in tech".to_string()),
            rating: Some(4.7),
        },
    ];

    let items = vec![
        Item {
            id: 1,
            name: "Smartphone X".to_string(),
            description: "Latest smartphone with amazing features".to_string(),
            price: 999.99,
            vendor_id: 1,
        },
        Item {
            id: 2,
            name: "Laptop Pro".to_string(),
            description: "High-performance laptop for professionals".to_string(),
            price: 1299.99,
            vendor_id: 2,
        },
        Item {
            id: 3,
            name: "Smartwatch Z".to_string(),
            description: "Smartwatch with health tracking features".to_string(),
            price: 199.99,
            vendor_id: 1,
        },
    ];

    let new_york = GeoPoint::new(40.7128, -74.0060);
    let boston = GeoPoint::new(42.3601, -71.0589);
    let seattle = GeoPoint::new(47.6062, -122.3321);

    let at = |day: u32| {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    };

    let interactions = vec![
        Interaction {
            user_id: 1,
            item_id: 1,
            interaction_type: InteractionType::View,
            value: 1.0,
            timestamp: at(1),
            location: Some(new_york),
        },
        Interaction {
            user_id: 1,
            item_id: 2,
            interaction_type: InteractionType::Purchase,
            value: 1.0,
            timestamp: at(2),
            location: Some(new_york),
        },
        Interaction {
            user_id: 2,
            item_id: 3,
            interaction_type: InteractionType::View,
            value: 1.0,
            timestamp: at(2),
            location: Some(seattle),
        },
        Interaction {
            user_id: 3,
            item_id: 1,
            interaction_type: InteractionType::Purchase,
            value: 2.0,
            timestamp: at(3),
            location: Some(boston),
        },
        Interaction {
            user_id: 3,
            item_id: 3,
            interaction_type: InteractionType::View,
            value: 1.0,
            timestamp: at(4),
            location: Some(boston),
        },
    ];

    Fixture {
        vendors,
        items,
        interactions,
    }
}
