//! Content-based matching on category tag and price band.

use crate::similarity::direct_items;
use market_core::types::{Interaction, Item, UserId};
use tracing::debug;

const PRICE_BAND_LOW: f64 = 0.8;
const PRICE_BAND_HIGH: f64 = 1.2;

/// Items sharing the seed item's category tag and priced within ±20% of it.
///
/// The seed is the user's first interacted item; later items do not widen
/// the match. Empty when the user has no interactions or the seed is missing
/// from `catalog`. The seed itself matches and is included.
pub fn recommend_by_content(
    user_id: UserId,
    interactions: &[Interaction],
    catalog: &[Item],
) -> Vec<Item> {
    let Some(seed_id) = direct_items(user_id, interactions).first().copied() else {
        return Vec::new();
    };
    let Some(seed) = catalog.iter().find(|item| item.id == seed_id) else {
        debug!(user_id, seed_id, "Seed item missing from catalog");
        return Vec::new();
    };

    let low = seed.price * PRICE_BAND_LOW;
    let high = seed.price * PRICE_BAND_HIGH;

    catalog
        .iter()
        .filter(|item| item.description == seed.description)
        .filter(|item| item.price >= low && item.price <= high)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use market_core::types::{InteractionType, ItemId};

    fn event(user_id: UserId, item_id: ItemId) -> Interaction {
        Interaction {
            user_id,
            item_id,
            interaction_type: InteractionType::Purchase,
            value: 1.0,
            timestamp: Utc::now(),
            location: None,
        }
    }

    fn item(id: ItemId, description: &str, price: f64) -> Item {
        Item {
            id,
            name: format!("item-{}", id),
            description: description.to_string(),
            price,
            vendor_id: 1,
        }
    }

    fn catalog() -> Vec<Item> {
        vec![
            item(1, "phones", 100.0),
            item(2, "phones", 80.0),
            item(3, "phones", 120.0),
            item(4, "phones", 121.0),
            item(5, "laptops", 100.0),
            item(6, "phones", 79.0),
        ]
    }

    #[test]
    fn test_matches_category_and_inclusive_price_band() {
        let log = vec![event(1, 1)];
        let ids: Vec<_> = recommend_by_content(1, &log, &catalog())
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_only_first_item_seeds_the_match() {
        let log = vec![event(1, 5), event(1, 1)];
        let ids: Vec<_> = recommend_by_content(1, &log, &catalog())
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_no_interactions_is_empty() {
        assert!(recommend_by_content(1, &[], &catalog()).is_empty());
    }

    #[test]
    fn test_seed_missing_from_catalog_is_empty() {
        let log = vec![event(1, 404)];
        assert!(recommend_by_content(1, &log, &catalog()).is_empty());
    }
}
