//! Hybrid combiner: user-based and content-based results merged by item id.

use crate::content::recommend_by_content;
use crate::similarity::recommend_by_user;
use market_core::types::{Interaction, Item, ItemId, UserId};
use std::collections::HashMap;

/// Concatenate candidate lists and drop repeated keys. A repeated key keeps
/// the position where it was first seen and takes the later instance.
pub fn merge_dedup<T, F>(sources: Vec<Vec<T>>, key: F) -> Vec<T>
where
    F: Fn(&T) -> ItemId,
{
    let mut merged: Vec<T> = Vec::new();
    let mut positions: HashMap<ItemId, usize> = HashMap::new();

    for candidate in sources.into_iter().flatten() {
        let id = key(&candidate);
        match positions.get(&id).copied() {
            Some(at) => merged[at] = candidate,
            None => {
                positions.insert(id, merged.len());
                merged.push(candidate);
            }
        }
    }
    merged
}

/// Union of user-based and content-based recommendations. Either side may be
/// empty; the result is empty only when both are.
pub fn recommend_hybrid(
    user_id: UserId,
    interactions: &[Interaction],
    catalog: &[Item],
) -> Vec<Item> {
    let by_id: HashMap<ItemId, &Item> = catalog.iter().map(|i| (i.id, i)).collect();

    let collaborative: Vec<Item> = recommend_by_user(user_id, interactions)
        .into_iter()
        .filter_map(|id| by_id.get(&id).map(|item| (*item).clone()))
        .collect();
    let content = recommend_by_content(user_id, interactions, catalog);

    merge_dedup(vec![collaborative, content], |item| item.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use market_core::types::InteractionType;
    use std::collections::HashSet;

    fn event(user_id: UserId, item_id: ItemId) -> Interaction {
        Interaction {
            user_id,
            item_id,
            interaction_type: InteractionType::View,
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

    #[test]
    fn test_merge_keeps_first_position_last_instance() {
        let merged = merge_dedup(
            vec![vec![(1, "a"), (2, "b")], vec![(3, "c"), (1, "z")]],
            |pair| pair.0,
        );
        assert_eq!(merged, vec![(1, "z"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn test_hybrid_is_union_without_duplicates() {
        let catalog = vec![
            item(10, "audio", 50.0),
            item(20, "audio", 55.0),
            item(30, "video", 500.0),
            item(40, "audio", 45.0),
        ];
        let log = vec![event(1, 10), event(2, 10), event(2, 30)];

        let hybrid = recommend_hybrid(1, &log, &catalog);
        let ids: Vec<_> = hybrid.iter().map(|i| i.id).collect();

        let collaborative = recommend_by_user(1, &log);
        let content: Vec<_> = recommend_by_content(1, &log, &catalog)
            .into_iter()
            .map(|i| i.id)
            .collect();
        for id in collaborative.iter().chain(content.iter()) {
            assert!(ids.contains(id), "missing {}", id);
        }

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids, vec![10, 30, 20, 40]);
    }

    #[test]
    fn test_hybrid_survives_empty_content_side() {
        // Seed item absent from the catalog: content side is empty.
        let catalog = vec![item(20, "audio", 10.0)];
        let log = vec![event(1, 10), event(1, 20)];
        let ids: Vec<_> = recommend_hybrid(1, &log, &catalog)
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![20]);
    }

    #[test]
    fn test_hybrid_empty_for_unknown_user() {
        let catalog = vec![item(10, "audio", 10.0)];
        assert!(recommend_hybrid(7, &[event(1, 10)], &catalog).is_empty());
    }
}
