//! Collaborative filtering over the user/item interaction graph.
//!
//! Results are ordered by discovery, not by relevance: the target user's own
//! items come first, then items reached through neighbours in log order.

use market_core::types::{Interaction, Item, ItemId, UserId, VendorId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Second-degree frontiers above this size are logged; the expansion is not capped.
const LARGE_FRONTIER_WARN: usize = 10_000;

/// Bipartite adjacency built from the interaction log. Both adjacency lists
/// keep first-seen order and contain no duplicates.
pub struct InteractionGraph {
    user_items: HashMap<UserId, Vec<ItemId>>,
    item_users: HashMap<ItemId, Vec<UserId>>,
}

impl InteractionGraph {
    pub fn build(interactions: &[Interaction]) -> Self {
        let mut user_items: HashMap<UserId, Vec<ItemId>> = HashMap::new();
        let mut item_users: HashMap<ItemId, Vec<UserId>> = HashMap::new();
        let mut edges: HashSet<(UserId, ItemId)> = HashSet::new();

        for interaction in interactions {
            if !edges.insert((interaction.user_id, interaction.item_id)) {
                continue;
            }
            user_items
                .entry(interaction.user_id)
                .or_default()
                .push(interaction.item_id);
            item_users
                .entry(interaction.item_id)
                .or_default()
                .push(interaction.user_id);
        }

        Self {
            user_items,
            item_users,
        }
    }

    pub fn items_of(&self, user_id: UserId) -> &[ItemId] {
        self.user_items
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn users_of(&self, item_id: ItemId) -> &[UserId] {
        self.item_users
            .get(&item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Expand a user set by one hop: the input users followed by every user
    /// sharing at least one item with them.
    pub fn expand(&self, users: &[UserId]) -> Vec<UserId> {
        let mut seen: HashSet<UserId> = users.iter().copied().collect();
        let mut frontier: Vec<UserId> = users.to_vec();

        for &user in users {
            for &item in self.items_of(user) {
                for &neighbour in self.users_of(item) {
                    if seen.insert(neighbour) {
                        frontier.push(neighbour);
                    }
                }
            }
        }
        frontier
    }

    /// Distinct items touched by any of `users`, in user order.
    pub fn items_of_all(&self, users: &[UserId]) -> Vec<ItemId> {
        let mut seen = HashSet::new();
        users
            .iter()
            .flat_map(|&user| self.items_of(user).iter().copied())
            .filter(|item| seen.insert(*item))
            .collect()
    }
}

/// Items the user interacted with directly.
pub fn direct_items(user_id: UserId, interactions: &[Interaction]) -> Vec<ItemId> {
    InteractionGraph::build(interactions)
        .items_of(user_id)
        .to_vec()
}

/// User-based collaborative filtering: the union of items touched by the
/// user and by every user sharing an item with them. The user's own items
/// stay in the result. Empty when the user has no interactions.
pub fn recommend_by_user(user_id: UserId, interactions: &[Interaction]) -> Vec<ItemId> {
    let graph = InteractionGraph::build(interactions);
    if graph.items_of(user_id).is_empty() {
        return Vec::new();
    }

    let neighbourhood = graph.expand(&[user_id]);
    debug!(
        user_id,
        neighbours = neighbourhood.len() - 1,
        "User-based neighbourhood"
    );
    graph.items_of_all(&neighbourhood)
}

/// Item-based approximation: expands the neighbourhood by a second hop
/// (neighbours of neighbours) before collecting items. No relevance decay;
/// on dense graphs this approaches the whole catalog.
pub fn recommend_by_item(user_id: UserId, interactions: &[Interaction]) -> Vec<ItemId> {
    let graph = InteractionGraph::build(interactions);
    if graph.items_of(user_id).is_empty() {
        return Vec::new();
    }

    let first_degree = graph.expand(&[user_id]);
    let second_degree = graph.expand(&first_degree);
    if second_degree.len() > LARGE_FRONTIER_WARN {
        warn!(
            user_id,
            frontier = second_degree.len(),
            "Item-based expansion reached a very large neighbourhood"
        );
    }
    debug!(
        user_id,
        first_degree = first_degree.len(),
        second_degree = second_degree.len(),
        "Item-based neighbourhood"
    );
    graph.items_of_all(&second_degree)
}

/// Distinct owning vendors of the user's items. `items` must contain the
/// catalog entries for those items; unknown items are skipped.
pub fn recommend_vendors(
    user_id: UserId,
    interactions: &[Interaction],
    items: &[Item],
) -> Vec<VendorId> {
    let owners: HashMap<ItemId, VendorId> = items.iter().map(|i| (i.id, i.vendor_id)).collect();
    let mut seen = HashSet::new();

    direct_items(user_id, interactions)
        .into_iter()
        .filter_map(|item| owners.get(&item).copied())
        .filter(|vendor| seen.insert(*vendor))
        .collect()
}
