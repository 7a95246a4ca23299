//! In-process store backed by DashMap for the catalog and an append-only
//! log for interactions. Implements every read interface the engine needs.

use dashmap::DashMap;
use market_core::store::{CatalogStore, InteractionStore, VendorStore};
use market_core::types::{Interaction, Item, ItemId, UserId, Vendor, VendorId};
use market_core::{RecsError, RecsResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

pub struct InMemoryStore {
    items: DashMap<ItemId, Item>,
    vendors: DashMap<VendorId, Vendor>,
    interactions: RwLock<Vec<Interaction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            vendors: DashMap::new(),
            interactions: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a vendor.
    pub fn put_vendor(&self, vendor: Vendor) {
        self.vendors.insert(vendor.id, vendor);
    }

    /// Insert or replace a catalog item.
    pub fn put_item(&self, item: Item) {
        self.items.insert(item.id, item);
    }

    /// Append an interaction. The item must already exist in the catalog.
    pub fn record_interaction(&self, interaction: Interaction) -> RecsResult<()> {
        if !self.items.contains_key(&interaction.item_id) {
            return Err(RecsError::Validation(format!(
                "interaction references unknown item {}",
                interaction.item_id
            )));
        }
        check_value(interaction.value)?;
        debug!(
            user_id = interaction.user_id,
            item_id = interaction.item_id,
            "Recording interaction"
        );
        self.interactions.write().push(interaction);
        Ok(())
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.read().len()
    }

    pub(crate) fn has_item(&self, item_id: ItemId) -> bool {
        self.items.contains_key(&item_id)
    }

    /// Append every interaction not already present in the log, under one
    /// write lock. Returns how many were appended.
    pub(crate) fn append_missing(&self, batch: Vec<Interaction>) -> usize {
        let mut log = self.interactions.write();
        let existing = log.len();
        let mut appended = 0;
        for interaction in batch {
            if log[..existing].contains(&interaction) {
                continue;
            }
            log.push(interaction);
            appended += 1;
        }
        appended
    }
}

pub(crate) fn check_value(value: f64) -> RecsResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(RecsError::Validation(format!(
            "interaction value must be a non-negative number, got {}",
            value
        )));
    }
    Ok(())
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionStore for InMemoryStore {
    fn list_distinct_user_ids(&self) -> RecsResult<Vec<UserId>> {
        let log = self.interactions.read();
        let mut seen = HashSet::new();
        Ok(log
            .iter()
            .filter(|i| seen.insert(i.user_id))
            .map(|i| i.user_id)
            .collect())
    }

    fn list_item_ids(&self) -> RecsResult<Vec<ItemId>> {
        let mut ids: Vec<ItemId> = self.items.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn list_interactions(&self) -> RecsResult<Vec<Interaction>> {
        Ok(self.interactions.read().clone())
    }

    fn list_interactions_for_items_owned_by(
        &self,
        seller_id: VendorId,
    ) -> RecsResult<Vec<Interaction>> {
        let owned: HashSet<ItemId> = self
            .items
            .iter()
            .filter(|entry| entry.vendor_id == seller_id)
            .map(|entry| *entry.key())
            .collect();

        Ok(self
            .interactions
            .read()
            .iter()
            .filter(|i| owned.contains(&i.item_id))
            .cloned()
            .collect())
    }
}

impl CatalogStore for InMemoryStore {
    /// Items in the order requested; unknown ids are skipped.
    fn get_items_by_ids(&self, ids: &[ItemId]) -> RecsResult<Vec<Item>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.items.get(id).map(|entry| entry.clone()))
            .collect())
    }

    fn list_items(&self) -> RecsResult<Vec<Item>> {
        let mut items: Vec<Item> = self.items.iter().map(|entry| entry.clone()).collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }
}

impl VendorStore for InMemoryStore {
    fn get_vendors_by_ids(&self, ids: &[VendorId]) -> RecsResult<Vec<Vendor>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.vendors.get(id).map(|entry| entry.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use market_core::types::InteractionType;

    fn item(id: ItemId, vendor_id: VendorId) -> Item {
        Item {
            id,
            name: format!("item-{}", id),
            description: "gadgets".to_string(),
            price: 10.0,
            vendor_id,
        }
    }

    fn interaction(user_id: UserId, item_id: ItemId) -> Interaction {
        Interaction {
            user_id,
            item_id,
            interaction_type: InteractionType::View,
            value: 1.0,
            timestamp: Utc::now(),
            location: None,
        }
    }

    #[test]
    fn test_rejects_interaction_for_unknown_item() {
        let store = InMemoryStore::new();
        let err = store.record_interaction(interaction(1, 99)).unwrap_err();
        assert!(matches!(err, RecsError::Validation(_)));
        assert_eq!(store.interaction_count(), 0);
    }

    #[test]
    fn test_rejects_negative_value() {
        let store = InMemoryStore::new();
        store.put_item(item(1, 1));
        let mut bad = interaction(1, 1);
        bad.value = -2.0;
        assert!(store.record_interaction(bad).is_err());
    }

    #[test]
    fn test_distinct_users_in_first_seen_order() {
        let store = InMemoryStore::new();
        store.put_item(item(10, 1));
        store.put_item(item(20, 1));
        store.record_interaction(interaction(3, 10)).unwrap();
        store.record_interaction(interaction(1, 20)).unwrap();
        store.record_interaction(interaction(3, 20)).unwrap();

        assert_eq!(store.list_distinct_user_ids().unwrap(), vec![3, 1]);
        assert_eq!(store.list_item_ids().unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_seller_scoped_interactions() {
        let store = InMemoryStore::new();
        store.put_item(item(10, 1));
        store.put_item(item(20, 2));
        store.record_interaction(interaction(1, 10)).unwrap();
        store.record_interaction(interaction(1, 20)).unwrap();
        store.record_interaction(interaction(2, 20)).unwrap();

        let seller_two = store.list_interactions_for_items_owned_by(2).unwrap();
        assert_eq!(seller_two.len(), 2);
        assert!(seller_two.iter().all(|i| i.item_id == 20));
        assert!(store.list_interactions_for_items_owned_by(7).unwrap().is_empty());
    }

    #[test]
    fn test_get_items_preserves_request_order() {
        let store = InMemoryStore::new();
        store.put_item(item(1, 1));
        store.put_item(item(2, 1));
        let items = store.get_items_by_ids(&[2, 42, 1]).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
