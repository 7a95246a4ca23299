//! Collaborator interfaces the engine reads through.
//!
//! Implementations may block (database, remote service); callers own timeouts.
//! Every method is a read, and the engine never mutates what it gets back.

use crate::error::RecsResult;
use crate::types::{Interaction, Item, ItemId, Region, UserId, Vendor, VendorId, Warehouse};

pub trait InteractionStore: Send + Sync {
    fn list_distinct_user_ids(&self) -> RecsResult<Vec<UserId>>;

    fn list_item_ids(&self) -> RecsResult<Vec<ItemId>>;

    /// The full interaction log in append order.
    fn list_interactions(&self) -> RecsResult<Vec<Interaction>>;

    /// Interactions whose item belongs to the given seller's catalog.
    fn list_interactions_for_items_owned_by(&self, seller_id: VendorId)
        -> RecsResult<Vec<Interaction>>;
}

pub trait CatalogStore: Send + Sync {
    fn get_items_by_ids(&self, ids: &[ItemId]) -> RecsResult<Vec<Item>>;

    fn list_items(&self) -> RecsResult<Vec<Item>>;
}

pub trait VendorStore: Send + Sync {
    fn get_vendors_by_ids(&self, ids: &[VendorId]) -> RecsResult<Vec<Vendor>>;
}

pub trait WarehouseService: Send + Sync {
    fn list_warehouses(&self) -> RecsResult<Vec<Warehouse>>;

    /// Best-effort nearest warehouse for a region. `None` when `warehouses` is empty.
    fn nearest_warehouse_for_region(
        &self,
        region: &Region,
        warehouses: &[Warehouse],
    ) -> Option<Warehouse>;
}
