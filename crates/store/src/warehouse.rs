//! Static warehouse directory. Stands in for the logistics service until a
//! real one is wired in; nearest-warehouse selection is best effort.

use market_core::store::WarehouseService;
use market_core::types::{Region, Warehouse};
use market_core::RecsResult;

pub struct StaticWarehouseService {
    warehouses: Vec<Warehouse>,
}

impl StaticWarehouseService {
    pub fn new(warehouses: Vec<Warehouse>) -> Self {
        Self { warehouses }
    }
}

impl WarehouseService for StaticWarehouseService {
    fn list_warehouses(&self) -> RecsResult<Vec<Warehouse>> {
        Ok(self.warehouses.clone())
    }

    /// Closest warehouse by great-circle distance to the region centroid.
    /// Warehouses without coordinates are only used when none have any,
    /// in which case the first listed wins.
    fn nearest_warehouse_for_region(
        &self,
        region: &Region,
        warehouses: &[Warehouse],
    ) -> Option<Warehouse> {
        let located = warehouses
            .iter()
            .filter_map(|w| w.coordinates.map(|c| (w, c.haversine_km(&region.centroid))))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(w, _)| w.clone());

        located.or_else(|| warehouses.first().cloned())
    }
}
