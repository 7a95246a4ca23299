//! Stocking planner: clusters a seller's buyers by location, forecasts
//! demand per cluster, and pairs each cluster with its nearest warehouse.

use crate::cluster::KMeans;
use crate::forecast::{DemandForecaster, ForecastPoint};
use chrono::{DateTime, Utc};
use market_core::config::{ForecastConfig, StockingConfig};
use market_core::store::{InteractionStore, WarehouseService};
use market_core::types::{GeoPoint, Interaction, ItemId, Region, VendorId, Warehouse, WarehouseId};
use market_core::{RecsError, RecsResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct StockingSuggestion {
    pub item_id: ItemId,
    pub region: String,
    pub cluster: usize,
    pub centroid: GeoPoint,
    pub warehouse_id: Option<WarehouseId>,
    pub warehouse_location: Option<String>,
    /// Summed interaction value for this item inside the cluster.
    pub observed_demand: f64,
    /// The item's share of the cluster's projected demand over the horizon.
    pub forecast_demand: Option<f64>,
    pub suggested_quantity: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub label: String,
    pub centroid: GeoPoint,
    pub interactions: usize,
    pub warehouse_id: Option<WarehouseId>,
    pub projected_demand: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockingPlan {
    pub seller_id: VendorId,
    pub generated_at: DateTime<Utc>,
    pub regions: Vec<RegionSummary>,
    pub suggestions: Vec<StockingSuggestion>,
    /// Seller interactions left out of clustering for lack of a location.
    pub skipped_without_location: usize,
}

impl StockingPlan {
    fn empty(seller_id: VendorId, skipped_without_location: usize) -> Self {
        Self {
            seller_id,
            generated_at: Utc::now(),
            regions: Vec::new(),
            suggestions: Vec::new(),
            skipped_without_location,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDemand {
    pub item_id: ItemId,
    pub forecast: Vec<ForecastPoint>,
}

pub struct StockingPlanner {
    interactions: Arc<dyn InteractionStore>,
    warehouses: Arc<dyn WarehouseService>,
    kmeans: KMeans,
    forecaster: DemandForecaster,
}

impl StockingPlanner {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        warehouses: Arc<dyn WarehouseService>,
        stocking: &StockingConfig,
        forecast: &ForecastConfig,
    ) -> Self {
        Self {
            interactions,
            warehouses,
            kmeans: KMeans::new(stocking.clusters)
                .with_max_iter(stocking.max_iter)
                .with_tolerance(stocking.tolerance),
            forecaster: DemandForecaster::new(forecast),
        }
    }

    /// Stocking suggestions for every (item, buyer region) pair observed in
    /// the seller's catalog interactions. A seller with no interactions
    /// gets an empty plan.
    pub fn plan_stocking(&self, seller_id: VendorId) -> RecsResult<StockingPlan> {
        let log = self
            .interactions
            .list_interactions_for_items_owned_by(seller_id)?;
        if log.is_empty() {
            debug!(seller_id, "No catalog interactions, empty stocking plan");
            return Ok(StockingPlan::empty(seller_id, 0));
        }

        let located: Vec<(&Interaction, GeoPoint)> = log
            .iter()
            .filter_map(|i| i.location.map(|loc| (i, loc)))
            .collect();
        let skipped = log.len() - located.len();
        let points: Vec<GeoPoint> = located.iter().map(|(_, p)| *p).collect();

        let Some(clustering) = self.kmeans.fit(&points) else {
            info!(seller_id, skipped, "No located interactions to cluster");
            return Ok(StockingPlan::empty(seller_id, skipped));
        };

        let warehouses = self.warehouses.list_warehouses()?;
        if warehouses.is_empty() {
            return Err(RecsError::Upstream(
                "warehouse service returned no warehouses".to_string(),
            ));
        }

        let mut plan = StockingPlan::empty(seller_id, skipped);
        for (cluster, centroid) in clustering.centroids.iter().enumerate() {
            let members: Vec<Interaction> = clustering
                .members(cluster)
                .into_iter()
                .map(|idx| located[idx].0.clone())
                .collect();
            if members.is_empty() {
                continue;
            }

            let region = Region {
                label: format!("region-{}", cluster),
                centroid: *centroid,
            };
            let (summary, suggestions) = self.plan_region(cluster, region, &members, &warehouses);
            plan.regions.push(summary);
            plan.suggestions.extend(suggestions);
        }

        info!(
            seller_id,
            interactions = log.len(),
            skipped,
            regions = plan.regions.len(),
            suggestions = plan.suggestions.len(),
            iterations = clustering.iterations,
            "Stocking plan computed"
        );
        Ok(plan)
    }

    fn plan_region(
        &self,
        cluster: usize,
        region: Region,
        members: &[Interaction],
        warehouses: &[Warehouse],
    ) -> (RegionSummary, Vec<StockingSuggestion>) {
        let warehouse = self
            .warehouses
            .nearest_warehouse_for_region(&region, warehouses);

        let forecast = self.forecaster.forecast(members);
        let projected: Option<f64> = if forecast.is_empty() {
            None
        } else {
            Some(
                forecast
                    .iter()
                    .filter(|p| p.projected)
                    .map(|p| p.value)
                    .sum(),
            )
        };

        let mut per_item: BTreeMap<ItemId, f64> = BTreeMap::new();
        for interaction in members {
            let value = if interaction.value.is_finite() {
                interaction.value
            } else {
                0.0
            };
            *per_item.entry(interaction.item_id).or_insert(0.0) += value;
        }
        let total: f64 = per_item.values().sum();

        let suggestions = per_item
            .into_iter()
            .map(|(item_id, observed)| {
                let share = if total > 0.0 { observed / total } else { 0.0 };
                let forecast_demand = projected.map(|p| share * p);
                let suggested_quantity = forecast_demand
                    .zip(warehouse.as_ref())
                    .map(|(demand, w)| demand.round().clamp(0.0, w.available_space as f64) as u32);

                StockingSuggestion {
                    item_id,
                    region: region.label.clone(),
                    cluster,
                    centroid: region.centroid,
                    warehouse_id: warehouse.as_ref().map(|w| w.id),
                    warehouse_location: warehouse.as_ref().map(|w| w.location.clone()),
                    observed_demand: observed,
                    forecast_demand,
                    suggested_quantity,
                }
            })
            .collect();

        let summary = RegionSummary {
            label: region.label,
            centroid: region.centroid,
            interactions: members.len(),
            warehouse_id: warehouse.map(|w| w.id),
            projected_demand: projected,
        };
        (summary, suggestions)
    }

    /// Per-product demand forecast over the seller's catalog interactions,
    /// ordered by item id. Products with fewer than two active dates carry an
    /// empty forecast.
    pub fn forecast_seller_demand(&self, seller_id: VendorId) -> RecsResult<Vec<ProductDemand>> {
        let log = self
            .interactions
            .list_interactions_for_items_owned_by(seller_id)?;

        let mut by_item: BTreeMap<ItemId, Vec<Interaction>> = BTreeMap::new();
        for interaction in log {
            by_item
                .entry(interaction.item_id)
                .or_default()
                .push(interaction);
        }

        Ok(by_item
            .into_iter()
            .map(|(item_id, history)| ProductDemand {
                item_id,
                forecast: self.forecaster.forecast(&history),
            })
            .collect())
    }
}
