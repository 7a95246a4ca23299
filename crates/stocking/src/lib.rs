//! Stocking & demand: per-product demand forecasts, buyer-region clustering,
//! and warehouse stocking suggestions. Everything is recomputed per call.

#![warn(clippy::unwrap_used)]

pub mod cluster;
pub mod forecast;
pub mod planner;

pub use cluster::{Clustering, KMeans};
pub use forecast::{DemandForecaster, ForecastPoint};
pub use planner::{ProductDemand, RegionSummary, StockingPlan, StockingPlanner, StockingSuggestion};
