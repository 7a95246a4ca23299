use crate::types::{GeoPoint, Warehouse};
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `MARKET_RECS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub stocking: StockingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_warehouses")]
    pub warehouses: Vec<Warehouse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Two-tower retrieval model hyperparameters.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Fit the interaction-value ranking loss alongside retrieval.
    #[serde(default = "default_ranking_objective")]
    pub ranking_objective: bool,
    #[serde(default = "default_train_on_startup")]
    pub train_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: usize,
    #[serde(default = "default_season_length")]
    pub season_length: usize,
    /// Only the most recent days up to this span are fitted.
    #[serde(default = "default_max_history_days")]
    pub max_history_days: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockingConfig {
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// JSON fixture with vendors, items and interactions loaded at startup.
    #[serde(default)]
    pub fixture_path: Option<String>,
    #[serde(default)]
    pub seed_demo: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_dimension() -> usize {
    32
}
fn default_epochs() -> usize {
    5
}
fn default_batch_size() -> usize {
    1024
}
fn default_learning_rate() -> f32 {
    0.1
}
fn default_seed() -> u64 {
    42
}
fn default_top_k() -> usize {
    5
}
fn default_ranking_objective() -> bool {
    true
}
fn default_train_on_startup() -> bool {
    true
}
fn default_horizon_days() -> usize {
    30
}
fn default_season_length() -> usize {
    7
}
fn default_max_history_days() -> usize {
    730
}
fn default_clusters() -> usize {
    5
}
fn default_max_iter() -> usize {
    300
}
fn default_tolerance() -> f64 {
    1e-4
}

fn default_warehouses() -> Vec<Warehouse> {
    vec![
        Warehouse {
            id: 1,
            location: "New York".to_string(),
            coordinates: Some(GeoPoint::new(40.7128, -74.0060)),
            capacity: 100,
            available_space: 50,
        },
        Warehouse {
            id: 2,
            location: "Los Angeles".to_string(),
            coordinates: Some(GeoPoint::new(34.0522, -118.2437)),
            capacity: 120,
            available_space: 40,
        },
        Warehouse {
            id: 3,
            location: "Chicago".to_string(),
            coordinates: Some(GeoPoint::new(41.8781, -87.6298)),
            capacity: 80,
            available_space: 70,
        },
    ]
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
            default_top_k: default_top_k(),
            ranking_objective: default_ranking_objective(),
            train_on_startup: default_train_on_startup(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            season_length: default_season_length(),
            max_history_days: default_max_history_days(),
        }
    }
}

impl Default for StockingConfig {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            embedding: EmbeddingConfig::default(),
            forecast: ForecastConfig::default(),
            stocking: StockingConfig::default(),
            store: StoreConfig::default(),
            warehouses: default_warehouses(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("MARKET_RECS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> crate::RecsResult<()> {
        if self.embedding.dimension == 0 {
            return Err(crate::RecsError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(crate::RecsError::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }
        if self.stocking.clusters == 0 {
            return Err(crate::RecsError::Config(
                "stocking.clusters must be positive".to_string(),
            ));
        }
        if self.forecast.season_length < 2 {
            return Err(crate::RecsError::Config(
                "forecast.season_length must be at least 2".to_string(),
            ));
        }
        if self.forecast.max_history_days < 2 * self.forecast.season_length {
            return Err(crate::RecsError::Config(
                "forecast.max_history_days must cover two seasons".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.dimension, 32);
        assert_eq!(config.stocking.clusters, 5);
        assert_eq!(config.forecast.horizon_days, 30);
        assert_eq!(config.warehouses.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_clusters() {
        let mut config = AppConfig::default();
        config.stocking.clusters = 0;
        assert!(matches!(
            config.validate(),
            Err(crate::RecsError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_history_shorter_than_two_seasons() {
        let mut config = AppConfig::default();
        config.forecast.max_history_days = 10;
        assert!(matches!(
            config.validate(),
            Err(crate::RecsError::Config(_))
        ));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "node_id": "edge-7", "embedding": { "dimension": 8 } }"#)
                .unwrap();
        assert_eq!(config.node_id, "edge-7");
        assert_eq!(config.embedding.dimension, 8);
        assert_eq!(config.embedding.epochs, 5);
        assert_eq!(config.api.http_port, 8080);
    }
}
