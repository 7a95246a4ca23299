//! API server: HTTP routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::service::Recommender;
use axum::routing::{get, post};
use axum::Router;
use market_core::config::AppConfig;
use market_store::InMemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full route table over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Product recommendations
        .route("/v1/recommendations/:user_id", get(rest::handle_direct))
        .route(
            "/v1/recommendations/collaborative/:user_id",
            get(rest::handle_user_based),
        )
        .route(
            "/v1/recommendations/item-based/:user_id",
            get(rest::handle_item_based),
        )
        .route(
            "/v1/recommendations/content/:user_id",
            get(rest::handle_content_based),
        )
        .route(
            "/v1/recommendations/hybrid/:user_id",
            get(rest::handle_hybrid),
        )
        .route(
            "/v1/recommendations/embedding/:user_id",
            get(rest::handle_embedding),
        )
        .route(
            "/v1/vendor-recommendations/:user_id",
            get(rest::handle_vendors),
        )
        // Stocking & demand
        .route("/v1/stocking/:seller_id", get(rest::handle_stocking))
        .route("/v1/demand/:seller_id", get(rest::handle_demand))
        // Model lifecycle
        .route("/v1/model/train", post(rest::handle_train))
        .route("/v1/model/status", get(rest::handle_model_status))
        .route("/v1/model/evaluate", post(rest::handle_evaluate))
        // Data
        .route("/v1/interactions", post(rest::handle_record_interaction))
        .route("/v1/dev/seed", post(rest::handle_seed_demo))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    recommender: Arc<Recommender>,
    store: Arc<InMemoryStore>,
}

impl ApiServer {
    pub fn new(config: AppConfig, recommender: Arc<Recommender>, store: Arc<InMemoryStore>) -> Self {
        Self {
            config,
            recommender,
            store,
        }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            recommender: self.recommender.clone(),
            store: self.store.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder and serve it on the metrics port.
    /// Must be called from within the tokio runtime.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
