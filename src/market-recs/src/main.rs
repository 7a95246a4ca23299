//! Market Recs: product, vendor and stocking recommendations for a
//! marketplace, served over HTTP.
//!
//! Main entry point that loads data, kicks off the first training run and
//! starts the server.

use clap::Parser;
use market_api::{ApiServer, Recommender};
use market_core::config::AppConfig;
use market_embedding::EmbeddingEngine;
use market_stocking::StockingPlanner;
use market_store::{demo_fixture, Fixture, InMemoryStore, StaticWarehouseService};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Used when `RUST_LOG` is unset. Covers the binary and every library crate.
const DEFAULT_LOG_FILTER: &str = "market_recs=info,market_api=info,market_embedding=info,\
market_stocking=info,market_store=info,market_filtering=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "market-recs")]
#[command(about = "Marketplace recommendation and stocking engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "MARKET_RECS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "MARKET_RECS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// JSON fixture with vendors, items and interactions
    #[arg(long, env = "MARKET_RECS__STORE__FIXTURE_PATH")]
    fixtures: Option<String>,

    /// Load the built-in demo catalog at startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Do not train the embedding model at startup
    #[arg(long, default_value_t = false)]
    skip_training: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Market Recs starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(path) = cli.fixtures {
        config.store.fixture_path = Some(path);
    }
    if cli.seed_demo {
        config.store.seed_demo = true;
    }
    if cli.skip_training {
        config.embedding.train_on_startup = false;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        dimension = config.embedding.dimension,
        clusters = config.stocking.clusters,
        warehouses = config.warehouses.len(),
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &config.store.fixture_path {
        let summary = store.apply_fixture(Fixture::from_path(path)?)?;
        info!(
            path = %path,
            items = summary.items,
            interactions = summary.interactions,
            "Fixture loaded"
        );
    }
    if config.store.seed_demo {
        store.apply_fixture(demo_fixture())?;
        info!("Demo data seeded");
    }

    let warehouses = Arc::new(StaticWarehouseService::new(config.warehouses.clone()));
    let planner = StockingPlanner::new(
        store.clone(),
        warehouses,
        &config.stocking,
        &config.forecast,
    );
    let engine = Arc::new(EmbeddingEngine::new(&config.embedding));
    let recommender = Arc::new(Recommender::new(
        store.clone(),
        store.clone(),
        store.clone(),
        engine,
        planner,
    ));

    if config.embedding.train_on_startup {
        match recommender.spawn_training() {
            Ok(worker) => {
                tokio::spawn(async move {
                    match worker.await {
                        Ok(Ok(report)) => info!(
                            examples = report.examples,
                            loss = report.total_loss,
                            "Initial training complete"
                        ),
                        Ok(Err(e)) => warn!(
                            error = %e,
                            "Initial training skipped, embedding recommendations unavailable until retrained"
                        ),
                        Err(e) => error!(error = %e, "Initial training worker aborted"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "Initial training not started"),
        }
    } else {
        info!("Startup training disabled");
    }

    let api_server = ApiServer::new(config.clone(), recommender, store);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Market Recs is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await?;

    Ok(())
}
