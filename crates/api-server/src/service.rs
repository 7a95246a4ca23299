//! Request-facing facade over the engine crates. Handlers call into a
//! shared `Recommender`; it reads collaborators fresh on every call.

use market_core::store::{CatalogStore, InteractionStore, VendorStore};
use market_core::types::{Item, ItemId, Strategy, UserId, Vendor, VendorId};
use market_core::{RecsError, RecsResult};
use market_embedding::{EmbeddingEngine, TrainingExample, TrainingReport};
use market_filtering::{
    direct_items, recommend_by_content, recommend_by_item, recommend_by_user, recommend_hybrid,
    recommend_vendors,
};
use market_stocking::{ProductDemand, StockingPlan, StockingPlanner};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedItem {
    #[serde(flatten)]
    pub item: Item,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

pub struct Recommender {
    interactions: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CatalogStore>,
    vendors: Arc<dyn VendorStore>,
    engine: Arc<EmbeddingEngine>,
    planner: StockingPlanner,
}

impl Recommender {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CatalogStore>,
        vendors: Arc<dyn VendorStore>,
        engine: Arc<EmbeddingEngine>,
        planner: StockingPlanner,
    ) -> Self {
        Self {
            interactions,
            catalog,
            vendors,
            engine,
            planner,
        }
    }

    pub fn engine(&self) -> &Arc<EmbeddingEngine> {
        &self.engine
    }

    /// Ranked items for `user_id`. An empty vector means "no results".
    /// `top_k` only applies to the embedding strategy.
    pub fn recommend(
        &self,
        strategy: Strategy,
        user_id: UserId,
        top_k: Option<usize>,
    ) -> RecsResult<Vec<RecommendedItem>> {
        if strategy == Strategy::Embedding {
            let k = top_k.unwrap_or(self.engine.config().default_top_k);
            let scored = self.engine.recommend(user_id, k)?;
            let scores: HashMap<ItemId, f32> =
                scored.iter().map(|s| (s.item_id, s.score)).collect();
            let ids: Vec<ItemId> = scored.iter().map(|s| s.item_id).collect();
            return Ok(self
                .catalog
                .get_items_by_ids(&ids)?
                .into_iter()
                .map(|item| RecommendedItem {
                    score: scores.get(&item.id).copied(),
                    item,
                })
                .collect());
        }

        let log = self.interactions.list_interactions()?;
        let items = match strategy {
            Strategy::Direct => self.resolve(&direct_items(user_id, &log))?,
            Strategy::UserBased => self.resolve(&recommend_by_user(user_id, &log))?,
            Strategy::ItemBased => self.resolve(&recommend_by_item(user_id, &log))?,
            Strategy::ContentBased => {
                recommend_by_content(user_id, &log, &self.catalog.list_items()?)
            }
            Strategy::Hybrid => recommend_hybrid(user_id, &log, &self.catalog.list_items()?),
            Strategy::Embedding => Vec::new(),
        };

        debug!(
            user_id,
            strategy = strategy.as_str(),
            count = items.len(),
            "Recommendations computed"
        );
        Ok(items
            .into_iter()
            .map(|item| RecommendedItem { item, score: None })
            .collect())
    }

    fn resolve(&self, ids: &[ItemId]) -> RecsResult<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.catalog.get_items_by_ids(ids)
    }

    pub fn recommend_vendors(&self, user_id: UserId) -> RecsResult<Vec<Vendor>> {
        let log = self.interactions.list_interactions()?;
        let touched = direct_items(user_id, &log);
        if touched.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.catalog.get_items_by_ids(&touched)?;
        let vendor_ids: Vec<VendorId> = recommend_vendors(user_id, &log, &items);
        self.vendors.get_vendors_by_ids(&vendor_ids)
    }

    pub fn plan_stocking(&self, seller_id: VendorId) -> RecsResult<StockingPlan> {
        self.planner.plan_stocking(seller_id)
    }

    pub fn forecast_seller_demand(&self, seller_id: VendorId) -> RecsResult<Vec<ProductDemand>> {
        self.planner.forecast_seller_demand(seller_id)
    }

    /// Claim the training slot now and run `train` on a blocking worker.
    /// Fails with `InvalidState` when a run is already claimed or active.
    pub fn spawn_training(self: &Arc<Self>) -> RecsResult<JoinHandle<RecsResult<TrainingReport>>> {
        self.engine.reserve_training()?;
        let recommender = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || {
            let _slot = ReservedSlot(recommender.engine.clone());
            recommender.train()
        }))
    }

    /// Pull the current users, items and interactions and retrain. Blocking.
    pub fn train(&self) -> RecsResult<TrainingReport> {
        let collected = self
            .interactions
            .list_distinct_user_ids()
            .and_then(|users| Ok((users, self.interactions.list_item_ids()?)))
            .and_then(|(users, items)| Ok((users, items, self.interactions.list_interactions()?)));

        let (users, items, log) = match collected {
            Ok(data) => data,
            Err(e) => {
                self.engine.mark_failed(e.to_string());
                return Err(e);
            }
        };

        let examples =
            TrainingExample::from_interactions(&log, self.engine.config().ranking_objective);
        info!(
            users = users.len(),
            items = items.len(),
            examples = examples.len(),
            "Collected training data"
        );
        self.engine.retrain(&users, &items, &examples)
    }

    /// Evaluate the serving model. Without explicit examples the current
    /// interaction log is used.
    pub fn evaluate(
        &self,
        examples: Vec<TrainingExample>,
        batch_size: Option<usize>,
    ) -> RecsResult<BTreeMap<String, f64>> {
        let examples = if examples.is_empty() {
            TrainingExample::from_interactions(
                &self.interactions.list_interactions()?,
                self.engine.config().ranking_objective,
            )
        } else {
            examples
        };
        if examples.is_empty() {
            return Err(RecsError::Validation(
                "no examples to evaluate against".to_string(),
            ));
        }
        let batch_size = batch_size.unwrap_or(self.engine.config().batch_size);
        self.engine.evaluate(&examples, batch_size)
    }
}

/// Frees the engine's training slot when the worker finishes or unwinds.
struct ReservedSlot(Arc<EmbeddingEngine>);

impl Drop for ReservedSlot {
    fn drop(&mut self) {
        self.0.release_training();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::config::AppConfig;
    use market_store::{demo_fixture, InMemoryStore, StaticWarehouseService};

    fn recommender() -> Recommender {
        let config = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        store.apply_fixture(demo_fixture()).unwrap();
        let planner = StockingPlanner::new(
            store.clone(),
            Arc::new(StaticWarehouseService::new(config.warehouses.clone())),
            &config.stocking,
            &config.forecast,
        );
        let engine = Arc::new(EmbeddingEngine::new(&config.embedding));
        Recommender::new(store.clone(), store.clone(), store, engine, planner)
    }

    fn ids(items: &[RecommendedItem]) -> Vec<ItemId> {
        items.iter().map(|r| r.item.id).collect()
    }

    #[test]
    fn test_direct_and_collaborative() {
        let recs = recommender();
        assert_eq!(ids(&recs.recommend(Strategy::Direct, 1, None).unwrap()), vec![1, 2]);
        // User 3 shares item 1 with user 1, who also bought item 2.
        let by_user = ids(&recs.recommend(Strategy::UserBased, 3, None).unwrap());
        assert!(by_user.contains(&2));
        assert!(recs.recommend(Strategy::Hybrid, 42, None).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_requires_training() {
        let recs = recommender();
        assert!(matches!(
            recs.recommend(Strategy::Embedding, 1, Some(2)),
            Err(RecsError::InvalidState(_))
        ));

        recs.train().unwrap();
        let scored = recs.recommend(Strategy::Embedding, 1, Some(10)).unwrap();
        assert_eq!(scored.len(), 3);
        assert!(scored.iter().all(|r| r.score.is_some()));
    }

    /// Interaction store whose user listing waits on a gate the test holds.
    struct GatedStore {
        inner: Arc<InMemoryStore>,
        gate: std::sync::Mutex<()>,
    }

    impl InteractionStore for GatedStore {
        fn list_distinct_user_ids(&self) -> RecsResult<Vec<UserId>> {
            let _open = self.gate.lock().unwrap();
            self.inner.list_distinct_user_ids()
        }

        fn list_item_ids(&self) -> RecsResult<Vec<ItemId>> {
            self.inner.list_item_ids()
        }

        fn list_interactions(&self) -> RecsResult<Vec<market_core::types::Interaction>> {
            self.inner.list_interactions()
        }

        fn list_interactions_for_items_owned_by(
            &self,
            seller_id: VendorId,
        ) -> RecsResult<Vec<market_core::types::Interaction>> {
            self.inner.list_interactions_for_items_owned_by(seller_id)
        }
    }

    #[tokio::test]
    async fn test_spawned_training_holds_slot_until_done() {
        let config = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        store.apply_fixture(demo_fixture()).unwrap();
        let gated = Arc::new(GatedStore {
            inner: store.clone(),
            gate: std::sync::Mutex::new(()),
        });
        let planner = StockingPlanner::new(
            store.clone(),
            Arc::new(StaticWarehouseService::new(config.warehouses.clone())),
            &config.stocking,
            &config.forecast,
        );
        let engine = Arc::new(EmbeddingEngine::new(&config.embedding));
        let recs = Arc::new(Recommender::new(
            gated.clone(),
            store.clone(),
            store,
            engine,
            planner,
        ));

        let closed = gated.gate.lock().unwrap();
        let handle = recs.spawn_training().unwrap();
        assert!(matches!(
            recs.spawn_training(),
            Err(RecsError::InvalidState(_))
        ));
        drop(closed);

        handle.await.unwrap().unwrap();
        assert!(!recs.engine().is_training_reserved());
        recs.spawn_training().unwrap().await.unwrap().unwrap();
        assert_eq!(recs.engine().model_info().unwrap().version, 2);
    }

    #[test]
    fn test_vendors_for_user() {
        let recs = recommender();
        let vendors: Vec<_> = recs
            .recommend_vendors(1)
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(vendors, vec![1, 2]);
        assert!(recs.recommend_vendors(42).unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_defaults_to_log() {
        let recs = recommender();
        recs.train().unwrap();
        let metrics = recs.evaluate(Vec::new(), None).unwrap();
        assert!(metrics.contains_key("factorized_top_k/top_1_categorical_accuracy"));
    }
}
