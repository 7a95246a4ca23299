//! Embedding engine: owns the live retrieval model and swaps in retrained
//! versions without blocking readers.

use crate::model::{ScoredItem, TrainingExample, TrainingReport, TwoTowerModel};
use chrono::{DateTime, Utc};
use market_core::config::EmbeddingConfig;
use market_core::types::{ItemId, UserId};
use market_core::{RecsError, RecsResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of the most recent training run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingStatus {
    Idle,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        version: u64,
        finished_at: DateTime<Utc>,
        report: TrainingReport,
    },
    Failed {
        finished_at: DateTime<Utc>,
        reason: String,
    },
}

/// Summary of the model currently serving.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub users: usize,
    pub items: usize,
    pub dimension: usize,
}

struct LiveModel {
    model: Arc<TwoTowerModel>,
    info: ModelInfo,
}

/// Thread-safe handle around the two-tower model.
///
/// Readers clone the current `Arc` under a short read lock and score against
/// it lock-free, so an in-flight query keeps the tables it started with.
/// Retraining builds a fresh model off to the side and replaces the `Arc` in
/// one write; a failed run leaves the previous model serving.
pub struct EmbeddingEngine {
    live: RwLock<Option<LiveModel>>,
    status: RwLock<TrainingStatus>,
    training: Mutex<()>,
    /// Set while a deferred run is queued or running on a worker.
    reserved: AtomicBool,
    config: EmbeddingConfig,
}

impl EmbeddingEngine {
    pub fn new(config: &EmbeddingConfig) -> Self {
        info!(
            dimension = config.dimension,
            epochs = config.epochs,
            batch_size = config.batch_size,
            "Embedding engine initialized (no model yet)"
        );
        Self {
            live: RwLock::new(None),
            status: RwLock::new(TrainingStatus::Idle),
            training: Mutex::new(()),
            reserved: AtomicBool::new(false),
            config: config.clone(),
        }
    }

    /// Build a model over the given vocabulary, train it, and swap it in.
    ///
    /// Blocking and potentially long; run it on a worker thread. Only one
    /// run at a time: a concurrent call fails with `InvalidState`.
    pub fn retrain(
        &self,
        user_ids: &[UserId],
        item_ids: &[ItemId],
        examples: &[TrainingExample],
    ) -> RecsResult<TrainingReport> {
        let _guard = self.training.try_lock().ok_or_else(|| {
            RecsError::InvalidState("a training run is already in progress".to_string())
        })?;

        *self.status.write() = TrainingStatus::Running {
            started_at: Utc::now(),
        };
        info!(
            users = user_ids.len(),
            items = item_ids.len(),
            examples = examples.len(),
            "Retraining two-tower model"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut model = TwoTowerModel::new(user_ids, item_ids, &self.config);
            let report = model.train(examples, self.config.epochs, self.config.batch_size)?;
            Ok::<_, RecsError>((model, report))
        }))
        .unwrap_or_else(|_| {
            Err(RecsError::InvalidState(
                "training worker panicked".to_string(),
            ))
        });

        match outcome {
            Ok((model, report)) => {
                let version = self.swap_in(model);
                *self.status.write() = TrainingStatus::Succeeded {
                    version,
                    finished_at: Utc::now(),
                    report: report.clone(),
                };
                info!(version, "Model swap complete");
                Ok(report)
            }
            Err(e) => {
                let keeps_serving = self.live.read().is_some();
                warn!(error = %e, keeps_serving, "Training failed, keeping previous model");
                *self.status.write() = TrainingStatus::Failed {
                    finished_at: Utc::now(),
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    /// Claim the training slot for a run that will start later on another
    /// thread. Fails with `InvalidState` while a claimed or direct run is
    /// active. Pair with `release_training` once the run ends.
    pub fn reserve_training(&self) -> RecsResult<()> {
        let busy = || {
            RecsError::InvalidState("a training run is already in progress".to_string())
        };
        self.reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| busy())?;
        if self.training.is_locked() {
            self.release_training();
            return Err(busy());
        }
        Ok(())
    }

    pub fn release_training(&self) {
        self.reserved.store(false, Ordering::Release);
    }

    pub fn is_training_reserved(&self) -> bool {
        self.reserved.load(Ordering::Acquire)
    }

    fn swap_in(&self, model: TwoTowerModel) -> u64 {
        let mut live = self.live.write();
        let version = live.as_ref().map(|m| m.info.version + 1).unwrap_or(1);
        let info = ModelInfo {
            version,
            trained_at: Utc::now(),
            users: model.users().len(),
            items: model.items().len(),
            dimension: model.dimension(),
        };
        *live = Some(LiveModel {
            model: Arc::new(model),
            info,
        });
        version
    }

    /// The model currently serving, or `InvalidState` before the first
    /// successful training run.
    pub fn current(&self) -> RecsResult<Arc<TwoTowerModel>> {
        self.live
            .read()
            .as_ref()
            .map(|live| live.model.clone())
            .ok_or_else(RecsError::model_not_initialized)
    }

    pub fn recommend(&self, user_id: UserId, top_k: usize) -> RecsResult<Vec<ScoredItem>> {
        self.current()?.recommend_scored(user_id, top_k)
    }

    pub fn evaluate(
        &self,
        test: &[TrainingExample],
        batch_size: usize,
    ) -> RecsResult<BTreeMap<String, f64>> {
        self.current()?.evaluate(test, batch_size)
    }

    pub fn status(&self) -> TrainingStatus {
        self.status.read().clone()
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.live.read().as_ref().map(|live| live.info.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.live.read().is_some()
    }

    /// Record a failure that happened outside `retrain`, e.g. while
    /// collecting training data.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Training could not start");
        *self.status.write() = TrainingStatus::Failed {
            finished_at: Utc::now(),
            reason,
        };
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            dimension: 8,
            epochs: 2,
            batch_size: 4,
            ..Default::default()
        }
    }

    fn examples() -> Vec<TrainingExample> {
        vec![
            TrainingExample::pair(1, 10),
            TrainingExample::pair(1, 20),
            TrainingExample::pair(2, 10),
            TrainingExample::pair(3, 30),
        ]
    }

    #[test]
    fn test_not_ready_before_training() {
        let engine = EmbeddingEngine::new(&config());
        assert!(!engine.is_ready());
        assert!(matches!(engine.status(), TrainingStatus::Idle));
        assert!(matches!(
            engine.recommend(1, 3),
            Err(RecsError::InvalidState(_))
        ));
    }

    #[test]
    fn test_retrain_swaps_and_bumps_version() {
        let engine = EmbeddingEngine::new(&config());
        engine.retrain(&[1, 2, 3], &[10, 20, 30], &examples()).unwrap();
        assert_eq!(engine.model_info().unwrap().version, 1);
        assert_eq!(engine.recommend(1, 10).unwrap().len(), 3);

        engine.retrain(&[1, 2, 3], &[10, 20, 30, 40], &examples()).unwrap();
        let info = engine.model_info().unwrap();
        assert_eq!(info.version, 2);
        assert_eq!(info.items, 4);
        assert!(matches!(
            engine.status(),
            TrainingStatus::Succeeded { version: 2, .. }
        ));
    }

    #[test]
    fn test_failed_retrain_keeps_previous_model() {
        let engine = EmbeddingEngine::new(&config());
        engine.retrain(&[1, 2, 3], &[10, 20, 30], &examples()).unwrap();
        let before = engine.recommend(1, 3).unwrap();

        assert!(engine.retrain(&[1], &[10], &[]).is_err());
        assert!(matches!(engine.status(), TrainingStatus::Failed { .. }));
        assert_eq!(engine.model_info().unwrap().version, 1);
        assert_eq!(engine.recommend(1, 3).unwrap(), before);
    }

    #[test]
    fn test_failed_first_training_stays_uninitialized() {
        let engine = EmbeddingEngine::new(&config());
        assert!(engine.retrain(&[], &[], &[]).is_err());
        assert!(!engine.is_ready());
    }

    #[test]
    fn test_readers_keep_their_snapshot_across_swap() {
        let engine = Arc::new(EmbeddingEngine::new(&config()));
        engine.retrain(&[1, 2, 3], &[10, 20, 30], &examples()).unwrap();

        let snapshot = engine.current().unwrap();
        let expected = snapshot.recommend(1, 3).unwrap();

        let writer = {
            let engine = engine.clone();
            thread::spawn(move || {
                engine
                    .retrain(&[1, 2, 3], &[10, 20, 30, 40, 50], &examples())
                    .unwrap();
            })
        };
        writer.join().unwrap();

        assert_eq!(snapshot.items().len(), 3);
        assert_eq!(snapshot.recommend(1, 3).unwrap(), expected);
        assert_eq!(engine.current().unwrap().items().len(), 5);
    }

    #[test]
    fn test_training_slot_is_exclusive_until_released() {
        let engine = EmbeddingEngine::new(&config());
        engine.reserve_training().unwrap();
        assert!(matches!(
            engine.reserve_training(),
            Err(RecsError::InvalidState(_))
        ));

        // The reserving worker still trains normally.
        engine.retrain(&[1, 2, 3], &[10, 20, 30], &examples()).unwrap();
        engine.release_training();
        assert!(!engine.is_training_reserved());
        assert!(engine.reserve_training().is_ok());
    }

    #[test]
    fn test_reservation_refused_during_direct_run() {
        let engine = EmbeddingEngine::new(&config());
        let _running = engine.training.lock();
        assert!(engine.reserve_training().is_err());
        assert!(!engine.is_training_reserved());
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let engine = EmbeddingEngine::new(&config());
        engine.mark_failed("store unavailable");
        let json = serde_json::to_value(engine.status()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "store unavailable");
    }
}
