//! Two-tower retrieval model.
//!
//! One embedding table per tower (users, items), each with a reserved
//! out-of-vocabulary row. Training fits both tables jointly with an in-batch
//! softmax retrieval loss, optionally plus a squared-error ranking loss on
//! the interaction value, and updates rows with Adagrad. Scoring is the
//! inner product between a user row and every known item row.

use crate::vocab::Vocabulary;
use market_core::config::EmbeddingConfig;
use market_core::types::{Interaction, ItemId, UserId};
use market_core::{RecsError, RecsResult};
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Uniform init range, matching the usual embedding-layer default.
const INIT_SCALE: f32 = 0.05;
const ADAGRAD_INITIAL_ACCUMULATOR: f32 = 0.1;
const ADAGRAD_EPSILON: f32 = 1e-7;
/// Keeps the shuffle stream independent of the init stream.
const SHUFFLE_SEED_OFFSET: u64 = 0x9E37_79B9;
const TOP_K_METRICS: [usize; 5] = [1, 5, 10, 50, 100];

/// One (user, item) pair, with the interaction value when the ranking
/// objective should see it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub user_id: UserId,
    pub item_id: ItemId,
    #[serde(default)]
    pub value: Option<f32>,
}

impl TrainingExample {
    pub fn pair(user_id: UserId, item_id: ItemId) -> Self {
        Self {
            user_id,
            item_id,
            value: None,
        }
    }

    pub fn from_interactions(interactions: &[Interaction], with_values: bool) -> Vec<Self> {
        interactions
            .iter()
            .map(|i| Self {
                user_id: i.user_id,
                item_id: i.item_id,
                value: with_values.then_some(i.value as f32),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub examples: usize,
    pub batches: usize,
    /// Losses of the final epoch.
    pub retrieval_loss: f64,
    pub ranking_loss: Option<f64>,
    pub total_loss: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f32,
}

pub struct TwoTowerModel {
    users: Vocabulary,
    items: Vocabulary,
    user_table: Array2<f32>,
    item_table: Array2<f32>,
    learning_rate: f32,
    seed: u64,
    ranking_objective: bool,
    trained: bool,
}

/// Per-row Adagrad accumulators, one per table.
struct AdagradState {
    user_accum: Array2<f32>,
    item_accum: Array2<f32>,
}

#[derive(Default)]
struct EpochLoss {
    retrieval_sum: f64,
    ranking_sum: f64,
    examples: usize,
    ranked_examples: usize,
}

impl EpochLoss {
    fn retrieval(&self) -> f64 {
        self.retrieval_sum / self.examples.max(1) as f64
    }

    fn ranking(&self) -> Option<f64> {
        (self.ranked_examples > 0).then(|| self.ranking_sum / self.ranked_examples as f64)
    }
}

impl TwoTowerModel {
    /// Build an untrained model over a fixed vocabulary.
    pub fn new(user_ids: &[UserId], item_ids: &[ItemId], config: &EmbeddingConfig) -> Self {
        let users = Vocabulary::new(user_ids);
        let items = Vocabulary::new(item_ids);
        let dim = config.dimension;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let user_table = Array2::from_shape_fn((users.table_rows(), dim), |_| {
            rng.gen_range(-INIT_SCALE..INIT_SCALE)
        });
        let item_table = Array2::from_shape_fn((items.table_rows(), dim), |_| {
            rng.gen_range(-INIT_SCALE..INIT_SCALE)
        });

        Self {
            users,
            items,
            user_table,
            item_table,
            learning_rate: config.learning_rate,
            seed: config.seed,
            ranking_objective: config.ranking_objective,
            trained: false,
        }
    }

    /// Fit both towers. Examples are reshuffled every epoch with a seeded RNG,
    /// so identical inputs and seed give identical tables.
    pub fn train(
        &mut self,
        examples: &[TrainingExample],
        epochs: usize,
        batch_size: usize,
    ) -> RecsResult<TrainingReport> {
        if self.users.is_empty() || self.items.is_empty() {
            return Err(RecsError::InvalidState(
                "cannot train with an empty user or item vocabulary".to_string(),
            ));
        }
        if examples.is_empty() {
            return Err(RecsError::InvalidState(
                "no interactions to train on".to_string(),
            ));
        }
        if epochs == 0 || batch_size == 0 {
            return Err(RecsError::InvalidState(
                "epochs and batch_size must be positive".to_string(),
            ));
        }

        let start = Instant::now();
        let mut indexed: Vec<(usize, usize, Option<f32>)> = examples
            .iter()
            .map(|e| (self.users.row(e.user_id), self.items.row(e.item_id), e.value))
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(SHUFFLE_SEED_OFFSET));
        let mut state = AdagradState {
            user_accum: Array2::from_elem(self.user_table.raw_dim(), ADAGRAD_INITIAL_ACCUMULATOR),
            item_accum: Array2::from_elem(self.item_table.raw_dim(), ADAGRAD_INITIAL_ACCUMULATOR),
        };

        let mut last = EpochLoss::default();
        let mut batches = 0;
        for epoch in 0..epochs {
            indexed.shuffle(&mut rng);
            let mut epoch_loss = EpochLoss::default();

            for batch in indexed.chunks(batch_size) {
                let (retrieval, ranking) = self.step(batch, &mut state);
                epoch_loss.retrieval_sum += retrieval * batch.len() as f64;
                epoch_loss.examples += batch.len();
                if let Some((sum_sq, rated)) = ranking {
                    epoch_loss.ranking_sum += sum_sq;
                    epoch_loss.ranked_examples += rated;
                }
                batches += 1;
            }

            if !epoch_loss.retrieval().is_finite() {
                return Err(RecsError::InvalidState(format!(
                    "training diverged at epoch {}",
                    epoch + 1
                )));
            }
            debug!(
                epoch = epoch + 1,
                retrieval_loss = epoch_loss.retrieval(),
                ranking_loss = ?epoch_loss.ranking(),
                "Epoch complete"
            );
            last = epoch_loss;
        }

        self.trained = true;
        let report = TrainingReport {
            epochs,
            examples: examples.len(),
            batches,
            retrieval_loss: last.retrieval(),
            ranking_loss: last.ranking(),
            total_loss: last.retrieval() + last.ranking().unwrap_or(0.0),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            users = self.users.len(),
            items = self.items.len(),
            examples = report.examples,
            total_loss = report.total_loss,
            duration_ms = report.duration_ms,
            "Two-tower training complete"
        );
        Ok(report)
    }

    /// One optimisation step. Returns the batch retrieval loss and, when
    /// the ranking objective ran, (sum of squared errors, rated count).
    fn step(
        &mut self,
        batch: &[(usize, usize, Option<f32>)],
        state: &mut AdagradState,
    ) -> (f64, Option<(f64, usize)>) {
        let user_rows: Vec<usize> = batch.iter().map(|e| e.0).collect();
        let item_rows: Vec<usize> = batch.iter().map(|e| e.1).collect();

        let u = self.user_table.select(Axis(0), &user_rows);
        let v = self.item_table.select(Axis(0), &item_rows);

        let (retrieval_loss, grad_logits) = in_batch_softmax(&u, &v);
        let mut grad_u = grad_logits.dot(&v);
        let mut grad_v = grad_logits.t().dot(&u);

        let mut ranking = None;
        if self.ranking_objective {
            let rated: Vec<(usize, f32)> = batch
                .iter()
                .enumerate()
                .filter_map(|(k, e)| e.2.map(|y| (k, y)))
                .collect();
            if !rated.is_empty() {
                let n = rated.len() as f32;
                let mut sum_sq = 0.0f64;
                for &(k, target) in &rated {
                    let err = u.row(k).dot(&v.row(k)) - target;
                    sum_sq += (err as f64).powi(2);
                    let scale = 2.0 * err / n;
                    grad_u.row_mut(k).scaled_add(scale, &v.row(k));
                    grad_v.row_mut(k).scaled_add(scale, &u.row(k));
                }
                ranking = Some((sum_sq, rated.len()));
            }
        }

        let lr = self.learning_rate;
        apply_adagrad(&mut self.user_table, &mut state.user_accum, &user_rows, &grad_u, lr);
        apply_adagrad(&mut self.item_table, &mut state.item_accum, &item_rows, &grad_v, lr);

        (retrieval_loss, ranking)
    }

    /// Top-k known items by inner product with the user's embedding. Unknown
    /// users score through the OOV row. Ties go to the earlier vocabulary
    /// entry; `top_k` is clipped to the item vocabulary size.
    pub fn recommend_scored(&self, user_id: UserId, top_k: usize) -> RecsResult<Vec<ScoredItem>> {
        self.ensure_trained()?;

        let query = self.user_table.row(self.users.row(user_id));
        let scores = self.item_table.slice(s![1.., ..]).dot(&query);

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        order.truncate(top_k.min(self.items.len()));

        Ok(order
            .into_iter()
            .filter_map(|pos| {
                self.items.id_at(pos).map(|item_id| ScoredItem {
                    item_id,
                    score: scores[pos],
                })
            })
            .collect())
    }

    pub fn recommend(&self, user_id: UserId, top_k: usize) -> RecsResult<Vec<ItemId>> {
        Ok(self
            .recommend_scored(user_id, top_k)?
            .into_iter()
            .map(|s| s.item_id)
            .collect())
    }

    /// Ranking quality on held-out pairs. Reports the mean in-batch retrieval
    /// loss, factorized top-k accuracy against the full item vocabulary, and
    /// RMSE when the pairs carry values. Read-only.
    pub fn evaluate(
        &self,
        test: &[TrainingExample],
        batch_size: usize,
    ) -> RecsResult<BTreeMap<String, f64>> {
        self.ensure_trained()?;
        if test.is_empty() {
            return Err(RecsError::InvalidState(
                "no evaluation pairs supplied".to_string(),
            ));
        }

        let candidates = self.item_table.slice(s![1.., ..]);
        let mut hits = [0usize; TOP_K_METRICS.len()];
        let mut retrieval_sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut rated = 0usize;

        for batch in test.chunks(batch_size.max(1)) {
            let user_rows: Vec<usize> = batch.iter().map(|e| self.users.row(e.user_id)).collect();
            let item_rows: Vec<usize> = batch.iter().map(|e| self.items.row(e.item_id)).collect();
            let u = self.user_table.select(Axis(0), &user_rows);
            let v = self.item_table.select(Axis(0), &item_rows);

            let (loss, _) = in_batch_softmax(&u, &v);
            retrieval_sum += loss * batch.len() as f64;

            let scores = u.dot(&candidates.t());
            for (k, example) in batch.iter().enumerate() {
                if let Some(target) = example.value {
                    let err = u.row(k).dot(&v.row(k)) - target;
                    sum_sq += (err as f64).powi(2);
                    rated += 1;
                }

                // An out-of-vocabulary target can never be retrieved.
                if !self.items.contains(example.item_id) {
                    continue;
                }
                let target = item_rows[k] - 1;
                let row = scores.row(k);
                let target_score = row[target];
                let rank = row
                    .iter()
                    .enumerate()
                    .filter(|&(j, &s)| s > target_score || (s == target_score && j < target))
                    .count();
                for (slot, &cutoff) in TOP_K_METRICS.iter().enumerate() {
                    if rank < cutoff {
                        hits[slot] += 1;
                    }
                }
            }
        }

        let n = test.len() as f64;
        let retrieval = retrieval_sum / n;
        let mut metrics = BTreeMap::new();
        metrics.insert("retrieval_loss".to_string(), retrieval);
        for (slot, cutoff) in TOP_K_METRICS.iter().enumerate() {
            metrics.insert(
                format!("factorized_top_k/top_{}_categorical_accuracy", cutoff),
                hits[slot] as f64 / n,
            );
        }

        let mut total = retrieval;
        if rated > 0 {
            let mse = sum_sq / rated as f64;
            metrics.insert("root_mean_squared_error".to_string(), mse.sqrt());
            total += mse;
        }
        metrics.insert("loss".to_string(), total);

        Ok(metrics)
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn users(&self) -> &Vocabulary {
        &self.users
    }

    pub fn items(&self) -> &Vocabulary {
        &self.items
    }

    pub fn dimension(&self) -> usize {
        self.user_table.ncols()
    }

    /// Copy of a user's embedding (OOV row for unknown users).
    pub fn user_embedding(&self, user_id: UserId) -> Array1<f32> {
        self.user_table.row(self.users.row(user_id)).to_owned()
    }

    fn ensure_trained(&self) -> RecsResult<()> {
        if self.trained {
            Ok(())
        } else {
            Err(RecsError::model_not_initialized())
        }
    }
}

/// Softmax cross-entropy where each user's positive is its own item and the
/// rest of the batch are negatives. Returns the mean loss and its gradient
/// with respect to the logits.
fn in_batch_softmax(users: &Array2<f32>, items: &Array2<f32>) -> (f64, Array2<f32>) {
    let batch = users.nrows();
    let mut probs = users.dot(&items.t());
    let mut loss = 0.0f64;

    for (i, mut row) in probs.axis_iter_mut(Axis(0)).enumerate() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row /= sum;
        loss -= (row[i].max(f32::MIN_POSITIVE) as f64).ln();
    }

    for i in 0..batch {
        probs[[i, i]] -= 1.0;
    }
    probs /= batch as f32;

    (loss / batch as f64, probs)
}

/// Adagrad update on the rows touched by a batch. Gradients for a row that
/// appears more than once are summed before the update.
fn apply_adagrad(
    table: &mut Array2<f32>,
    accum: &mut Array2<f32>,
    rows: &[usize],
    grads: &Array2<f32>,
    lr: f32,
) {
    let mut summed: BTreeMap<usize, Array1<f32>> = BTreeMap::new();
    for (k, &row) in rows.iter().enumerate() {
        summed
            .entry(row)
            .and_modify(|g| *g += &grads.row(k))
            .or_insert_with(|| grads.row(k).to_owned());
    }

    for (row, grad) in summed {
        for (j, &g) in grad.iter().enumerate() {
            accum[[row, j]] += g * g;
            table[[row, j]] -= lr * g / (accum[[row, j]].sqrt() + ADAGRAD_EPSILON);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            dimension: 16,
            epochs: 10,
            batch_size: 16,
            ranking_objective: false,
            ..Default::default()
        }
    }

    /// Users 1-2 like items 10/20, users 3-4 like items 30/40.
    fn two_communities() -> Vec<TrainingExample> {
        let mut examples = Vec::new();
        for _ in 0..25 {
            for user in [1, 2] {
                examples.push(TrainingExample::pair(user, 10));
                examples.push(TrainingExample::pair(user, 20));
            }
            for user in [3, 4] {
                examples.push(TrainingExample::pair(user, 30));
                examples.push(TrainingExample::pair(user, 40));
            }
        }
        examples
    }

    fn trained_model() -> TwoTowerModel {
        let cfg = config();
        let mut model = TwoTowerModel::new(&[1, 2, 3, 4], &[10, 20, 30, 40], &cfg);
        model
            .train(&two_communities(), cfg.epochs, cfg.batch_size)
            .unwrap();
        model
    }

    #[test]
    fn test_recommend_before_train_is_invalid_state() {
        let model = TwoTowerModel::new(&[1], &[10], &config());
        assert!(matches!(
            model.recommend(1, 5),
            Err(RecsError::InvalidState(_))
        ));
        assert!(model.evaluate(&[TrainingExample::pair(1, 10)], 8).is_err());
    }

    #[test]
    fn test_empty_training_set_leaves_model_untrained() {
        let mut model = TwoTowerModel::new(&[1], &[10], &config());
        assert!(matches!(
            model.train(&[], 1, 8),
            Err(RecsError::InvalidState(_))
        ));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_empty_vocabulary_rejected() {
        let mut model = TwoTowerModel::new(&[], &[10], &config());
        assert!(model.train(&[TrainingExample::pair(1, 10)], 1, 8).is_err());
    }

    #[test]
    fn test_top_k_clipped_to_vocabulary() {
        let model = trained_model();
        let recs = model.recommend(1, 100).unwrap();
        assert_eq!(recs.len(), 4);
        let unique: HashSet<_> = recs.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_learns_community_structure() {
        let model = trained_model();
        let top: HashSet<_> = model.recommend(1, 2).unwrap().into_iter().collect();
        assert_eq!(top, HashSet::from([10, 20]));
        let top: HashSet<_> = model.recommend(4, 2).unwrap().into_iter().collect();
        assert_eq!(top, HashSet::from([30, 40]));
    }

    #[test]
    fn test_scores_are_descending() {
        let model = trained_model();
        let scored = model.recommend_scored(3, 4).unwrap();
        for pair in scored.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_unknown_users_share_the_oov_embedding() {
        let model = trained_model();
        assert_eq!(model.user_embedding(900), model.user_embedding(901));
        assert_eq!(model.recommend(900, 4).unwrap(), model.recommend(901, 4).unwrap());
    }

    #[test]
    fn test_same_seed_same_top_k_set() {
        let a: HashSet<_> = trained_model().recommend(2, 2).unwrap().into_iter().collect();
        let b: HashSet<_> = trained_model().recommend(2, 2).unwrap().into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ranking_objective_reports_loss() {
        let cfg = EmbeddingConfig {
            ranking_objective: true,
            ..config()
        };
        let examples: Vec<_> = two_communities()
            .into_iter()
            .map(|e| TrainingExample {
                value: Some(1.0),
                ..e
            })
            .collect();
        let mut model = TwoTowerModel::new(&[1, 2, 3, 4], &[10, 20, 30, 40], &cfg);
        let report = model.train(&examples, 3, 16).unwrap();
        let ranking = report.ranking_loss.unwrap();
        assert!(ranking.is_finite());
        assert!((report.total_loss - (report.retrieval_loss + ranking)).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_reports_metrics_without_mutation() {
        let model = trained_model();
        let before = model.recommend_scored(1, 4).unwrap();

        let test = vec![
            TrainingExample {
                user_id: 1,
                item_id: 10,
                value: Some(1.0),
            },
            TrainingExample::pair(3, 30),
            TrainingExample::pair(3, 999),
        ];
        let metrics = model.evaluate(&test, 2).unwrap();

        let top_100 = metrics["factorized_top_k/top_100_categorical_accuracy"];
        // The out-of-vocabulary target is a guaranteed miss.
        assert!((top_100 - 2.0 / 3.0).abs() < 1e-9);
        assert!(metrics.contains_key("root_mean_squared_error"));
        assert!(metrics["loss"].is_finite());
        assert_eq!(model.recommend_scored(1, 4).unwrap(), before);
    }

    #[test]
    fn test_from_interactions_controls_values() {
        use chrono::Utc;
        use market_core::types::InteractionType;

        let log = vec![Interaction {
            user_id: 1,
            item_id: 2,
            interaction_type: InteractionType::Purchase,
            value: 3.0,
            timestamp: Utc::now(),
            location: None,
        }];
        assert_eq!(TrainingExample::from_interactions(&log, true)[0].value, Some(3.0));
        assert_eq!(TrainingExample::from_interactions(&log, false)[0].value, None);
    }
}
