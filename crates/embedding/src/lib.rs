pub mod engine;
pub mod model;
pub mod vocab;

pub use engine::{EmbeddingEngine, ModelInfo, TrainingStatus};
pub use model::{ScoredItem, TrainingExample, TrainingReport, TwoTowerModel};
pub use vocab::Vocabulary;
