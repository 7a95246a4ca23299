//! Rule-based recommendation strategies: collaborative filtering over the
//! interaction graph, content matching on the catalog, and the hybrid merge.
//!
//! Every function here is a pure read of its inputs.

pub mod content;
pub mod hybrid;
pub mod similarity;

pub use content::recommend_by_content;
pub use hybrid::{merge_dedup, recommend_hybrid};
pub use similarity::{
    direct_items, recommend_by_item, recommend_by_user, recommend_vendors, InteractionGraph,
};
