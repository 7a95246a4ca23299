//! Id-to-row lookup for embedding tables.

use std::collections::HashMap;

/// Row reserved for ids outside the vocabulary.
pub const OOV_ROW: usize = 0;

/// Bijective map from ids to embedding rows. Row 0 is the out-of-vocabulary
/// slot; known ids occupy rows 1..=len in insertion order. Fixed at
/// construction: ids seen later always resolve to the OOV row.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    ids: Vec<i64>,
    index: HashMap<i64, usize>,
}

impl Vocabulary {
    /// Build from ids; repeated ids keep their first position.
    pub fn new(ids: &[i64]) -> Self {
        let mut unique = Vec::with_capacity(ids.len());
        let mut index = HashMap::with_capacity(ids.len());
        for &id in ids {
            if !index.contains_key(&id) {
                index.insert(id, unique.len());
                unique.push(id);
            }
        }
        Self { ids: unique, index }
    }

    /// Number of known ids, excluding the OOV slot.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rows needed for a table over this vocabulary, OOV included.
    pub fn table_rows(&self) -> usize {
        self.ids.len() + 1
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn row(&self, id: i64) -> usize {
        self.index.get(&id).map(|pos| pos + 1).unwrap_or(OOV_ROW)
    }

    /// Id at the given insertion position (row - 1).
    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.get(position).copied()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }
}
