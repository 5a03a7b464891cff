// ============================================================
// Layer 4 — In-Memory Face Dataset
// ============================================================
// Implements Burn's Dataset trait over already decoded images.
// The samples sit behind an Arc so that the Trainer, the
// DataLoader and the triplet miner can all hold the same
// dataset without copying pixel buffers.

use burn::data::dataset::Dataset;
use std::sync::Arc;

use crate::domain::sample::FaceItem;

#[derive(Debug, Clone)]
pub struct FaceDataset {
    items: Arc<Vec<FaceItem>>,
}

impl FaceDataset {
    pub fn new(items: Vec<FaceItem>) -> Self {
        Self { items: Arc::new(items) }
    }

    /// Number of distinct labels present (max label + 1).
    pub fn class_count(&self) -> usize {
        self.items.iter().map(|s| s.label + 1).max().unwrap_or(0)
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|s| s.label).collect()
    }
}

impl Dataset<FaceItem> for FaceDataset {
    fn get(&self, index: usize) -> Option<FaceItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
