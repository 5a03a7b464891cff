// ============================================================
// Layer 3 — Sample Records
// ============================================================
// Framework-free records passed between the data layer and
// the batchers / validator. Pixels are stored as a flat CHW
// f32 buffer (3 × size × size), already normalised.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One labelled face image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceItem {
    pub pixels: Vec<f32>,
    pub label:  usize,
}

/// One anchor / positive / negative image triple.
#[derive(Debug, Clone)]
pub struct TripletItem {
    pub anchor:   Vec<f32>,
    pub positive: Vec<f32>,
    pub negative: Vec<f32>,
}

/// A verification pair: two slots of `ValidationSet::images` and
/// whether they show the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPair {
    pub left:  usize,
    pub right: usize,
    pub same:  bool,
}

/// Fixed held-out pairs, drawn once when the Trainer is built.
/// An image shared by several pairs is stored once.
#[derive(Debug, Clone, Default)]
pub struct ValidationSet {
    pub images: Vec<Vec<f32>>,
    pub pairs:  Vec<ValidationPair>,
}

impl ValidationSet {
    pub fn new(images: Vec<Vec<f32>>, pairs: Vec<ValidationPair>) -> Self {
        Self { images, pairs }
    }

    /// Build a set from `(left, right, same)` source indices. `fetch`
    /// runs once per distinct source index, in first-use order.
    pub fn gather<E>(
        pairs:     impl IntoIterator<Item = (usize, usize, bool)>,
        mut fetch: impl FnMut(usize) -> Result<Vec<f32>, E>,
    ) -> Result<Self, E> {
        let mut slots  = HashMap::new();
        let mut images = Vec::new();
        let mut out    = Vec::new();

        for (left, right, same) in pairs {
            let mut slot_of = |source: usize| -> Result<usize, E> {
                if let Some(&slot) = slots.get(&source) {
                    return Ok(slot);
                }
                images.push(fetch(source)?);
                slots.insert(source, images.len() - 1);
                Ok(images.len() - 1)
            };
            let left  = slot_of(left)?;
            let right = slot_of(right)?;
            out.push(ValidationPair { left, right, same });
        }
        Ok(Self { images, pairs: out })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.pairs.iter().filter(|p| p.same).count()
    }
}
