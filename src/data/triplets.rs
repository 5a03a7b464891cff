// ============================================================
// Layer 4 — Triplet Mining
// ============================================================
// Before every triplet epoch the current model embeds a pool of
// training images and (anchor, positive, negative) index triples
// are selected from those embeddings:
//
//   for every anchor a and every later positive p of a's class
//       d_ap = ‖e_a − e_p‖²
//       candidates n (other class) with
//           d_ap < d_an < d_ap + alpha         (semi-hard)
//       pick one candidate at random
//
// The resulting triples are shuffled and capped at
// `max_triplets`. An empty result is legal: the Trainer then
// skips the optimisation phase of that epoch.
//
// Reference: Schroff et al. (2015) FaceNet §3.2

use anyhow::{anyhow, Result};
use burn::{data::dataset::Dataset, prelude::*};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::data::batcher::pixels_to_tensor;
use crate::domain::sample::{FaceItem, TripletItem};
use crate::ml::model::FaceModel;

#[derive(Debug, Clone, Copy)]
pub struct MiningConfig {
    /// Semi-hard window width added to d(a,p)
    pub alpha:        f64,
    /// Cap on the mined triples; at most twice as many images are embedded
    pub max_triplets: usize,
    /// Images per embedding batch while mining
    pub batch_size:   usize,
    pub image_size:   usize,
    /// Base seed; mining round r uses `seed + r`
    pub seed:         u64,
}

/// Index-based view of a face dataset as triplets.
#[derive(Debug, Clone)]
pub struct TripletDataset<D> {
    source:   D,
    triplets: Arc<Vec<[usize; 3]>>,
}

impl<D: Dataset<FaceItem>> TripletDataset<D> {
    pub fn new(source: D, triplets: Vec<[usize; 3]>) -> Self {
        Self { source, triplets: Arc::new(triplets) }
    }
}

impl<D: Dataset<FaceItem>> Dataset<TripletItem> for TripletDataset<D> {
    fn get(&self, index: usize) -> Option<TripletItem> {
        let [a, p, n] = *self.triplets.get(index)?;
        Some(TripletItem {
            anchor:   self.source.get(a)?.pixels,
            positive: self.source.get(p)?.pixels,
            negative: self.source.get(n)?.pixels,
        })
    }

    fn len(&self) -> usize {
        self.triplets.len()
    }
}

/// Re-mines triplets on demand. Each call uses a fresh seed derived
/// from the configured one, so consecutive epochs see different pools.
#[derive(Debug)]
pub struct TripletMiner {
    config: MiningConfig,
    round:  AtomicU64,
}

impl TripletMiner {
    pub fn new(config: MiningConfig) -> Self {
        Self { config, round: AtomicU64::new(0) }
    }

    pub fn mine<B: Backend, D: Dataset<FaceItem>>(
        &self,
        model:   &FaceModel<B>,
        dataset: D,
        device:  &B::Device,
    ) -> Result<(TripletDataset<D>, usize)> {
        let round = self.round.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(round));

        // ── Pool ──────────────────────────────────────────────────────────────
        let pool_size = dataset.len().min(self.config.max_triplets.saturating_mul(2).max(2));
        let mut pool: Vec<usize> = (0..dataset.len()).collect();
        pool.shuffle(&mut rng);
        pool.truncate(pool_size);

        let mut labels = Vec::with_capacity(pool.len());
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(pool.len());
        for chunk in pool.chunks(self.config.batch_size.max(1)) {
            let items: Vec<FaceItem> = chunk
                .iter()
                .map(|&i| dataset.get(i).ok_or_else(|| anyhow!("Training sample {i} is unavailable")))
                .collect::<Result<_>>()?;
            labels.extend(items.iter().map(|s| s.label));

            let images = pixels_to_tensor::<B>(items.iter().map(|s| &s.pixels), self.config.image_size, device);
            let emb    = model.embed(images);
            let [rows, dim] = emb.dims();
            let flat: Vec<f32> = emb
                .into_data()
                .convert::<f32>()
                .to_vec()
                .map_err(|e| anyhow!("Cannot read embeddings: {e:?}"))?;
            embeddings.extend((0..rows).map(|r| flat[r * dim..(r + 1) * dim].to_vec()));
        }

        // ── Selection ─────────────────────────────────────────────────────────
        let local = select_semi_hard(&embeddings, &labels, self.config.alpha, &mut rng);
        let mut triplets: Vec<[usize; 3]> = local
            .into_iter()
            .map(|[a, p, n]| [pool[a], pool[p], pool[n]])
            .collect();
        triplets.shuffle(&mut rng);
        triplets.truncate(self.config.max_triplets);

        tracing::debug!("Mined {} triplets from a pool of {}", triplets.len(), pool.len());
        let count = triplets.len();
        Ok((TripletDataset::new(dataset, triplets), count))
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Semi-hard triplets over local indices.
pub fn select_semi_hard(
    embeddings: &[Vec<f32>],
    labels:     &[usize],
    alpha:      f64,
    rng:        &mut StdRng,
) -> Vec<[usize; 3]> {
    let alpha = alpha as f32;
    let mut out = Vec::new();

    for a in 0..embeddings.len() {
        let dists: Vec<f32> = embeddings.iter().map(|e| squared_distance(&embeddings[a], e)).collect();
        for p in (a + 1)..embeddings.len() {
            if labels[p] != labels[a] {
                continue;
            }
            let d_ap = dists[p];
            let candidates: Vec<usize> = (0..embeddings.len())
                .filter(|&n| labels[n] != labels[a])
                .filter(|&n| dists[n] > d_ap && dists[n] < d_ap + alpha)
                .collect();
            if let Some(&n) = candidates.choose(rng) {
                out.push([a, p, n]);
            }
        }
    }
    out
}
