// In-memory provider for tests: every identity is a fixed random
// pattern, every sample of it that pattern plus a little noise, so
// classes are separable from the first step.

use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::dataset::FaceDataset;
use crate::data::provider::DataProvider;
use crate::data::splitter::sample_pairs;
use crate::data::triplets::{MiningConfig, TripletMiner};
use crate::domain::sample::{FaceItem, ValidationSet};

pub struct SyntheticProvider {
    train:   FaceDataset,
    classes: usize,
    seed:    u64,
    miner:   TripletMiner,
}

impl SyntheticProvider {
    pub fn new(classes: usize, per_class: usize, image_size: usize, seed: u64) -> Self {
        let len = 3 * image_size * image_size;
        let mut rng = StdRng::seed_from_u64(seed);

        let patterns: Vec<Vec<f32>> = (0..classes)
            .map(|_| (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();

        let mut items = Vec::with_capacity(classes * per_class);
        for (label, pattern) in patterns.iter().enumerate() {
            for _ in 0..per_class {
                let pixels = pattern.iter().map(|&v| v + rng.gen_range(-0.1..0.1)).collect();
                items.push(FaceItem { pixels, label });
            }
        }

        let miner = TripletMiner::new(MiningConfig {
            alpha:        0.2,
            max_triplets: 64,
            batch_size:   8,
            image_size,
            seed,
        });

        Self { train: FaceDataset::new(items), classes, seed, miner }
    }
}

impl DataProvider for SyntheticProvider {
    type Dataset = FaceDataset;

    fn get_train_data(&self) -> Result<(FaceDataset, usize)> {
        Ok((self.train.clone(), self.classes))
    }

    fn get_val_data(&self, n: usize) -> Result<ValidationSet> {
        use burn::data::dataset::Dataset;

        let labels = self.train.labels();
        let pairs  = sample_pairs(&labels, n, self.seed.wrapping_add(1));
        ValidationSet::gather(pairs.iter().map(|p| (p.left, p.right, p.same)), |i| {
            self.train
                .get(i)
                .map(|s| s.pixels)
                .ok_or_else(|| anyhow!("Validation index {i} out of range"))
        })
    }

    fn miner(&self) -> &TripletMiner {
        &self.miner
    }
}
