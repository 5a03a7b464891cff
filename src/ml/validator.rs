// ============================================================
// Layer 5 — Verification Validator
// ============================================================
// Scores a fixed set of image pairs with the current model:
//
//   distance(pair) = ‖e_left − e_right‖²   (unit embeddings, so 0..4)
//   predicted same identity  ⇔  distance < threshold
//
// and reports accuracy / precision / recall (= TPR) / FPR at
// the configured threshold, plus the same four numbers at the
// operating point chosen post hoc: the largest threshold whose
// false-positive rate stays at or below `below_fpr`.
//
// The validator only ever receives the inference copy of the
// model (`model.valid()`), so it cannot change trainable state.

use anyhow::{anyhow, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::batcher::pixels_to_tensor;
use crate::domain::sample::{ValidationPair, ValidationSet};
use crate::ml::model::FaceModel;

/// The eight per-epoch validation scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub acc:        f64,
    pub precision:  f64,
    pub recall:     f64,
    pub fpr:        f64,
    pub acc_fpr:    f64,
    pub p_fpr:      f64,
    pub r_fpr:      f64,
    pub thresh_fpr: f64,
}

impl ValidationMetrics {
    /// (tag, value) pairs in summary order.
    pub fn scalars(&self) -> [(&'static str, f64); 8] {
        [
            ("acc",        self.acc),
            ("p",          self.precision),
            ("r=tpr",      self.recall),
            ("fpr",        self.fpr),
            ("acc_fpr",    self.acc_fpr),
            ("p_fpr",      self.p_fpr),
            ("r=tpr_fpr",  self.r_fpr),
            ("thresh_fpr", self.thresh_fpr),
        ]
    }
}

/// Confusion-matrix derived rates at one threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub acc:       f64,
    pub precision: f64,
    pub recall:    f64,
    pub fpr:       f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

pub fn rates_at(distances: &[f32], same: &[bool], threshold: f64) -> Rates {
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (&d, &s) in distances.iter().zip(same) {
        match ((d as f64) < threshold, s) {
            (true, true)   => tp += 1,
            (true, false)  => fp += 1,
            (false, false) => tn += 1,
            (false, true)  => fn_ += 1,
        }
    }
    Rates {
        acc:       ratio(tp + tn, distances.len()),
        precision: ratio(tp, tp + fp),
        recall:    ratio(tp, tp + fn_),
        fpr:       ratio(fp, fp + tn),
    }
}

/// Largest threshold whose FPR does not exceed `max_fpr`.
///
/// Candidates are 0 and every distinct distance value; a candidate t
/// accepts exactly the pairs with distance < t, so the next candidate
/// above a negative's distance is where that negative starts counting.
pub fn threshold_at_fpr(distances: &[f32], same: &[bool], max_fpr: f64) -> f64 {
    let mut candidates: Vec<f64> = distances.iter().map(|&d| d as f64).collect();
    candidates.push(0.0);
    candidates.sort_by(|a, b| a.total_cmp(b));
    candidates.dedup();

    let mut best = 0.0;
    for t in candidates {
        if rates_at(distances, same, t).fpr <= max_fpr {
            best = t;
        } else {
            // fpr is non-decreasing in t
            break;
        }
    }
    best
}

pub struct PairValidator {
    set:        ValidationSet,
    image_size: usize,
    batch_size: usize,
}

impl PairValidator {
    pub fn new(set: ValidationSet, image_size: usize, batch_size: usize) -> Self {
        if set.is_empty() {
            tracing::warn!("Validation set is empty — metrics will be zero");
        }
        Self { set, image_size, batch_size: batch_size.max(1) }
    }

    /// Squared distance between the two embeddings of every pair.
    /// Each stored image is embedded once, however many pairs use it.
    pub fn distances<B: Backend>(&self, model: &FaceModel<B>, device: &B::Device) -> Result<Vec<f32>> {
        if self.set.is_empty() {
            return Ok(Vec::new());
        }
        let chunks: Vec<Tensor<B, 2>> = self
            .set
            .images
            .chunks(self.batch_size)
            .map(|chunk| model.embed(pixels_to_tensor::<B>(chunk, self.image_size, device)))
            .collect();
        let embeddings = Tensor::cat(chunks, 0);

        let slots = |side: fn(&ValidationPair) -> usize| {
            let ids: Vec<i64> = self.set.pairs.iter().map(|p| side(p) as i64).collect();
            Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [self.set.len()]), device)
        };
        let left  = embeddings.clone().select(0, slots(|p| p.left));
        let right = embeddings.select(0, slots(|p| p.right));

        (left - right)
            .powf_scalar(2.0)
            .sum_dim(1)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow!("Cannot read validation distances: {e:?}"))
    }

    pub fn get_metric<B: Backend>(
        &self,
        model:     &FaceModel<B>,
        device:    &B::Device,
        thresh:    f64,
        below_fpr: f64,
    ) -> Result<ValidationMetrics> {
        let distances = self.distances(model, device)?;
        let same: Vec<bool> = self.set.pairs.iter().map(|p| p.same).collect();

        let fixed      = rates_at(&distances, &same, thresh);
        let thresh_fpr = threshold_at_fpr(&distances, &same, below_fpr);
        let at_fpr     = rates_at(&distances, &same, thresh_fpr);

        Ok(ValidationMetrics {
            acc:       fixed.acc,
            precision: fixed.precision,
            recall:    fixed.recall,
            fpr:       fixed.fpr,
            acc_fpr:   at_fpr.acc,
            p_fpr:     at_fpr.precision,
            r_fpr:     at_fpr.recall,
            thresh_fpr,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const DIST: [f32; 6] = [0.2, 0.4, 0.9, 0.5, 1.5, 2.0];
    const SAME: [bool; 6] = [true, true, true, false, false, false];

    #[test]
    fn test_rates_at_threshold() {
        // accepted: 0.2 (tp) 0.4 (tp) 0.9 (tp) 0.5 (fp)
        let r = rates_at(&DIST, &SAME, 1.0);
        assert_eq!(r.acc, 5.0 / 6.0);
        assert_eq!(r.precision, 0.75);
        assert_eq!(r.recall, 1.0);
        assert!((r.fpr - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rates_with_nothing_accepted() {
        let r = rates_at(&DIST, &SAME, 0.0);
        assert_eq!(r.precision, 0.0);
        assert_eq!(r.recall, 0.0);
        assert_eq!(r.fpr, 0.0);
        assert_eq!(r.acc, 0.5);
    }

    #[test]
    fn test_threshold_at_zero_fpr() {
        // the first negative sits at 0.5, so t = 0.5 still rejects it
        let t = threshold_at_fpr(&DIST, &SAME, 0.0);
        assert!((t - 0.5).abs() < 1e-6);
        let r = rates_at(&DIST, &SAME, t);
        assert_eq!(r.fpr, 0.0);
        assert!((r.recall - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_grows_with_allowed_fpr() {
        let strict = threshold_at_fpr(&DIST, &SAME, 0.0);
        let loose  = threshold_at_fpr(&DIST, &SAME, 0.34);
        assert!(loose > strict);
        assert!(rates_at(&DIST, &SAME, loose).fpr <= 0.34);
    }

    #[test]
    fn test_shared_images_give_consistent_distances() {
        use crate::ml::model::FaceModelConfig;
        use burn::backend::NdArray;

        type TB = NdArray<f32>;
        let device = Default::default();
        let model: FaceModel<TB> =
            FaceModelConfig::new(crate::domain::config::BlockKind::Basic, [1, 1, 1, 1], 8, 2)
                .with_base_filters(4)
                .init(&device);

        let image = |seed: usize| -> Vec<f32> {
            (0..3 * 16 * 16).map(|i| (((i + seed * 7) % 13) as f32 - 6.0) / 6.0).collect()
        };
        let set = ValidationSet::new(
            vec![image(0), image(1), image(2)],
            vec![
                ValidationPair { left: 0, right: 1, same: true },
                ValidationPair { left: 1, right: 0, same: true },
                ValidationPair { left: 2, right: 2, same: true },
                ValidationPair { left: 0, right: 2, same: false },
            ],
        );
        let d = PairValidator::new(set, 16, 2).distances(&model, &device).unwrap();

        assert_eq!(d.len(), 4);
        assert!((d[0] - d[1]).abs() < 1e-6);
        assert!(d[2].abs() < 1e-6);
        assert!(d.iter().all(|&v| (0.0..=4.0 + 1e-4).contains(&v)));
    }

    #[test]
    fn test_empty_set_has_no_distances() {
        use burn::backend::NdArray;
        use crate::ml::model::FaceModelConfig;

        let device = Default::default();
        let model: FaceModel<NdArray<f32>> =
            FaceModelConfig::new(crate::domain::config::BlockKind::Basic, [1, 1, 1, 1], 8, 2)
                .with_base_filters(4)
                .init(&device);
        let validator = PairValidator::new(ValidationSet::default(), 16, 4);
        assert!(validator.distances(&model, &device).unwrap().is_empty());
        let m = validator.get_metric(&model, &device, 1.0, 0.1).unwrap();
        assert_eq!(m.acc, 0.0);
    }

    #[test]
    fn test_scalars_order() {
        let m = ValidationMetrics { acc: 1.0, thresh_fpr: 0.7, ..Default::default() };
        let s = m.scalars();
        assert_eq!(s.len(), 8);
        assert_eq!(s[0], ("acc", 1.0));
        assert_eq!(s[7], ("thresh_fpr", 0.7));
    }
}
