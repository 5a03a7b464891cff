// ============================================================
// Layer 5 — Loss Functions
// ============================================================
// Pure functions of tensors. None of them touch the model or
// the optimizer; the Trainer decides what to do with results.
//
//   margin_loss  — combined angular margin softmax
//                  target logit: s · (cos(m1·θ + m2) − m3)
//                  other logits: s · cos θ
//                  (m1, m2, m3) = (1, 0.5, 0)  → ArcFace
//                                 (1, 0, 0.35) → CosFace
//                                 (4, 0, 0)    → SphereFace
//   triplet_loss — mean(max(‖a−p‖² − ‖a−n‖² + α, 0))
//   center_loss  — mean(‖x − c_y‖²), plus the blended table
//
// Reference: Deng et al. (2019) ArcFace, Schroff et al. (2015)
//            FaceNet, Wen et al. (2016) center loss

use burn::{
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::activation::relu,
};

/// Float one-hot encoding: [batch] class indices → [batch, classes].
pub fn one_hot<B: Backend>(
    labels:  Tensor<B, 1, Int>,
    classes: usize,
    device:  &B::Device,
) -> Tensor<B, 2> {
    let batch = labels.dims()[0];
    Tensor::<B, 2>::zeros([batch, classes], device).scatter(
        1,
        labels.reshape([batch, 1]),
        Tensor::ones([batch, 1], device),
    )
}

/// cos(m1·θ + m2) − m3 given cos θ, for an integer multiplier m1.
///
/// cos(m1·θ) = T_m1(cos θ) and sin(m1·θ) = sin θ · U_{m1−1}(cos θ),
/// with T/U the Chebyshev polynomials of the first/second kind.
fn combined_margin<B: Backend>(cos_t: Tensor<B, 2>, m1: usize, m2: f64, m3: f64) -> Tensor<B, 2> {
    let ones = Tensor::ones(cos_t.shape(), &cos_t.device());

    // T_0 = 1, T_1 = c, T_{n+1} = 2c·T_n − T_{n−1}
    // U_0 = 1, U_1 = 2c, U_{n+1} = 2c·U_n − U_{n−1}
    let (mut t_prev, mut t_cur) = (ones.clone(), cos_t.clone());
    let (mut u_prev, mut u_cur) = (ones.clone(), cos_t.clone().mul_scalar(2.0));
    for _ in 1..m1 {
        let two_c = cos_t.clone().mul_scalar(2.0);
        let t_next = two_c.clone() * t_cur.clone() - t_prev;
        let u_next = two_c * u_cur.clone() - u_prev;
        t_prev = t_cur;
        t_cur  = t_next;
        u_prev = u_cur;
        u_cur  = u_next;
    }
    // after the loop: t_cur = T_m1, u_prev = U_{m1−1}
    let cos_m1 = t_cur;

    let shifted = if m2 == 0.0 {
        cos_m1
    } else {
        let sin_t  = (ones - cos_t.clone().powf_scalar(2.0)).clamp_min(1e-12).sqrt();
        let sin_m1 = sin_t * u_prev;
        cos_m1.mul_scalar(m2.cos()) - sin_m1.mul_scalar(m2.sin())
    };
    shifted.sub_scalar(m3)
}

/// Combined-margin softmax cross-entropy.
///
/// `norm_logits` are the angular-head outputs ‖x‖·cos θ; dividing by
/// ‖x‖ recovers cos θ.
pub fn margin_loss<B: Backend>(
    embedding:   Tensor<B, 2>,
    norm_logits: Tensor<B, 2>,
    labels:      Tensor<B, 1, Int>,
    m1:          f64,
    m2:          f64,
    m3:          f64,
    scale:       f64,
) -> Tensor<B, 1> {
    let [_, classes] = norm_logits.dims();
    let device = norm_logits.device();

    let x_norm = embedding.powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    let cos_t  = (norm_logits / x_norm).clamp(-1.0 + 1e-7, 1.0 - 1e-7);

    let mask       = one_hot(labels.clone(), classes, &device);
    let target_cos = (cos_t.clone() * mask.clone()).sum_dim(1);
    let marginal   = combined_margin(target_cos.clone(), m1.round() as usize, m2, m3);

    let logits = (cos_t + mask * (marginal - target_cos)).mul_scalar(scale);
    CrossEntropyLossConfig::new().init(&device).forward(logits, labels)
}

pub fn triplet_loss<B: Backend>(
    anchor:   Tensor<B, 2>,
    positive: Tensor<B, 2>,
    negative: Tensor<B, 2>,
    alpha:    f64,
) -> Tensor<B, 1> {
    let pos_dist = (anchor.clone() - positive).powf_scalar(2.0).sum_dim(1);
    let neg_dist = (anchor - negative).powf_scalar(2.0).sum_dim(1);
    relu((pos_dist - neg_dist).add_scalar(alpha)).mean()
}

/// Returns (loss, updated centers).
///
/// The loss treats the current centers as constants. The returned
/// table moves every class present in the batch toward that class's
/// batch-mean embedding: c ← c − (1 − alpha)·(c − mean). Rows of
/// classes absent from the batch come back bit-identical.
pub fn center_loss<B: Backend>(
    features: Tensor<B, 2>,
    labels:   Tensor<B, 1, Int>,
    centers:  Tensor<B, 2>,
    alpha:    f64,
) -> (Tensor<B, 1>, Tensor<B, 2>) {
    let [classes, _] = centers.dims();
    let device = centers.device();

    let centers_batch = centers.clone().select(0, labels.clone());
    let loss = (features.clone() - centers_batch).powf_scalar(2.0).mean();

    let mask    = one_hot(labels, classes, &device);
    let counts  = mask.clone().sum_dim(0).transpose();          // [classes, 1]
    let sums    = mask.transpose().matmul(features.detach());   // [classes, dim]
    let touched = counts.clone().greater_elem(0.0).float();
    let means   = sums / counts.clamp_min(1.0);

    let delta   = (centers.clone() - means) * touched.mul_scalar(1.0 - alpha);
    (loss, centers - delta)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray<f32>;

    fn floats<const D: usize>(t: Tensor<TB, D>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    fn labels(v: &[i64]) -> Tensor<TB, 1, Int> {
        Tensor::from_data(TensorData::new(v.to_vec(), [v.len()]), &Default::default())
    }

    #[test]
    fn test_one_hot() {
        let oh = one_hot::<TB>(labels(&[2, 0]), 3, &Default::default());
        assert_eq!(floats(oh), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_margin_equals_scaled_softmax() {
        let device = Default::default();
        let emb    = Tensor::<TB, 2>::from_floats([[2.0, 0.0], [0.0, 1.0]], &device);
        // ‖x‖·cos θ for cos θ = [[0.6, -0.2], [0.1, 0.8]]
        let norm   = Tensor::<TB, 2>::from_floats([[1.2, -0.4], [0.1, 0.8]], &device);
        let loss   = margin_loss(emb, norm, labels(&[0, 1]), 1.0, 0.0, 0.0, 4.0);

        let cos     = Tensor::<TB, 2>::from_floats([[0.6, -0.2], [0.1, 0.8]], &device);
        let plain   = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(cos.mul_scalar(4.0), labels(&[0, 1]));

        let (a, b) = (floats(loss)[0], floats(plain)[0]);
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }

    #[test]
    fn test_margin_increases_loss() {
        let device = Default::default();
        let emb    = Tensor::<TB, 2>::from_floats([[1.0, 0.0]], &device);
        let norm   = Tensor::<TB, 2>::from_floats([[0.7, 0.1]], &device);

        let plain  = floats(margin_loss(emb.clone(), norm.clone(), labels(&[0]), 1.0, 0.0, 0.0, 16.0))[0];
        let arc    = floats(margin_loss(emb.clone(), norm.clone(), labels(&[0]), 1.0, 0.5, 0.0, 16.0))[0];
        let cosine = floats(margin_loss(emb.clone(), norm.clone(), labels(&[0]), 1.0, 0.0, 0.35, 16.0))[0];
        let sphere = floats(margin_loss(emb, norm, labels(&[0]), 2.0, 0.0, 0.0, 16.0))[0];
        assert!(arc > plain && cosine > plain && sphere > plain);
    }

    #[test]
    fn test_chebyshev_matches_trig() {
        let device = Default::default();
        let theta: f64 = 0.4;
        let cos_t = Tensor::<TB, 2>::from_floats([[theta.cos() as f32]], &device);
        for m1 in 1..=4usize {
            let got = floats(combined_margin(cos_t.clone(), m1, 0.3, 0.1))[0] as f64;
            let want = (m1 as f64 * theta + 0.3).cos() - 0.1;
            assert!((got - want).abs() < 1e-4, "m1={m1}: {got} vs {want}");
        }
    }

    #[test]
    fn test_triplet_loss_hinge() {
        let device = Default::default();
        let a = Tensor::<TB, 2>::from_floats([[1.0, 0.0]], &device);
        let p = Tensor::<TB, 2>::from_floats([[0.8, 0.6]], &device);
        let far  = Tensor::<TB, 2>::from_floats([[-1.0, 0.0]], &device);
        let near = Tensor::<TB, 2>::from_floats([[0.6, 0.8]], &device);

        // ‖a−p‖² = 0.4, ‖a−far‖² = 4 → satisfied, zero loss
        assert_eq!(floats(triplet_loss(a.clone(), p.clone(), far, 0.2))[0], 0.0);
        // ‖a−near‖² = 0.8 → 0.4 − 0.8 + 0.5 = 0.1
        let l = floats(triplet_loss(a, p, near, 0.5))[0];
        assert!((l - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_center_loss_updates_only_touched_rows() {
        let device  = Default::default();
        let centers = Tensor::<TB, 2>::from_floats(
            [[0.0, 0.0], [1.0, 1.0], [5.0, -5.0]],
            &device,
        );
        let feats = Tensor::<TB, 2>::from_floats([[2.0, 0.0], [4.0, 2.0], [3.0, 3.0]], &device);
        let (loss, updated) = center_loss(feats, labels(&[0, 0, 1]), centers, 0.5);

        let rows = floats(updated);
        // class 0: batch mean (3, 1), moved half-way from (0, 0)
        assert_eq!(&rows[0..2], &[1.5, 0.5]);
        // class 1: mean (3, 3), half-way from (1, 1)
        assert_eq!(&rows[2..4], &[2.0, 2.0]);
        // class 2 untouched
        assert_eq!(&rows[4..6], &[5.0, -5.0]);

        // ((4+0) + (16+4) + (4+4)) / 6
        assert!((floats(loss)[0] - 32.0 / 6.0).abs() < 1e-5);
    }
}
