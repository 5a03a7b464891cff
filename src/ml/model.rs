// ============================================================
// Layer 5 — Face Embedding Model
// ============================================================
// FaceModel = ResNet backbone + two heads over its embedding:
//
//   dense       plain Linear logits (built and run, not trained
//               against any loss)
//   norm_dense  cosine head: weight columns L2-normalised, so
//               logit[i, j] = ‖x_i‖ · cos θ_ij, the input of the
//               combined-margin softmax
//
// `embed` skips both heads and returns unit-length embeddings.
//
// Reference: Burn Book §3.2 (Modules)

use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
};

use crate::domain::config::BlockKind;
use crate::ml::backbone::{ResNet, ResNetConfig};

#[derive(Config, Debug)]
pub struct FaceModelConfig {
    pub block:          BlockKind,
    pub layers:         [usize; 4],
    pub embedding_size: usize,
    pub classes:        usize,
    #[config(default = 64)]
    pub base_filters:   usize,
}

impl FaceModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FaceModel<B> {
        let backbone = ResNetConfig::new(self.block, self.layers, self.embedding_size)
            .with_base_filters(self.base_filters)
            .init(device);
        let dense = LinearConfig::new(self.embedding_size, self.classes).init(device);
        let norm_dense = NormDense {
            weight: Initializer::Normal { mean: 0.0, std: 0.05 }
                .init([self.embedding_size, self.classes], device),
        };
        FaceModel { backbone, dense, norm_dense }
    }
}

/// Linear map whose weight columns are L2-normalised before use,
/// so output[i, j] = ‖x_i‖ · cos θ_ij.
#[derive(Module, Debug)]
pub struct NormDense<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> NormDense<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let w = self.weight.val();
        let norm = w.clone().powf_scalar(2.0).sum_dim(0).sqrt().clamp_min(1e-12);
        x.matmul(w / norm)
    }
}

#[derive(Module, Debug)]
pub struct FaceModel<B: Backend> {
    pub backbone:   ResNet<B>,
    pub dense:      Linear<B>,
    pub norm_dense: NormDense<B>,
}

pub struct FaceModelOutput<B: Backend> {
    /// Backbone output ("prelogits"): [batch, embedding_size]
    pub embedding:    Tensor<B, 2>,
    /// Plain linear logits: [batch, classes]
    pub logits:       Tensor<B, 2>,
    /// Angular logits ‖x‖·cos θ: [batch, classes]
    pub norm_logits:  Tensor<B, 2>,
}

impl<B: Backend> FaceModel<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> FaceModelOutput<B> {
        let embedding   = self.backbone.forward(images);
        let logits      = self.dense.forward(embedding.clone());
        let norm_logits = self.norm_dense.forward(embedding.clone());
        FaceModelOutput { embedding, logits, norm_logits }
    }

    /// L2-normalised embeddings, the representation used for triplet
    /// loss, triplet mining and verification. Heads are not evaluated.
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        l2_normalize(self.backbone.forward(images))
    }

    pub fn classes(&self) -> usize {
        self.norm_dense.weight.dims()[1]
    }
}

/// Row-wise L2 normalisation of a [batch, dim] tensor.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-10);
    x / norm
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_model(classes: usize) -> FaceModel<TestBackend> {
        FaceModelConfig::new(BlockKind::Basic, [1, 1, 1, 1], 8, classes)
            .with_base_filters(4)
            .init(&Default::default())
    }

    #[test]
    fn test_forward_shapes() {
        let model  = tiny_model(5);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 16, 16], &Default::default());
        let out    = model.forward(images);
        assert_eq!(out.embedding.dims(), [2, 8]);
        assert_eq!(out.logits.dims(), [2, 5]);
        assert_eq!(out.norm_logits.dims(), [2, 5]);
        assert_eq!(model.classes(), 5);
    }

    #[test]
    fn test_norm_dense_is_bounded_by_input_norm() {
        let device = Default::default();
        let head = NormDense::<TestBackend> {
            weight: Initializer::Normal { mean: 0.0, std: 1.0 }.init([4, 6], &device),
        };
        let x = Tensor::<TestBackend, 2>::from_floats([[3.0, 0.0, 4.0, 0.0]], &device);
        let out: Vec<f32> = head.forward(x).into_data().to_vec().unwrap();
        // |‖x‖ cos θ| <= ‖x‖ = 5
        assert!(out.iter().all(|v| v.abs() <= 5.0 + 1e-4));
    }

    #[test]
    fn test_embed_is_unit_length() {
        let model  = tiny_model(3);
        let images = Tensor::<TestBackend, 4>::random(
            [4, 3, 16, 16],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &Default::default(),
        );
        let norms: Vec<f32> = model
            .embed(images)
            .powf_scalar(2.0)
            .sum_dim(1)
            .into_data()
            .to_vec()
            .unwrap();
        for n in norms {
            assert!((n - 1.0).abs() < 1e-4, "squared norm {n}");
        }
    }
}
