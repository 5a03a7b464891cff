// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds, differentiates or updates tensors
// lives here.
//
//   backbone.rs  — ResNet v1 feature extractor (basic or
//                  bottleneck blocks) ending in an embedding
//                  projection
//
//   model.rs     — FaceModel: backbone + plain dense head +
//                  normalised (cosine) head
//
//   loss.rs      — Combined-margin softmax, triplet and center
//                  losses
//
//   optim.rs     — FaceOptim: Burn's SGD / AdaGrad / RMSProp /
//                  Adam plus a slot optimizer for the other
//                  four update rules
//
//   validator.rs — Pair verification metrics, including the
//                  threshold that holds a target FPR
//
//   trainer.rs   — Epoch state machine: mining, steps,
//                  validation, checkpointing
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            He et al. (2016) Deep Residual Learning

/// ResNet v1 backbone
pub mod backbone;

/// Face embedding model with both classification heads
pub mod model;

pub mod loss;

/// Optimizer state and update rules
pub mod optim;

pub mod validator;

/// Training orchestrator
pub mod trainer;

// ─── Backends ─────────────────────────────────────────────────────────────────

#[cfg(not(feature = "wgpu"))]
pub type MyInnerBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type MyInnerBackend = burn::backend::Wgpu;

/// Autodiff wrapper used for training.
pub type MyBackend = burn::backend::Autodiff<MyInnerBackend>;
