// ============================================================
// Layer 5 — Optimizers
// ============================================================
// The Trainer owns one `FaceOptim` whatever the configuration
// says. Each variant wraps a Burn `OptimizerAdaptor`, which
// tracks per-parameter state and turns it into a record for
// checkpointing, so a resumed run continues with the same
// moment / accumulator values.
//
//   SGD, ADAGRAD, RMSPROP, ADAM   Burn's own optimizers
//   ADADELTA, ADAMAX, NADAM, FTRL `SlotOptimizer` below
//
// The slot optimizer keeps two tensors plus a step counter per
// parameter; their meaning depends on the rule:
//
//   rule      first slot              second slot
//   ADADELTA  E[g²]                   E[Δx²]
//   ADAMAX    m                       u (∞-norm)
//   NADAM     m                       v
//   FTRL      accumulator n           linear z
//
// Hyperparameters other than the learning rate use the Keras
// defaults (ε = 1e-7, ρ = 0.95 / 0.9, β1 = 0.9, β2 = 0.999,
// FTRL initial accumulator 0.1).

use burn::{
    module::AutodiffModule,
    optim::{
        adaptor::OptimizerAdaptor, AdaGrad, AdaGradConfig, Adam, AdamConfig, GradientsParams,
        Optimizer, RmsProp, RmsPropConfig, Sgd, SgdConfig, SimpleOptimizer,
    },
    prelude::*,
    record::Record,
    tensor::backend::AutodiffBackend,
    LearningRate,
};

use crate::domain::config::OptimizerKind;
use crate::ml::model::FaceModel;

const EPSILON: f64 = 1e-7;

/// Per-parameter state an adaptor around `O` records.
type AdaptorState<O, M, B> = <OptimizerAdaptor<O, M, B> as Optimizer<M, B>>::Record;

/// The optimizer the Trainer owns, one variant per update family.
pub enum FaceOptim<B: AutodiffBackend, M: AutodiffModule<B> = FaceModel<B>> {
    Sgd(OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>),
    Adagrad(OptimizerAdaptor<AdaGrad, M, B>),
    RmsProp(OptimizerAdaptor<RmsProp, M, B>),
    Adam(OptimizerAdaptor<Adam, M, B>),
    Slots(SlotRule, OptimizerAdaptor<SlotOptimizer, M, B>),
}

/// Checkpointable state of a `FaceOptim`; the variant names the family.
#[derive(Record)]
pub enum FaceOptimRecord<B: AutodiffBackend, M: AutodiffModule<B>> {
    Sgd(AdaptorState<Sgd<B::InnerBackend>, M, B>),
    Adagrad(AdaptorState<AdaGrad, M, B>),
    RmsProp(AdaptorState<RmsProp, M, B>),
    Adam(AdaptorState<Adam, M, B>),
    Slots(AdaptorState<SlotOptimizer, M, B>),
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> FaceOptim<B, M> {
    pub fn new(kind: OptimizerKind) -> Self {
        match kind {
            OptimizerKind::Sgd     => Self::Sgd(SgdConfig::new().init()),
            OptimizerKind::Adagrad => Self::Adagrad(AdaGradConfig::new().with_epsilon(EPSILON as f32).init()),
            OptimizerKind::RmsProp => Self::RmsProp(
                RmsPropConfig::new()
                    .with_alpha(0.9)
                    .with_momentum(0.0)
                    .with_epsilon(EPSILON as f32)
                    .init(),
            ),
            OptimizerKind::Adam => Self::Adam(AdamConfig::new().with_epsilon(EPSILON as f32).init()),
            OptimizerKind::Adadelta => Self::slots(SlotRule::Adadelta),
            OptimizerKind::Adamax   => Self::slots(SlotRule::Adamax),
            OptimizerKind::Nadam    => Self::slots(SlotRule::Nadam),
            OptimizerKind::Ftrl     => Self::slots(SlotRule::Ftrl),
        }
    }

    fn slots(rule: SlotRule) -> Self {
        Self::Slots(rule, OptimizerAdaptor::from(SlotOptimizer::new(rule)))
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::Sgd(_)     => OptimizerKind::Sgd,
            Self::Adagrad(_) => OptimizerKind::Adagrad,
            Self::RmsProp(_) => OptimizerKind::RmsProp,
            Self::Adam(_)    => OptimizerKind::Adam,
            Self::Slots(rule, _) => rule.kind(),
        }
    }
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> Optimizer<M, B> for FaceOptim<B, M> {
    type Record = FaceOptimRecord<B, M>;

    fn step(&mut self, lr: LearningRate, module: M, grads: GradientsParams) -> M {
        match self {
            Self::Sgd(o)      => o.step(lr, module, grads),
            Self::Adagrad(o)  => o.step(lr, module, grads),
            Self::RmsProp(o)  => o.step(lr, module, grads),
            Self::Adam(o)     => o.step(lr, module, grads),
            Self::Slots(_, o) => o.step(lr, module, grads),
        }
    }

    fn to_record(&self) -> Self::Record {
        match self {
            Self::Sgd(o)      => FaceOptimRecord::Sgd(o.to_record()),
            Self::Adagrad(o)  => FaceOptimRecord::Adagrad(o.to_record()),
            Self::RmsProp(o)  => FaceOptimRecord::RmsProp(o.to_record()),
            Self::Adam(o)     => FaceOptimRecord::Adam(o.to_record()),
            Self::Slots(_, o) => FaceOptimRecord::Slots(o.to_record()),
        }
    }

    /// A record of another family is ignored; checkpoint restore
    /// rejects such snapshots before they reach this point.
    fn load_record(self, record: Self::Record) -> Self {
        match (self, record) {
            (Self::Sgd(o), FaceOptimRecord::Sgd(r))         => Self::Sgd(o.load_record(r)),
            (Self::Adagrad(o), FaceOptimRecord::Adagrad(r)) => Self::Adagrad(o.load_record(r)),
            (Self::RmsProp(o), FaceOptimRecord::RmsProp(r)) => Self::RmsProp(o.load_record(r)),
            (Self::Adam(o), FaceOptimRecord::Adam(r))       => Self::Adam(o.load_record(r)),
            (Self::Slots(rule, o), FaceOptimRecord::Slots(r)) => Self::Slots(rule, o.load_record(r)),
            (optim, _) => {
                tracing::warn!("Optimizer state of another algorithm ignored for {}", optim.kind());
                optim
            }
        }
    }
}

// ─── Slot optimizer ───────────────────────────────────────────────────────────

/// Update rules Burn has no optimizer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRule {
    Adadelta,
    Adamax,
    Nadam,
    Ftrl,
}

impl SlotRule {
    pub fn kind(self) -> OptimizerKind {
        match self {
            SlotRule::Adadelta => OptimizerKind::Adadelta,
            SlotRule::Adamax   => OptimizerKind::Adamax,
            SlotRule::Nadam    => OptimizerKind::Nadam,
            SlotRule::Ftrl     => OptimizerKind::Ftrl,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlotOptimizer {
    rule:          SlotRule,
    beta_1:        f64,
    beta_2:        f64,
    rho:           f64,
    initial_accum: f64,
}

impl SlotOptimizer {
    pub fn new(rule: SlotRule) -> Self {
        let rho = match rule {
            SlotRule::Adadelta => 0.95,
            _                  => 0.9,
        };
        Self {
            rule,
            beta_1: 0.9,
            beta_2: 0.999,
            rho,
            initial_accum: 0.1,
        }
    }

    fn fresh_state<B: Backend, const D: usize>(&self, grad: &Tensor<B, D>) -> SlotState<B, D> {
        let shape  = grad.shape();
        let device = grad.device();
        let first = match self.rule {
            SlotRule::Ftrl => Tensor::full(shape.clone(), self.initial_accum, &device),
            _              => Tensor::zeros(shape.clone(), &device),
        };
        SlotState {
            time: 0,
            first,
            second: Tensor::zeros(shape, &device),
        }
    }
}

#[derive(Record, Clone)]
pub struct SlotState<B: Backend, const D: usize> {
    pub time:   usize,
    pub first:  Tensor<B, D>,
    pub second: Tensor<B, D>,
}

impl<B: Backend> SimpleOptimizer<B> for SlotOptimizer {
    type State<const D: usize> = SlotState<B, D>;

    fn step<const D: usize>(
        &self,
        lr:     LearningRate,
        tensor: Tensor<B, D>,
        grad:   Tensor<B, D>,
        state:  Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let state = state.unwrap_or_else(|| self.fresh_state(&grad));
        let time  = state.time + 1;
        let SlotState { first, second, .. } = state;

        let (param, first, second) = match self.rule {
            SlotRule::Adadelta => {
                let acc_grad = first.mul_scalar(self.rho)
                    + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);
                let delta = second.clone().add_scalar(EPSILON).sqrt()
                    / acc_grad.clone().add_scalar(EPSILON).sqrt()
                    * grad;
                let acc_delta = second.mul_scalar(self.rho)
                    + delta.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);
                (tensor - delta.mul_scalar(lr), acc_grad, acc_delta)
            }

            SlotRule::Nadam => {
                let m = first.mul_scalar(self.beta_1) + grad.clone().mul_scalar(1.0 - self.beta_1);
                let v = second.mul_scalar(self.beta_2)
                    + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.beta_2);

                let t         = time as i32;
                let bias_1    = 1.0 - self.beta_1.powi(t);
                let bias_next = 1.0 - self.beta_1.powi(t + 1);
                let bias_2    = 1.0 - self.beta_2.powi(t);

                // Nesterov look-ahead on the first moment
                let m_hat = m.clone().mul_scalar(self.beta_1 / bias_next)
                    + grad.mul_scalar((1.0 - self.beta_1) / bias_1);
                let v_hat = v.clone().div_scalar(bias_2);
                let step  = m_hat / v_hat.sqrt().add_scalar(EPSILON);
                (tensor - step.mul_scalar(lr), m, v)
            }

            SlotRule::Adamax => {
                let m = first.mul_scalar(self.beta_1) + grad.clone().mul_scalar(1.0 - self.beta_1);
                let u = second.mul_scalar(self.beta_2).max_pair(grad.abs());
                let bias_1 = 1.0 - self.beta_1.powi(time as i32);
                let step = m.clone() / u.clone().add_scalar(EPSILON);
                (tensor - step.mul_scalar(lr / bias_1), m, u)
            }

            SlotRule::Ftrl => {
                // learning-rate power −0.5, no L1/L2 regularisation
                let accum_new = first.clone() + grad.clone().powf_scalar(2.0);
                let sigma = (accum_new.clone().sqrt() - first.sqrt()).div_scalar(lr);
                let linear = second + grad - sigma * tensor;
                let quadratic = accum_new.clone().sqrt().div_scalar(lr);
                (linear.clone().neg() / quadratic, accum_new, linear)
            }
        };

        (param, Some(SlotState { time, first, second }))
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        SlotState {
            time:   state.time,
            first:  state.first.to_device(device),
            second: state.second.to_device(device),
        }
    }
}
