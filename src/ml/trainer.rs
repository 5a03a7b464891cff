// ============================================================
// Layer 5 — Training Orchestrator
// ============================================================
// Owns the model, the optimizer, the mode-specific state and
// the checkpoint lifecycle of one run.
//
// Construction order:
//   1. resolve loss type, optimizer and backbone (ConfigError
//      before anything else happens)
//   2. training data + class count, validation pairs
//   3. model, optional zero center table, optimizer
//   4. restore the latest checkpoint, if any
//   5. validator and summary writers
//
// Every epoch walks the same phases:
//
//   EpochStart → Training → Validating → Checkpointing → EpochEnd
//
// In triplet mode EpochStart re-mines triplets with the current
// model; an empty mining result goes straight to Validating.
//
// Classification step:
//   forward → margin loss (+ factor · center loss) → backward →
//   optimizer step → commit the updated center table
//
// Triplet step:
//   embed anchor, positive and negative batches → triplet loss →
//   backward → optimizer step
//
// Any step failure (including a non-finite loss) aborts the run;
// the last checkpoint is the recovery point.
//
// Key Burn insight:
//   - Training runs on MyBackend (Autodiff) for gradients
//   - model.valid() is the inference copy used by validation and
//     triplet mining, so neither can touch trainable state
//
// Reference: Burn Book §5, Deng et al. (2019), Schroff et al. (2015)

use anyhow::{bail, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::data::batcher::{FaceBatch, FaceBatcher, TripletBatch, TripletBatcher};
use crate::data::provider::DataProvider;
use crate::data::triplets::TripletDataset;
use crate::domain::config::{LossType, OptimizerKind, TrainConfig};
use crate::infra::checkpoint::{CheckpointManager, SnapshotShape};
use crate::infra::metrics::{run_dir, SummaryWriter};
use crate::ml::loss::{center_loss, margin_loss, triplet_loss};
use crate::ml::model::{FaceModel, FaceModelConfig};
use crate::ml::optim::FaceOptim;
use crate::ml::validator::{PairValidator, ValidationMetrics};

// ─── Mode-specific state ──────────────────────────────────────────────────────

/// Combined margin cos(m1·θ + m2) − m3, applied to the target class.
#[derive(Debug, Clone, Copy)]
pub struct Margins {
    /// Multiplicative angular margin (integer)
    pub m1:    f64,
    /// Additive angular margin, radians
    pub m2:    f64,
    /// Additive cosine margin
    pub m3:    f64,
    /// Logit scale s
    pub scale: f64,
}

/// Per-class running feature centers, [classes, embedding_size].
pub struct CenterTable<B: Backend> {
    pub table:  Tensor<B, 2>,
    pub factor: f64,
    pub alpha:  f64,
}

pub enum TrainingMode<B: Backend> {
    Logit {
        margins: Margins,
        center:  Option<CenterTable<B>>,
    },
    Triplet {
        alpha: f64,
    },
}

impl<B: Backend> TrainingMode<B> {
    pub fn loss_type(&self) -> LossType {
        match self {
            Self::Logit { .. }   => LossType::Logit,
            Self::Triplet { .. } => LossType::Triplet,
        }
    }

    pub fn centers(&self) -> Option<&Tensor<B, 2>> {
        match self {
            Self::Logit { center: Some(c), .. } => Some(&c.table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    EpochStart,
    Training,
    Validating,
    Checkpointing,
    EpochEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub total:  f64,
    pub margin: f64,
    pub center: f64,
}

/// What one epoch did, returned by `Trainer::train`.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch:      usize,
    /// Optimizer steps taken; 0 when no triplets were mined
    pub steps:      usize,
    /// Mean total loss over the steps, `None` without steps
    pub mean_loss:  Option<f64>,
    /// Validation scalars computed after training
    pub metrics:    ValidationMetrics,
    /// Snapshot written at the end of the epoch
    pub checkpoint: PathBuf,
    /// Wall time of the whole epoch, validation included
    pub elapsed:    Duration,
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

/// The data loader stops at the first item a dataset cannot produce,
/// so a short epoch means a sample failed to load.
fn check_exhausted(epoch: usize, seen: usize, expected: usize) -> Result<()> {
    if seen < expected {
        bail!("Training data ended after {seen} of {expected} samples in epoch {epoch}; a sample failed to load");
    }
    Ok(())
}

// ─── Trainer ──────────────────────────────────────────────────────────────────

pub struct Trainer<B: AutodiffBackend, P: DataProvider> {
    config:         TrainConfig,
    optimizer_kind: OptimizerKind,
    provider:       P,
    device:         B::Device,
    model:          FaceModel<B>,
    optim:          FaceOptim<B>,
    mode:           TrainingMode<B>,
    checkpoints:    CheckpointManager,
    validator:      PairValidator,
    train_summary:  SummaryWriter,
    valid_summary:  SummaryWriter,
    train_data:     P::Dataset,
    start_epoch:    usize,
}

impl<B: AutodiffBackend, P: DataProvider> Trainer<B, P> {
    pub fn new(config: TrainConfig, provider: P, device: B::Device) -> Result<Self> {
        // ── Resolve closed choices ────────────────────────────────────────────
        config.validate()?;
        let loss_type      = config.loss_kind()?;
        let optimizer_kind = config.optimizer_kind()?;
        let (block, layers) = config.backbone.resolve()?;

        // ── Data ──────────────────────────────────────────────────────────────
        let (train_data, class_count) = provider.get_train_data()?;
        let valid_data = provider.get_val_data(config.valid_num)?;
        tracing::info!(
            "Train samples: {}, classes: {}, validation pairs: {}",
            train_data.len(),
            class_count,
            valid_data.len()
        );

        // ── Model ─────────────────────────────────────────────────────────────
        let mut model: FaceModel<B> =
            FaceModelConfig::new(block, layers, config.embedding_size, class_count)
                .with_base_filters(config.base_filters)
                .init(&device);
        tracing::info!(
            "Model ready: {:?} blocks {:?}, base filters {}, embedding size {}",
            block,
            layers,
            config.base_filters,
            config.embedding_size
        );

        let mut mode = match loss_type {
            LossType::Logit => TrainingMode::Logit {
                margins: Margins {
                    m1:    config.logits_margin1,
                    m2:    config.logits_margin2,
                    m3:    config.logits_margin3,
                    scale: config.logits_scale,
                },
                center: config.center_loss_enabled().then(|| CenterTable {
                    table:  Tensor::zeros([class_count, config.embedding_size], &device),
                    factor: config.center_loss_factor,
                    alpha:  config.center_alpha,
                }),
            },
            LossType::Triplet => TrainingMode::Triplet { alpha: config.alpha },
        };

        // ── Optimizer ─────────────────────────────────────────────────────────
        let mut optim: FaceOptim<B> = FaceOptim::new(optimizer_kind);
        tracing::info!("Optimizer: {} (lr = {})", optimizer_kind, config.learning_rate);

        // ── Checkpoint restore ────────────────────────────────────────────────
        let checkpoints = CheckpointManager::new(&config.ckpt_dir, config.max_to_keep)?;
        let shape = SnapshotShape {
            has_centers:    mode.centers().is_some(),
            class_count,
            embedding_size: config.embedding_size,
            optimizer:      optimizer_kind,
        };
        let start_epoch = match checkpoints.restore::<B>(shape, &device)? {
            Some(snapshot) => {
                model = model.load_record(snapshot.model);
                optim = optim.load_record(snapshot.optim);
                if let (TrainingMode::Logit { center: Some(c), .. }, Some(table)) =
                    (&mut mode, snapshot.centers)
                {
                    c.table = table;
                }
                tracing::info!("Restored from {}", snapshot.path.display());
                snapshot.meta.epoch + 1
            }
            None => {
                tracing::info!("Initializing from scratch.");
                0
            }
        };

        // ── Validation + summaries ────────────────────────────────────────────
        let validator = PairValidator::new(valid_data, config.image_size, config.batch_size);
        let run       = run_dir(&config.summary_dir);

        Ok(Self {
            optimizer_kind,
            provider,
            device,
            model,
            optim,
            mode,
            checkpoints,
            validator,
            train_summary: SummaryWriter::new(run.join("train")),
            valid_summary: SummaryWriter::new(run.join("valid")),
            train_data,
            start_epoch,
            config,
        })
    }

    pub fn model(&self) -> &FaceModel<B> {
        &self.model
    }

    pub fn mode(&self) -> &TrainingMode<B> {
        &self.mode
    }

    pub fn optimizer_kind(&self) -> OptimizerKind {
        self.optimizer_kind
    }

    /// First epoch index `train` will run.
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Write the run configuration next to the checkpoints.
    pub fn save_config(&self) -> Result<()> {
        self.checkpoints.save_config(&self.config)
    }

    /// Run epochs `start_epoch .. epoch_num`.
    pub fn train(&mut self) -> Result<Vec<EpochReport>> {
        if self.start_epoch >= self.config.epoch_num {
            tracing::info!(
                "Checkpoint already covers {} epochs, nothing to train",
                self.config.epoch_num
            );
        }
        let mut reports = Vec::new();
        for epoch in self.start_epoch..self.config.epoch_num {
            reports.push(self.run_epoch(epoch)?);
        }
        self.start_epoch = self.start_epoch.max(self.config.epoch_num);
        tracing::info!("Training complete!");
        Ok(reports)
    }

    fn run_epoch(&mut self, epoch: usize) -> Result<EpochReport> {
        let started = Instant::now();
        let mut phase    = EpochPhase::EpochStart;
        let mut triplets = None;
        let mut losses   = Vec::new();
        let mut metrics  = ValidationMetrics::default();
        let mut saved    = PathBuf::new();

        loop {
            tracing::debug!("epoch {epoch}: {phase:?}");
            phase = match phase {
                EpochPhase::EpochStart => match self.mode.loss_type() {
                    LossType::Logit => EpochPhase::Training,
                    LossType::Triplet => {
                        let inference = self.model.valid();
                        let (data, count) =
                            self.provider.get_train_triplets_data(&inference, &self.device)?;
                        tracing::info!("triplets num is {count}");
                        if count > 0 {
                            triplets = Some(data);
                            EpochPhase::Training
                        } else {
                            tracing::warn!("No triplets mined for epoch {epoch}, skipping training");
                            EpochPhase::Validating
                        }
                    }
                },

                EpochPhase::Training => {
                    losses = match triplets.take() {
                        Some(data) => self.train_triplets(epoch, data)?,
                        None       => self.train_logits(epoch)?,
                    };
                    EpochPhase::Validating
                }

                EpochPhase::Validating => {
                    metrics = self.validate(epoch)?;
                    EpochPhase::Checkpointing
                }

                EpochPhase::Checkpointing => {
                    saved = self
                        .checkpoints
                        .save(&self.model, &self.optim, self.mode.centers(), epoch)?;
                    tracing::info!("Saving checkpoint for epoch {} at {}", epoch, saved.display());
                    EpochPhase::EpochEnd
                }

                EpochPhase::EpochEnd => break,
            };
        }

        let elapsed = started.elapsed();
        tracing::info!("Time taken for epoch {} is {:.3} sec", epoch, elapsed.as_secs_f64());

        let mean_loss = (!losses.is_empty()).then(|| losses.iter().sum::<f64>() / losses.len() as f64);
        Ok(EpochReport {
            epoch,
            steps: losses.len(),
            mean_loss,
            metrics,
            checkpoint: saved,
            elapsed,
        })
    }

    // ── Training phases ───────────────────────────────────────────────────────

    fn train_logits(&mut self, epoch: usize) -> Result<Vec<f64>> {
        let batcher = FaceBatcher::<B>::new(self.device.clone(), self.config.image_size);
        let mut builder = DataLoaderBuilder::new(batcher)
            .batch_size(self.config.batch_size)
            .shuffle(self.config.seed.wrapping_add(epoch as u64));
        if self.config.num_workers > 0 {
            builder = builder.num_workers(self.config.num_workers);
        }
        let expected = self.train_data.len();
        let loader   = builder.build(self.train_data.clone());

        let mut totals = Vec::new();
        let mut seen   = 0;
        for (step, batch) in loader.iter().enumerate() {
            seen += batch.labels.dims()[0];
            let l = self.logit_step(batch)?;
            if !l.total.is_finite() {
                bail!("Loss became non-finite at epoch {epoch}, step {step}");
            }
            self.train_summary.scalars(
                step,
                &[("loss", l.total), ("logit_loss", l.margin), ("center_loss", l.center)],
            )?;
            tracing::info!(
                "epoch: {}, step: {}, loss = {:.6}, logit_loss = {:.6}, center_loss = {:.6}",
                epoch, step, l.total, l.margin, l.center
            );
            totals.push(l.total);
        }
        check_exhausted(epoch, seen, expected)?;
        Ok(totals)
    }

    fn train_triplets(&mut self, epoch: usize, data: TripletDataset<P::Dataset>) -> Result<Vec<f64>> {
        let batcher = TripletBatcher::<B>::new(self.device.clone(), self.config.image_size);
        let mut builder = DataLoaderBuilder::new(batcher)
            .batch_size(self.config.batch_size)
            .shuffle(self.config.seed.wrapping_add(epoch as u64));
        if self.config.num_workers > 0 {
            builder = builder.num_workers(self.config.num_workers);
        }
        let expected = data.len();
        let loader   = builder.build(data);

        let mut totals = Vec::new();
        let mut seen   = 0;
        for (step, batch) in loader.iter().enumerate() {
            seen += batch.anchor.dims()[0];
            let loss = self.triplet_step(batch)?;
            if !loss.is_finite() {
                bail!("Loss became non-finite at epoch {epoch}, step {step}");
            }
            self.train_summary.scalar("loss", step, loss)?;
            tracing::info!("epoch: {}, step: {}, loss = {:.6}", epoch, step, loss);
            totals.push(loss);
        }
        check_exhausted(epoch, seen, expected)?;
        Ok(totals)
    }

    // ── Steps ─────────────────────────────────────────────────────────────────

    fn logit_step(&mut self, batch: FaceBatch<B>) -> Result<StepLosses> {
        let TrainingMode::Logit { margins, center } = &mut self.mode else {
            bail!("classification step requested in triplet mode");
        };
        let m = *margins;

        let out    = self.model.forward(batch.images);
        let margin = margin_loss(
            out.embedding.clone(),
            out.norm_logits,
            batch.labels.clone(),
            m.m1,
            m.m2,
            m.m3,
            m.scale,
        );

        // the new table is held back until the optimizer step is done
        let (total, center_value, updated) = match center.as_ref() {
            Some(c) => {
                let (ct_loss, table) = center_loss(out.embedding, batch.labels, c.table.clone(), c.alpha);
                let total = margin.clone() + ct_loss.clone().mul_scalar(c.factor);
                (total, scalar(&ct_loss), Some(table))
            }
            None => (margin.clone(), 0.0, None),
        };

        let losses = StepLosses {
            total:  scalar(&total),
            margin: scalar(&margin),
            center: center_value,
        };

        let grads  = GradientsParams::from_grads(total.backward(), &self.model);
        self.model = self.optim.step(self.config.learning_rate, self.model.clone(), grads);

        if let (Some(c), Some(table)) = (center.as_mut(), updated) {
            c.table = table.detach();
        }
        Ok(losses)
    }

    fn triplet_step(&mut self, batch: TripletBatch<B>) -> Result<f64> {
        let TrainingMode::Triplet { alpha } = &self.mode else {
            bail!("triplet step requested in classification mode");
        };
        let alpha = *alpha;

        let anchor   = self.model.embed(batch.anchor);
        let positive = self.model.embed(batch.positive);
        let negative = self.model.embed(batch.negative);

        let loss  = triplet_loss(anchor, positive, negative, alpha);
        let value = scalar(&loss);

        let grads  = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.config.learning_rate, self.model.clone(), grads);
        Ok(value)
    }

    // ── Validation ────────────────────────────────────────────────────────────

    fn validate(&self, epoch: usize) -> Result<ValidationMetrics> {
        let m = self.validator.get_metric(
            &self.model.valid(),
            &self.device,
            self.config.thresh,
            self.config.below_fpr,
        )?;
        self.valid_summary.scalars(epoch, &m.scalars())?;
        tracing::info!(
            "epoch: {}, acc: {:.3}, p: {:.3}, r=tpr: {:.3}, fpr: {:.3}",
            epoch, m.acc, m.precision, m.recall, m.fpr
        );
        tracing::info!(
            "fix fpr <= {}, acc: {:.3}, p: {:.3}, r=tpr: {:.3}, thresh: {:.3}",
            self.config.below_fpr, m.acc_fpr, m.p_fpr, m.r_fpr, m.thresh_fpr
        );
        Ok(m)
    }
}
