// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Versioned training snapshots, written with Burn's
// NamedMpkGzFileRecorder at full precision so that a resumed
// run continues from bit-identical weights.
//
// Layout:
//   ckpt_dir/
//     checkpoint.json       ← pointer: latest snapshot + retained list
//     train_config.json     ← the configuration of the run
//     ckpt-7/
//       backbone.mpk.gz     ← embedding network alone (for consumers)
//       model.mpk.gz        ← backbone + both classifier heads
//       optimizer.mpk.gz    ← per-parameter optimizer slots
//       centers.mpk.gz      ← center table, only when center loss is on
//       meta.json           ← format version, counters, shapes
//
// A snapshot is first written to a hidden staging directory,
// renamed into place, and only then published through the
// pointer (itself replaced via write-to-temp + rename). At most
// `max_to_keep` snapshots are retained; older ones are removed
// after the pointer no longer names them.
//
// Nothing is created on disk until the first save.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    module::Module,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::domain::config::{OptimizerKind, TrainConfig};
use crate::domain::error::CheckpointError;
use crate::ml::model::{FaceModel, FaceModelRecord};
use crate::ml::optim::{FaceOptim, FaceOptimRecord};

pub const FORMAT_VERSION: u32 = 1;

const POINTER_FILE:    &str = "checkpoint.json";
const CONFIG_FILE:     &str = "train_config.json";
const META_FILE:       &str = "meta.json";
const SNAPSHOT_PREFIX: &str = "ckpt-";

pub type OptimizerRecord<B> = FaceOptimRecord<B, FaceModel<B>>;

/// The parts of a run a snapshot must agree with to be restorable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotShape {
    /// Whether a center table was saved (center loss on, logit mode)
    pub has_centers:    bool,
    /// Rows of the cosine head, one per training identity
    pub class_count:    usize,
    /// Width of the embedding the backbone produces
    pub embedding_size: usize,
    /// Algorithm whose slots `optimizer.mpk.gz` holds
    pub optimizer:      OptimizerKind,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Layout version, compared against `FORMAT_VERSION` on restore
    pub format_version: u32,
    /// Sequence number of this snapshot, also its directory suffix
    pub save_counter:   u64,
    /// Epoch that was complete when the snapshot was taken
    pub epoch:          usize,
    #[serde(flatten)]
    pub shape:          SnapshotShape,
}

/// Contents of `checkpoint.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Pointer {
    /// Directory name of the newest snapshot
    latest:       String,
    /// Snapshot directory names still on disk, oldest first
    retained:     Vec<String>,
    /// Counter of the last save; the next snapshot gets `save_counter + 1`
    save_counter: u64,
}

/// Records loaded from the latest snapshot, ready to be applied.
pub struct Snapshot<B: AutodiffBackend> {
    pub path:    PathBuf,
    pub meta:    CheckpointMeta,
    pub model:   FaceModelRecord<B>,
    pub optim:   OptimizerRecord<B>,
    pub centers: Option<Tensor<B, 2>>,
}

pub struct CheckpointManager {
    dir:         PathBuf,
    max_to_keep: usize,
    recorder:    NamedMpkGzFileRecorder<FullPrecisionSettings>,
}

impl CheckpointManager {
    /// Fails if `dir` exists but is not a directory. Does not create it.
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(CheckpointError::NotADirectory(dir).into());
        }
        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
            recorder: NamedMpkGzFileRecorder::new(),
        })
    }

    /// Path of the newest snapshot, if the pointer names one.
    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        Ok(self.read_pointer()?.map(|p| self.dir.join(p.latest)))
    }

    /// Paths of all retained snapshots, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .read_pointer()?
            .map(|p| p.retained.iter().map(|name| self.dir.join(name)).collect())
            .unwrap_or_default())
    }

    fn read_pointer(&self) -> Result<Option<Pointer>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        if !self.dir.is_dir() {
            return Err(CheckpointError::NotADirectory(self.dir.clone()).into());
        }

        let path = self.dir.join(POINTER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| CheckpointError::CorruptPointer { path: path.clone(), reason };

        let text = fs::read_to_string(&path).map_err(|e| corrupt(e.to_string()))?;
        let pointer: Pointer = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        if pointer.latest.is_empty() || !pointer.retained.contains(&pointer.latest) {
            return Err(corrupt("no latest snapshot recorded".to_string()).into());
        }
        Ok(Some(pointer))
    }

    fn write_pointer(&self, pointer: &Pointer) -> Result<()> {
        let path = self.dir.join(POINTER_FILE);
        let tmp  = self.dir.join(format!("{POINTER_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(pointer)?)
            .with_context(|| format!("Cannot write '{}'", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Cannot replace '{}'", path.display()))?;
        Ok(())
    }

    /// Write a new snapshot and return its path.
    pub fn save<B: AutodiffBackend>(
        &self,
        model:   &FaceModel<B>,
        optim:   &FaceOptim<B>,
        centers: Option<&Tensor<B, 2>>,
        epoch:   usize,
    ) -> Result<PathBuf> {
        let mut pointer = self.read_pointer()?.unwrap_or_default();
        let counter = pointer.save_counter + 1;
        let name    = format!("{SNAPSHOT_PREFIX}{counter}");

        // ── Stage ─────────────────────────────────────────────────────────────
        let staging = self.dir.join(format!(".{name}.partial"));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Cannot clear '{}'", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Cannot create '{}'", staging.display()))?;

        self.recorder
            .record(model.backbone.clone().into_record(), staging.join("backbone"))
            .with_context(|| format!("Failed to save backbone to '{}'", staging.display()))?;
        self.recorder
            .record(model.clone().into_record(), staging.join("model"))
            .with_context(|| format!("Failed to save model to '{}'", staging.display()))?;
        self.recorder
            .record(optim.to_record(), staging.join("optimizer"))
            .with_context(|| format!("Failed to save optimizer to '{}'", staging.display()))?;
        if let Some(table) = centers {
            self.recorder
                .record(table.clone(), staging.join("centers"))
                .with_context(|| format!("Failed to save centers to '{}'", staging.display()))?;
        }

        let meta = CheckpointMeta {
            format_version: FORMAT_VERSION,
            save_counter:   counter,
            epoch,
            shape: SnapshotShape {
                has_centers:    centers.is_some(),
                class_count:    model.classes(),
                embedding_size: model.norm_dense.weight.dims()[0],
                optimizer:      optim.kind(),
            },
        };
        fs::write(staging.join(META_FILE), serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("Cannot write meta.json in '{}'", staging.display()))?;

        // ── Publish ───────────────────────────────────────────────────────────
        let target = self.dir.join(&name);
        if target.exists() {
            fs::remove_dir_all(&target)
                .with_context(|| format!("Cannot replace '{}'", target.display()))?;
        }
        fs::rename(&staging, &target)
            .with_context(|| format!("Cannot move snapshot into '{}'", target.display()))?;

        pointer.retained.push(name.clone());
        pointer.latest       = name;
        pointer.save_counter = counter;
        let excess  = pointer.retained.len().saturating_sub(self.max_to_keep);
        let expired: Vec<String> = pointer.retained.drain(..excess).collect();
        self.write_pointer(&pointer)?;

        // ── Prune ─────────────────────────────────────────────────────────────
        for old in expired {
            let path = self.dir.join(&old);
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!("Cannot remove old checkpoint '{}': {}", path.display(), e);
            }
        }

        tracing::debug!("Saved checkpoint {} for epoch {}", target.display(), epoch);
        Ok(target)
    }

    /// Load the latest snapshot, checking it against the current run.
    /// `Ok(None)` means there is nothing to restore.
    pub fn restore<B: AutodiffBackend>(
        &self,
        expected: SnapshotShape,
        device:   &B::Device,
    ) -> Result<Option<Snapshot<B>>> {
        let Some(pointer) = self.read_pointer()? else {
            return Ok(None);
        };
        let path = self.dir.join(&pointer.latest);
        let unreadable = |reason: String| CheckpointError::UnreadableSnapshot { path: path.clone(), reason };

        let meta_text = fs::read_to_string(path.join(META_FILE)).map_err(|e| unreadable(e.to_string()))?;
        let meta: CheckpointMeta = serde_json::from_str(&meta_text).map_err(|e| unreadable(e.to_string()))?;

        // ── Compatibility ─────────────────────────────────────────────────────
        if meta.format_version != FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path,
                found:    meta.format_version,
                expected: FORMAT_VERSION,
            }
            .into());
        }
        if meta.shape.has_centers != expected.has_centers {
            return Err(CheckpointError::CenterMismatch { path, saved: meta.shape.has_centers }.into());
        }
        if meta.shape.class_count != expected.class_count {
            return Err(CheckpointError::ClassCountMismatch {
                path,
                saved:   meta.shape.class_count,
                current: expected.class_count,
            }
            .into());
        }
        if meta.shape.embedding_size != expected.embedding_size {
            return Err(CheckpointError::EmbeddingSizeMismatch {
                path,
                saved:   meta.shape.embedding_size,
                current: expected.embedding_size,
            }
            .into());
        }
        if meta.shape.optimizer != expected.optimizer {
            return Err(CheckpointError::OptimizerMismatch {
                path,
                saved:   meta.shape.optimizer,
                current: expected.optimizer,
            }
            .into());
        }

        // ── Records ───────────────────────────────────────────────────────────
        let model: FaceModelRecord<B> = self
            .recorder
            .load(path.join("model"), device)
            .map_err(|e| unreadable(format!("model record: {e}")))?;
        let optim: OptimizerRecord<B> = self
            .recorder
            .load(path.join("optimizer"), device)
            .map_err(|e| unreadable(format!("optimizer record: {e}")))?;
        let centers = if meta.shape.has_centers {
            let table: Tensor<B, 2> = self
                .recorder
                .load(path.join("centers"), device)
                .map_err(|e| unreadable(format!("centers record: {e}")))?;
            Some(table)
        } else {
            None
        };

        Ok(Some(Snapshot { path, meta, model, optim, centers }))
    }

    /// Save the run configuration next to the snapshots.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{BlockKind, OptimizerKind};
    use crate::ml::model::FaceModelConfig;
    use burn::{backend::{Autodiff, NdArray}, module::AutodiffModule};

    type TB = Autodiff<NdArray<f32>>;

    fn tiny_model() -> FaceModel<TB> {
        FaceModelConfig::new(BlockKind::Basic, [1, 1, 1, 1], 8, 3)
            .with_base_filters(4)
            .init(&Default::default())
    }

    fn optimizer() -> FaceOptim<TB> {
        FaceOptim::new(OptimizerKind::Adam)
    }

    fn shape(has_centers: bool) -> SnapshotShape {
        SnapshotShape { has_centers, class_count: 3, embedding_size: 8, optimizer: OptimizerKind::Adam }
    }

    #[test]
    fn test_missing_dir_means_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("ckpt"), 5).unwrap();
        assert!(mgr.latest_checkpoint().unwrap().is_none());
        assert!(mgr.restore::<TB>(shape(false), &Default::default()).unwrap().is_none());
        // nothing was created
        assert!(!dir.path().join("ckpt").exists());
    }

    #[test]
    fn test_file_in_place_of_dir_is_rejected() {
        let dir  = tempfile::tempdir().unwrap();
        let file = dir.path().join("ckpt");
        fs::write(&file, "not a directory").unwrap();
        let err = CheckpointManager::new(&file, 5).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir   = tempfile::tempdir().unwrap();
        let mgr   = CheckpointManager::new(dir.path(), 2).unwrap();
        let model = tiny_model();
        let optim = optimizer();

        for epoch in 0..3 {
            mgr.save(&model, &optim, None, epoch).unwrap();
        }
        let kept = mgr.snapshots().unwrap();
        assert_eq!(kept, vec![dir.path().join("ckpt-2"), dir.path().join("ckpt-3")]);
        assert!(!dir.path().join("ckpt-1").exists());
        assert!(dir.path().join("ckpt-3").join("backbone.mpk.gz").exists());
        assert_eq!(mgr.latest_checkpoint().unwrap(), Some(dir.path().join("ckpt-3")));
    }

    #[test]
    fn test_restore_reproduces_embeddings() {
        let dir    = tempfile::tempdir().unwrap();
        let mgr    = CheckpointManager::new(dir.path(), 5).unwrap();
        let device = Default::default();
        let model  = tiny_model();
        mgr.save(&model, &optimizer(), None, 4).unwrap();

        let snap = mgr.restore::<TB>(shape(false), &device).unwrap().unwrap();
        assert_eq!(snap.meta.epoch, 4);
        assert_eq!(snap.meta.save_counter, 1);
        assert!(snap.centers.is_none());
        let restored = tiny_model().load_record(snap.model);

        let images = Tensor::<NdArray<f32>, 4>::random(
            [2, 3, 16, 16],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let a: Vec<f32> = model.valid().embed(images.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = restored.valid().embed(images).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_center_presence_mismatch() {
        let dir     = tempfile::tempdir().unwrap();
        let mgr     = CheckpointManager::new(dir.path(), 5).unwrap();
        let device  = Default::default();
        let centers = Tensor::<TB, 2>::ones([3, 8], &device);
        mgr.save(&tiny_model(), &optimizer(), Some(&centers), 0).unwrap();

        let err = mgr.restore::<TB>(shape(false), &device).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::CenterMismatch { saved: true, .. })
        ));

        let snap = mgr.restore::<TB>(shape(true), &device).unwrap().unwrap();
        let table: Vec<f32> = snap.centers.unwrap().into_data().to_vec().unwrap();
        assert!(table.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_class_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5).unwrap();
        mgr.save(&tiny_model(), &optimizer(), None, 0).unwrap();
        let wider = SnapshotShape { class_count: 10, ..shape(false) };
        let err = mgr.restore::<TB>(wider, &Default::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::ClassCountMismatch { saved: 3, current: 10, .. })
        ));
    }

    #[test]
    fn test_optimizer_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5).unwrap();
        let path = mgr.save(&tiny_model(), &optimizer(), None, 0).unwrap();

        let meta: CheckpointMeta =
            serde_json::from_str(&fs::read_to_string(path.join(META_FILE)).unwrap()).unwrap();
        assert_eq!(meta.shape.optimizer, OptimizerKind::Adam);

        let sgd = SnapshotShape { optimizer: OptimizerKind::Sgd, ..shape(false) };
        let err = mgr.restore::<TB>(sgd, &Default::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::OptimizerMismatch {
                saved:   OptimizerKind::Adam,
                current: OptimizerKind::Sgd,
                ..
            })
        ));
    }

    #[test]
    fn test_optimizer_slots_survive_a_round_trip() {
        use crate::ml::loss::margin_loss;
        use burn::{
            optim::GradientsParams,
            record::{FullPrecisionSettings as Full, Record},
        };

        let dir    = tempfile::tempdir().unwrap();
        let mgr    = CheckpointManager::new(dir.path(), 5).unwrap();
        let device = Default::default();
        let mut model = tiny_model();
        let mut optim = optimizer();

        let images = Tensor::<TB, 4>::random([3, 3, 16, 16], burn::tensor::Distribution::Default, &device);
        let labels = Tensor::<TB, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 2], [3]), &device);
        let out    = model.forward(images);
        let loss   = margin_loss(out.embedding, out.norm_logits, labels, 1.0, 0.0, 0.0, 8.0);
        let grads  = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(0.01, model, grads);

        mgr.save(&model, &optim, None, 0).unwrap();
        let snap = mgr.restore::<TB>(shape(false), &device).unwrap().unwrap();
        let restored = optimizer().load_record(snap.optim);

        let FaceOptimRecord::Adam(saved) = optim.to_record() else {
            panic!("Adam record expected");
        };
        assert!(!saved.is_empty());
        let before = serde_json::to_value(optim.to_record().into_item::<Full>()).unwrap();
        let after  = serde_json::to_value(restored.to_record().into_item::<Full>()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_corrupt_pointer_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(POINTER_FILE), "{ not json").unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5).unwrap();
        let err = mgr.restore::<TB>(shape(false), &Default::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::CorruptPointer { .. })
        ));
    }

    #[test]
    fn test_pointer_to_missing_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5).unwrap();
        mgr.save(&tiny_model(), &optimizer(), None, 0).unwrap();
        fs::remove_dir_all(dir.path().join("ckpt-1")).unwrap();
        let err = mgr.restore::<TB>(shape(false), &Default::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::UnreadableSnapshot { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5).unwrap();
        let path = mgr.save(&tiny_model(), &optimizer(), None, 0).unwrap();

        let meta_path = path.join(META_FILE);
        let mut meta: CheckpointMeta =
            serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta.format_version = 99;
        fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let err = mgr.restore::<TB>(shape(false), &Default::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::UnsupportedVersion { found: 99, expected: 1, .. })
        ));
    }
}
