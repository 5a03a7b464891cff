// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one training session from a YAML file:
//
//   Step 1: Load + validate the config    (Layer 3 - domain)
//   Step 2: Scan the image folders        (Layer 4 - data)
//   Step 3: Build the trainer / restore   (Layer 5 - ml)
//   Step 4: Save the resolved config      (Layer 6 - infra)
//   Step 5: Run the epochs                (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::data::folder::FolderProvider;
use crate::domain::config::TrainConfig;
use crate::ml::trainer::{EpochReport, Trainer};
use crate::ml::MyBackend;

pub struct TrainUseCase {
    config_path: PathBuf,
}

impl TrainUseCase {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self { config_path: config_path.as_ref().to_path_buf() }
    }

    /// Execute the full training session and return one report per epoch run.
    pub fn execute(&self) -> Result<Vec<EpochReport>> {
        // ── Step 1: Config ────────────────────────────────────────────────────
        tracing::info!("Loading config from '{}'", self.config_path.display());
        let cfg = TrainConfig::from_yaml_file(&self.config_path)?;
        cfg.validate()?;

        // ── Step 2: Data ──────────────────────────────────────────────────────
        let provider = FolderProvider::new(&cfg)?;

        // ── Step 3: Trainer ───────────────────────────────────────────────────
        let device  = Default::default();
        let mut trainer = Trainer::<MyBackend, _>::new(cfg, provider, device)?;

        // ── Step 4: Save config next to the checkpoints ───────────────────────
        trainer.save_config()?;

        // ── Step 5: Train ─────────────────────────────────────────────────────
        trainer.train()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ConfigError;

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainUseCase::new(dir.path().join("nope.yaml")).execute().unwrap_err();
        assert!(err.to_string().contains("Cannot read config"));
    }

    #[test]
    fn test_bad_optimizer_stops_before_scanning_data() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let yaml = format!(
            "loss_type: logit\noptimizer: LBFGS\nlearning_rate: 0.001\nepoch_num: 1\n\
             embedding_size: 8\nlogits_margin1: 1.0\nlogits_margin2: 0.5\nlogits_margin3: 0.0\n\
             logits_scale: 64\nalpha: 0.2\ncenter_loss_factor: 0.0\ncenter_alpha: 0.9\n\
             thresh: 1.2\nbelow_fpr: 0.001\nvalid_num: 10\nckpt_dir: {ckpt}\nsummary_dir: {summary}\n\
             train_dir: {train}\n",
            ckpt    = dir.path().join("ckpt").display(),
            summary = dir.path().join("summary").display(),
            train   = dir.path().join("missing").display(),
        );
        std::fs::write(&path, yaml).unwrap();

        let err = TrainUseCase::new(&path).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::UnknownOptimizer(_))));
        assert!(!dir.path().join("ckpt").exists());
    }
}
