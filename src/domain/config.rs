// ============================================================
// Layer 3 — Training Configuration
// ============================================================
// One YAML file describes a whole run. It is loaded once and
// never mutated afterwards.
//
// `loss_type` and `optimizer` stay plain strings in the file
// format; they are resolved into closed enums exactly once,
// when the Trainer is built, so that an unknown value fails
// before any directory, weight or checkpoint work happens.
//
// Keys that minimal configuration files leave out
// (data paths, batch size, backbone, retention...) have serde
// defaults, so an older config still loads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use crate::domain::error::ConfigError;

// ─── Closed choices ──────────────────────────────────────────────────────────

/// Which of the two mutually exclusive training algorithms a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossType {
    /// Classification heads + combined angular margin (+ optional center loss)
    Logit,
    /// Anchor / positive / negative metric learning
    Triplet,
}

impl FromStr for LossType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logit"   => Ok(Self::Logit),
            "triplet" => Ok(Self::Triplet),
            other     => Err(ConfigError::UnknownLossType(other.to_string())),
        }
    }
}

/// The supported optimization algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptimizerKind {
    Adadelta,
    Adagrad,
    Adam,
    Adamax,
    Ftrl,
    Nadam,
    RmsProp,
    Sgd,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 8] = [
        Self::Adadelta,
        Self::Adagrad,
        Self::Adam,
        Self::Adamax,
        Self::Ftrl,
        Self::Nadam,
        Self::RmsProp,
        Self::Sgd,
    ];

    /// The name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adadelta => "ADADELTA",
            Self::Adagrad  => "ADAGRAD",
            Self::Adam     => "ADAM",
            Self::Adamax   => "ADAMAX",
            Self::Ftrl     => "FTRL",
            Self::Nadam    => "NADAM",
            Self::RmsProp  => "RMSPROP",
            Self::Sgd      => "SGD",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownOptimizer(s.to_string()))
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Residual block flavour used by the ResNet backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Two 3x3 convolutions, output width = filters
    Basic,
    /// 1x1 → 3x3 → 1x1 convolutions, output width = 4 * filters
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(&self) -> usize {
        match self {
            Self::Basic      => 1,
            Self::Bottleneck => 4,
        }
    }
}

/// Backbone selection in the config file: either a ResNet v1 name
/// or an explicit block kind + per-stage layer counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackboneChoice {
    Named(String),
    Custom { block: BlockKind, layers: [usize; 4] },
}

impl BackboneChoice {
    /// Resolve to (block kind, layers per stage).
    pub fn resolve(&self) -> Result<(BlockKind, [usize; 4]), ConfigError> {
        match self {
            Self::Custom { block, layers } => Ok((*block, *layers)),
            Self::Named(name) => match name.to_ascii_lowercase().as_str() {
                "resnet18"  => Ok((BlockKind::Basic,      [2, 2, 2, 2])),
                "resnet34"  => Ok((BlockKind::Basic,      [3, 4, 6, 3])),
                "resnet50"  => Ok((BlockKind::Bottleneck, [3, 4, 6, 3])),
                "resnet101" => Ok((BlockKind::Bottleneck, [3, 4, 23, 3])),
                "resnet152" => Ok((BlockKind::Bottleneck, [3, 8, 36, 3])),
                _ => Err(ConfigError::UnknownBackbone(name.clone())),
            },
        }
    }
}

// ─── TrainConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    // ── Loss / optimisation ──────────────────────────────────────────────────
    pub loss_type:          String,
    pub optimizer:          String,
    pub learning_rate:      f64,
    pub epoch_num:          usize,
    pub embedding_size:     usize,
    pub logits_margin1:     f64,
    pub logits_margin2:     f64,
    pub logits_margin3:     f64,
    pub logits_scale:       f64,
    /// Triplet margin
    pub alpha:              f64,
    pub center_loss_factor: f64,
    /// Center blend rate: a touched center keeps `center_alpha` of itself
    pub center_alpha:       f64,

    // ── Validation ───────────────────────────────────────────────────────────
    pub thresh:             f64,
    pub below_fpr:          f64,
    pub valid_num:          usize,

    // ── Output locations ─────────────────────────────────────────────────────
    pub ckpt_dir:           PathBuf,
    pub summary_dir:        PathBuf,

    // ── Data ─────────────────────────────────────────────────────────────────
    #[serde(default = "default_train_dir")]
    pub train_dir:          PathBuf,
    #[serde(default)]
    pub valid_dir:          Option<PathBuf>,
    #[serde(default = "default_valid_fraction")]
    pub valid_fraction:     f64,
    #[serde(default = "default_image_size")]
    pub image_size:         usize,
    #[serde(default = "default_batch_size")]
    pub batch_size:         usize,
    #[serde(default = "default_num_workers")]
    pub num_workers:        usize,
    #[serde(default = "default_max_triplets")]
    pub max_triplets:       usize,
    #[serde(default = "default_seed")]
    pub seed:               u64,

    // ── Model / checkpoints ──────────────────────────────────────────────────
    #[serde(default = "default_backbone")]
    pub backbone:           BackboneChoice,
    #[serde(default = "default_base_filters")]
    pub base_filters:       usize,
    #[serde(default = "default_max_to_keep")]
    pub max_to_keep:        usize,
}

fn default_train_dir() -> PathBuf       { PathBuf::from("data/train") }
fn default_valid_fraction() -> f64      { 0.1 }
fn default_image_size() -> usize        { 112 }
fn default_batch_size() -> usize        { 32 }
fn default_num_workers() -> usize       { 1 }
fn default_max_triplets() -> usize      { 2048 }
fn default_seed() -> u64                { 42 }
fn default_backbone() -> BackboneChoice { BackboneChoice::Named("resnet50".to_string()) }
fn default_base_filters() -> usize      { 64 }
fn default_max_to_keep() -> usize       { 5 }

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            loss_type:          "logit".to_string(),
            optimizer:          "ADAM".to_string(),
            learning_rate:      1e-3,
            epoch_num:          100,
            embedding_size:     512,
            logits_margin1:     1.0,
            logits_margin2:     0.5,
            logits_margin3:     0.0,
            logits_scale:       64.0,
            alpha:              0.2,
            center_loss_factor: 0.0,
            center_alpha:       0.9,
            thresh:             1.2,
            below_fpr:          0.001,
            valid_num:          1000,
            ckpt_dir:           PathBuf::from("output/ckpt"),
            summary_dir:        PathBuf::from("output/summary"),
            train_dir:          default_train_dir(),
            valid_dir:          None,
            valid_fraction:     default_valid_fraction(),
            image_size:         default_image_size(),
            batch_size:         default_batch_size(),
            num_workers:        default_num_workers(),
            max_triplets:       default_max_triplets(),
            seed:               default_seed(),
            backbone:           default_backbone(),
            base_filters:       default_base_filters(),
            max_to_keep:        default_max_to_keep(),
        }
    }
}

impl TrainConfig {
    /// Read a YAML configuration file. `~` in the path-valued keys
    /// is expanded against $HOME.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        let mut cfg: TrainConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Cannot parse config '{}'", path.display()))?;

        cfg.ckpt_dir    = expand_home(&cfg.ckpt_dir);
        cfg.summary_dir = expand_home(&cfg.summary_dir);
        cfg.train_dir   = expand_home(&cfg.train_dir);
        cfg.valid_dir   = cfg.valid_dir.as_deref().map(expand_home);
        Ok(cfg)
    }

    pub fn loss_kind(&self) -> Result<LossType, ConfigError> {
        self.loss_type.parse()
    }

    pub fn optimizer_kind(&self) -> Result<OptimizerKind, ConfigError> {
        self.optimizer.parse()
    }

    /// Center loss is only ever active in classification mode.
    pub fn center_loss_enabled(&self) -> bool {
        self.loss_type == "logit" && self.center_loss_factor > 0.0
    }

    /// Check every value the Trainer relies on. Runs before anything
    /// touches the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.loss_kind()?;
        self.optimizer_kind()?;
        self.backbone.resolve()?;

        let invalid = |key: &'static str, reason: &str| ConfigError::InvalidValue {
            key,
            reason: reason.to_string(),
        };

        if self.embedding_size == 0 { return Err(invalid("embedding_size", "must be > 0")); }
        if self.batch_size == 0     { return Err(invalid("batch_size", "must be > 0")); }
        if self.image_size < 2      { return Err(invalid("image_size", "must be >= 2")); }
        if self.base_filters == 0   { return Err(invalid("base_filters", "must be > 0")); }
        if self.max_to_keep == 0    { return Err(invalid("max_to_keep", "must be > 0")); }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("learning_rate", "must be > 0"));
        }
        // cos(m1·θ) is expanded with Chebyshev polynomials, so m1 is a multiplier
        if self.logits_margin1 < 1.0 || self.logits_margin1.fract() != 0.0 {
            return Err(invalid("logits_margin1", "must be a positive integer (1 for ArcFace/CosFace)"));
        }
        if !(0.0..1.0).contains(&self.center_alpha) {
            return Err(invalid("center_alpha", "must be in [0, 1)"));
        }
        if self.center_loss_factor < 0.0 {
            return Err(invalid("center_loss_factor", "must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.below_fpr) {
            return Err(invalid("below_fpr", "must be in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.valid_fraction) {
            return Err(invalid("valid_fraction", "must be in [0, 1)"));
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
