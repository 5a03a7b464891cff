// ============================================================
// Layer 3 — Typed Errors
// ============================================================
// Most of the crate propagates anyhow::Result. These enums
// exist for the failures a caller needs to tell apart:
// configuration problems (fatal, raised before any state is
// created) and checkpoint problems (fatal, raised on restore).
// Recover them with `err.downcast_ref::<ConfigError>()`.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::config::OptimizerKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid optimization algorithm '{0}' (expected one of ADADELTA, ADAGRAD, ADAM, ADAMAX, FTRL, NADAM, RMSPROP, SGD)")]
    UnknownOptimizer(String),

    #[error("Invalid loss type '{0}' (expected 'logit' or 'triplet')")]
    UnknownLossType(String),

    #[error("Unknown backbone '{0}' (expected resnet18, resnet34, resnet50, resnet101 or resnet152)")]
    UnknownBackbone(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint path '{0}' exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("Checkpoint pointer '{path}' is unreadable: {reason}")]
    CorruptPointer { path: PathBuf, reason: String },

    #[error("Checkpoint '{path}' cannot be read: {reason}")]
    UnreadableSnapshot { path: PathBuf, reason: String },

    #[error("Checkpoint '{path}' has format version {found}, this build reads version {expected}")]
    UnsupportedVersion { path: PathBuf, found: u32, expected: u32 },

    #[error("Checkpoint '{path}' center table presence (saved: {saved}) does not match this run's center-loss setting")]
    CenterMismatch { path: PathBuf, saved: bool },

    #[error("Checkpoint '{path}' was written for {saved} classes, this run has {current}")]
    ClassCountMismatch { path: PathBuf, saved: usize, current: usize },

    #[error("Checkpoint '{path}' has embedding size {saved}, this run uses {current}")]
    EmbeddingSizeMismatch { path: PathBuf, saved: usize, current: usize },

    #[error("Checkpoint '{path}' holds {saved} optimizer state, this run uses {current}")]
    OptimizerMismatch { path: PathBuf, saved: OptimizerKind, current: OptimizerKind },
}
