// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Persistence concerns shared by the Trainer and the CLI:
//
//   checkpoint.rs — Versioned training snapshots (model,
//                   optimizer slots, optional center table)
//                   with retention, plus the saved run config.
//
//   metrics.rs    — Scalar summaries (step losses, epoch
//                   validation metrics) written as CSV.
//
// Reference: Burn Book §5 (Checkpointing)

/// Snapshot saving, pruning and restoring
pub mod checkpoint;

/// Train / valid scalar summaries
pub mod metrics;
