// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflow coordination only: read the configuration, pick the
// data provider and backend, hand both to the Trainer.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;
