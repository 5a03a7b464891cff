// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe a training run. Nothing in
// here touches Burn tensors or the filesystem, so everything
// is unit-testable without a device.
//
//   config.rs — the YAML training configuration and the closed
//               enums (loss type, optimizer kind, backbone)
//               resolved from it
//   error.rs  — typed configuration / checkpoint errors
//   sample.rs — framework-free sample records handed from the
//               data layer to the batchers and the validator

pub mod config;

pub mod error;

pub mod sample;
