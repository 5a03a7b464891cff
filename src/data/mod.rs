// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between face images on disk and tensor batches:
//
//   identity folders
//       │
//       ▼
//   FolderProvider    → scans identities, splits off validation
//       │               images, decodes pixels lazily
//       ▼
//   Dataset           → Burn Dataset<FaceItem> (or TripletDataset
//       │               after mining)
//       ▼
//   Batcher           → stacks samples into image tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the Trainer
//
// The Trainer never sees the folder layout; it is written
// against the `DataProvider` trait.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// The provider contract the Trainer depends on
pub mod provider;

/// Identity-per-directory image provider
pub mod folder;

/// In-memory Dataset over decoded samples
pub mod dataset;

/// Burn Batchers for labelled images and triplets
pub mod batcher;

/// Semi-hard triplet mining and the triplet dataset view
pub mod triplets;

/// Seeded train/validation split and verification pair sampling
pub mod splitter;

#[cfg(test)]
pub mod synthetic;
