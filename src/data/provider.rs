// ============================================================
// Layer 4 — Data Provider Contract
// ============================================================
// The Trainer only ever talks to its data through this trait:
//
//   get_train_data()          → (labelled dataset, class count)
//   get_val_data(n)           → n verification pairs
//   get_train_triplets_data() → freshly mined triplets for the
//                               current model, and their count
//
// Triplet mining is the same for every provider, so it has a
// default implementation on top of `get_train_data` and the
// provider's `TripletMiner`.

use anyhow::Result;
use burn::{data::dataset::Dataset, prelude::*};

use crate::data::triplets::{TripletDataset, TripletMiner};
use crate::domain::sample::{FaceItem, ValidationSet};
use crate::ml::model::FaceModel;

pub trait DataProvider {
    /// Cheap-to-clone labelled dataset.
    type Dataset: Dataset<FaceItem> + Clone + 'static;

    fn get_train_data(&self) -> Result<(Self::Dataset, usize)>;

    fn get_val_data(&self, n: usize) -> Result<ValidationSet>;

    fn miner(&self) -> &TripletMiner;

    fn get_train_triplets_data<B: Backend>(
        &self,
        model:  &FaceModel<B>,
        device: &B::Device,
    ) -> Result<(TripletDataset<Self::Dataset>, usize)> {
        let (dataset, _) = self.get_train_data()?;
        self.miner().mine(model, dataset, device)
    }
}
