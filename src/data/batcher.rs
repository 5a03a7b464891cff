// ============================================================
// Layer 4 — Face Batchers
// ============================================================
// Implements Burn's Batcher trait for the two training modes.
//
//   FaceBatcher:    Vec<FaceItem>    → images [N, 3, S, S] + labels [N]
//   TripletBatcher: Vec<TripletItem> → anchor / positive / negative,
//                                      each [N, 3, S, S]
//
// Every sample already carries a normalised CHW buffer of
// length 3·S·S, so batching is a flat concatenation followed
// by one reshape.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::sample::{FaceItem, TripletItem};

/// Stack flat CHW buffers into an image batch tensor.
pub fn pixels_to_tensor<'a, B: Backend>(
    buffers:    impl IntoIterator<Item = &'a Vec<f32>>,
    image_size: usize,
    device:     &B::Device,
) -> Tensor<B, 4> {
    let mut flat  = Vec::new();
    let mut count = 0usize;
    for buf in buffers {
        flat.extend_from_slice(buf);
        count += 1;
    }
    Tensor::from_data(TensorData::new(flat, [count, 3, image_size, image_size]), device)
}

// ─── Classification batches ───────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FaceBatch<B: Backend> {
    /// [batch, 3, size, size]
    pub images: Tensor<B, 4>,
    /// [batch] class indices
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct FaceBatcher<B: Backend> {
    device:     B::Device,
    image_size: usize,
}

impl<B: Backend> FaceBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<FaceItem, FaceBatch<B>> for FaceBatcher<B> {
    fn batch(&self, items: Vec<FaceItem>) -> FaceBatch<B> {
        let labels: Vec<i64> = items.iter().map(|s| s.label as i64).collect();
        let count = labels.len();

        let images = pixels_to_tensor::<B>(items.iter().map(|s| &s.pixels), self.image_size, &self.device);
        let labels = Tensor::from_data(TensorData::new(labels, [count]), &self.device);

        FaceBatch { images, labels }
    }
}

// ─── Triplet batches ──────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TripletBatch<B: Backend> {
    pub anchor:   Tensor<B, 4>,
    pub positive: Tensor<B, 4>,
    pub negative: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct TripletBatcher<B: Backend> {
    device:     B::Device,
    image_size: usize,
}

impl<B: Backend> TripletBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<TripletItem, TripletBatch<B>> for TripletBatcher<B> {
    fn batch(&self, items: Vec<TripletItem>) -> TripletBatch<B> {
        let stack = |pick: fn(&TripletItem) -> &Vec<f32>| {
            pixels_to_tensor::<B>(items.iter().map(pick), self.image_size, &self.device)
        };
        TripletBatch {
            anchor:   stack(|t| &t.anchor),
            positive: stack(|t| &t.positive),
            negative: stack(|t| &t.negative),
        }
    }
}
