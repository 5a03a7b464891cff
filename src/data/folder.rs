// ============================================================
// Layer 4 — Folder Data Provider
// ============================================================
// Reads a face dataset laid out one directory per identity:
//
//   train_dir/
//     alice/ 0001.jpg 0002.jpg ...
//     bob/   0001.png ...
//
// Identities are sorted by directory name and numbered from 0,
// which gives a stable label ↔ identity mapping across runs.
// Only image headers are read during the scan; pixels
// are decoded lazily in `Dataset::get`, so the DataLoader's
// worker threads do the decoding.
//
// Every decoded image is resized to image_size × image_size,
// converted to RGB and normalised as (x − 127.5) / 128 into a
// CHW buffer.
//
// Validation pairs come from `valid_dir` when configured,
// otherwise from a seeded held-out split of `train_dir`.
//
// Reference: image crate documentation

use anyhow::{anyhow, bail, Context, Result};
use burn::data::dataset::Dataset;
use image::imageops::FilterType;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::data::provider::DataProvider;
use crate::data::splitter::{sample_pairs, split_train_val};
use crate::data::triplets::{MiningConfig, TripletMiner};
use crate::domain::config::TrainConfig;
use crate::domain::sample::{FaceItem, ValidationSet};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Decode one image file into a normalised CHW buffer.
pub fn load_face(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("Cannot decode image '{}'", path.display()))?;
    let rgb = img
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8();

    let plane = image_size * image_size;
    let mut chw = vec![0.0f32; 3 * plane];
    for (i, px) in rgb.pixels().enumerate() {
        for c in 0..3 {
            chw[c * plane + i] = (px[c] as f32 - 127.5) / 128.0;
        }
    }
    Ok(chw)
}

/// Collect (file, label) entries from an identity-per-directory tree.
pub fn scan_identities(root: &Path) -> Result<(Vec<(PathBuf, usize)>, Vec<String>)> {
    let mut identities: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("Cannot read data directory '{}'", root.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    identities.sort();

    let mut entries = Vec::new();
    let mut names   = Vec::with_capacity(identities.len());
    for (label, dir) in identities.iter().enumerate() {
        names.push(
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Cannot read identity directory '{}'", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| has_image_extension(p))
            .collect();
        files.sort();

        for file in files {
            match image::image_dimensions(&file) {
                Ok(_)  => entries.push((file, label)),
                Err(e) => tracing::warn!("Skipping '{}': {}", file.display(), e),
            }
        }
    }

    if entries.is_empty() {
        bail!("No images found under '{}'", root.display());
    }
    tracing::debug!(
        "Scanned '{}': {} identities, {} images",
        root.display(),
        names.len(),
        entries.len()
    );
    Ok((entries, names))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ─── FolderDataset ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FolderDataset {
    entries:    Arc<Vec<(PathBuf, usize)>>,
    image_size: usize,
}

impl FolderDataset {
    pub fn new(entries: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        Self { entries: Arc::new(entries), image_size }
    }
}

impl Dataset<FaceItem> for FolderDataset {
    fn get(&self, index: usize) -> Option<FaceItem> {
        let (path, label) = self.entries.get(index)?;
        match load_face(path, self.image_size) {
            Ok(pixels) => Some(FaceItem { pixels, label: *label }),
            Err(e) => {
                tracing::error!("{e:#}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ─── FolderProvider ───────────────────────────────────────────────────────────
pub struct FolderProvider {
    train:       FolderDataset,
    class_count: usize,
    /// Pool the validation pairs are drawn from
    pair_pool:   Vec<(PathBuf, usize)>,
    image_size:  usize,
    seed:        u64,
    miner:       TripletMiner,
}

impl FolderProvider {
    pub fn new(cfg: &TrainConfig) -> Result<Self> {
        let (entries, names) = scan_identities(&cfg.train_dir)?;

        let (train_entries, pair_pool) = match &cfg.valid_dir {
            Some(valid_dir) => (entries, scan_identities(valid_dir)?.0),
            None => split_train_val(entries, 1.0 - cfg.valid_fraction, cfg.seed),
        };
        if train_entries.is_empty() {
            bail!("No training images left after the validation split");
        }

        tracing::info!(
            "Training data: {} identities, {} images, {} images for validation pairs",
            names.len(),
            train_entries.len(),
            pair_pool.len()
        );

        let miner = TripletMiner::new(MiningConfig {
            alpha:        cfg.alpha,
            max_triplets: cfg.max_triplets,
            batch_size:   cfg.batch_size,
            image_size:   cfg.image_size,
            seed:         cfg.seed,
        });

        Ok(Self {
            train:       FolderDataset::new(train_entries, cfg.image_size),
            class_count: names.len(),
            pair_pool,
            image_size:  cfg.image_size,
            seed:        cfg.seed,
            miner,
        })
    }
}

impl DataProvider for FolderProvider {
    type Dataset = FolderDataset;

    fn get_train_data(&self) -> Result<(FolderDataset, usize)> {
        Ok((self.train.clone(), self.class_count))
    }

    fn get_val_data(&self, n: usize) -> Result<ValidationSet> {
        let labels: Vec<usize> = self.pair_pool.iter().map(|(_, l)| *l).collect();
        let load = |i: usize| -> Result<Vec<f32>> {
            let (path, _) = self
                .pair_pool
                .get(i)
                .ok_or_else(|| anyhow!("Validation index {i} out of range"))?;
            load_face(path, self.image_size)
        };

        let pairs = sample_pairs(&labels, n, self.seed);
        let set   = ValidationSet::gather(pairs.iter().map(|p| (p.left, p.right, p.same)), load)?;
        tracing::info!(
            "Validation pairs: {} ({} same identity) over {} images",
            set.len(),
            set.positives(),
            set.images.len()
        );
        Ok(set)
    }

    fn miner(&self) -> &TripletMiner {
        &self.miner
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_identity(root: &Path, name: &str, shade: u8, count: usize) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let img = RgbImage::from_pixel(6, 4, Rgb([shade, shade, 255 - shade]));
            img.save(dir.join(format!("{i:03}.png"))).unwrap();
        }
    }

    #[test]
    fn test_load_face_normalises_chw() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(3, 3, Rgb([255, 0, 128])).save(&path).unwrap();

        let px = load_face(&path, 2).unwrap();
        assert_eq!(px.len(), 3 * 2 * 2);
        assert!(px[0..4].iter().all(|&v| (v - 127.5 / 128.0).abs() < 1e-6));
        assert!(px[4..8].iter().all(|&v| (v + 127.5 / 128.0).abs() < 1e-6));
        assert!(px[8..12].iter().all(|&v| (v - 0.5 / 128.0).abs() < 1e-6));
    }

    #[test]
    fn test_scan_labels_sorted_identities() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "bob", 10, 2);
        write_identity(dir.path(), "alice", 200, 3);
        fs::write(dir.path().join("alice").join("notes.txt"), "ignored").unwrap();

        let (entries, names) = scan_identities(dir.path()).unwrap();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.iter().filter(|(_, l)| *l == 0).count(), 3);
    }

    #[test]
    fn test_scan_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_identities(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_provider_with_held_out_split() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            write_identity(dir.path(), name, (i * 80) as u8, 4);
        }
        let cfg = TrainConfig {
            train_dir:      dir.path().to_path_buf(),
            valid_fraction: 0.25,
            image_size:     4,
            ..TrainConfig::default()
        };
        let provider = FolderProvider::new(&cfg).unwrap();

        let (train, classes) = provider.get_train_data().unwrap();
        assert_eq!(classes, 3);
        assert_eq!(train.len(), 9);
        let item = train.get(0).unwrap();
        assert_eq!(item.pixels.len(), 3 * 4 * 4);

        let set = provider.get_val_data(4).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.images.iter().all(|img| img.len() == 48));
        // the held-out pool has 3 images, so pairs must share them
        assert!(set.images.len() <= 3);
        assert!(set.pairs.iter().all(|p| p.left < set.images.len() && p.right < set.images.len()));
    }

    #[test]
    fn test_undecodable_image_ends_the_dataset_early() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), "a", 30, 2);
        let bad = dir.path().join("a").join("001.png");
        let header = fs::read(&bad).unwrap();
        fs::write(&bad, &header[..40]).unwrap();

        let (entries, _) = scan_identities(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        let data = FolderDataset::new(entries, 4);
        assert!(data.get(0).is_some());
        assert!(data.get(1).is_none());
    }
}
