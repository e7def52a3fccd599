//! Burn Dataset Integration
//!
//! In-memory image dataset implementing Burn's `Dataset` trait, and the
//! batcher that stacks items into normalized `[N, 3, H, W]` tensors.
//!
//! The batcher augments only when built with an [`Augmenter`]; the training
//! split gets one, the test split never does.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::augmentation::Augmenter;
use crate::utils::error::{CoTeachingError, Result};

/// A decoded image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// RGB pixels as flattened CHW floats in [0, 1]
    pub image: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

/// All images of one split, held in memory
#[derive(Clone, Debug)]
pub struct ImageDataset {
    items: Vec<ImageItem>,
}

impl ImageDataset {
    /// Every item must share one size so that any subset can be stacked
    pub fn new(items: Vec<ImageItem>) -> Result<Self> {
        if let Some(first) = items.first() {
            let dims = (first.height, first.width);
            if let Some(odd) = items.iter().find(|item| (item.height, item.width) != dims) {
                return Err(CoTeachingError::Dataset(format!(
                    "images must share one size when not resized: found {}x{} and {}x{}",
                    dims.0, dims.1, odd.height, odd.width
                )));
            }
            if let Some(bad) = items.iter().find(|i| i.image.len() != 3 * i.height * i.width) {
                return Err(CoTeachingError::Dataset(format!(
                    "image buffer of length {} does not match 3x{}x{}",
                    bad.image.len(),
                    bad.height,
                    bad.width
                )));
            }
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    /// Label of every item, in dataset order
    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// Items at the given indices; an out-of-range index is an error
    pub fn gather(&self, indices: &[usize]) -> Result<Vec<ImageItem>> {
        indices
            .iter()
            .map(|&i| {
                self.get(i).ok_or_else(|| {
                    CoTeachingError::Dataset(format!(
                        "index {} out of range for {} images",
                        i,
                        self.items.len()
                    ))
                })
            })
            .collect()
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images and their (possibly noisy) labels
#[derive(Clone, Debug)]
pub struct CoTeachingBatch<B: Backend> {
    /// Shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items, optionally augments them, then applies `(x - mean) / std`
#[derive(Clone, Debug)]
pub struct CoTeachingBatcher {
    mean: [f32; 3],
    std: [f32; 3],
    augmenter: Option<Augmenter>,
    seed: u64,
    /// Batches produced so far, mixed into the per-batch RNG seed
    batches: Arc<AtomicUsize>,
}

impl CoTeachingBatcher {
    /// Batcher without augmentation
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            mean,
            std,
            augmenter: None,
            seed: 0,
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Batcher that augments every item with a reproducible per-batch RNG
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmenter = Some(augmenter);
        self.seed = seed;
        self
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }
}

impl<B: Backend> Batcher<B, ImageItem, CoTeachingBatch<B>> for CoTeachingBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> CoTeachingBatch<B> {
        let batch_size = items.len();
        let (height, width) = items
            .first()
            .map(|item| (item.height, item.width))
            .unwrap_or((0, 0));

        let mut rng = self.augmenter.as_ref().map(|_| {
            let n = self.batches.fetch_add(1, Ordering::Relaxed) as u64;
            ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(n))
        });

        let mut images_data = Vec::with_capacity(batch_size * 3 * height * width);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            let mut image = item.image;
            if let (Some(augmenter), Some(rng)) = (&self.augmenter, rng.as_mut()) {
                augmenter.augment(&mut image, height, width, rng);
            }
            images_data.extend(image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            device,
        );

        let mean =
            Tensor::<B, 4>::from_floats(TensorData::new(self.mean.to_vec(), [1, 3, 1, 1]), device);
        let std =
            Tensor::<B, 4>::from_floats(TensorData::new(self.std.to_vec(), [1, 3, 1, 1]), device);
        let images = (images - mean) / std;

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        CoTeachingBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(value: f32, label: usize) -> ImageItem {
        ImageItem {
            image: vec![value; 3 * 2 * 2],
            height: 2,
            width: 2,
            label,
        }
    }

    #[test]
    fn test_dataset_rejects_mixed_sizes() {
        let mut odd = item(0.0, 0);
        odd.height = 1;
        odd.image.truncate(6);
        assert!(ImageDataset::new(vec![item(0.0, 0), odd]).is_err());
    }

    #[test]
    fn test_gather_and_labels() {
        let dataset = ImageDataset::new(vec![item(0.0, 0), item(0.5, 1), item(1.0, 1)]).unwrap();
        assert_eq!(dataset.labels(), vec![0, 1, 1]);

        let picked = dataset.gather(&[2, 0]).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].label, 1);
        assert_eq!(picked[1].label, 0);

        assert!(matches!(
            dataset.gather(&[2, 0, 9]),
            Err(CoTeachingError::Dataset(_))
        ));
    }

    #[test]
    fn test_batcher_normalizes() {
        let device = Default::default();
        let batcher = CoTeachingBatcher::new([0.5; 3], [0.25; 3]);

        let batch: CoTeachingBatch<TestBackend> =
            batcher.batch(vec![item(1.0, 0), item(0.5, 1)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!((values[0] - 2.0).abs() < 1e-6);
        assert!(values[12].abs() < 1e-6);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 1]);
    }
}
