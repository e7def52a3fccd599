//! Training-time Augmentation
//!
//! Random flips and small color jitter applied to decoded CHW float images
//! right before batching. Evaluation batches are never augmented.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Configuration for data augmentation
#[derive(Clone, Debug)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of a vertical flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
    /// Brightness offset range (±brightness_delta, in [0, 1] pixel units)
    pub brightness_delta: f32,
    pub brightness_prob: f32,
    /// Saturation factor range (1.0 ± saturation_delta)
    pub saturation_delta: f32,
    pub saturation_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            brightness_delta: 0.05,
            brightness_prob: 0.5,
            saturation_delta: 0.05,
            saturation_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
            saturation_delta: 0.0,
            saturation_prob: 0.0,
        }
    }
}

/// Applies random transformations to RGB CHW images in place
#[derive(Clone, Debug, Default)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Augment one `[3, height, width]` image
    pub fn augment(&self, image: &mut [f32], height: usize, width: usize, rng: &mut ChaCha8Rng) {
        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            flip_horizontal(image, height, width);
        }

        if rng.gen::<f32>() < self.config.vertical_flip_prob {
            flip_vertical(image, height, width);
        }

        if self.config.brightness_prob > 0.0 && rng.gen::<f32>() < self.config.brightness_prob {
            let delta = rng.gen_range(-self.config.brightness_delta..=self.config.brightness_delta);
            for v in image.iter_mut() {
                *v = (*v + delta).clamp(0.0, 1.0);
            }
        }

        if self.config.saturation_prob > 0.0 && rng.gen::<f32>() < self.config.saturation_prob {
            let factor =
                1.0 + rng.gen_range(-self.config.saturation_delta..=self.config.saturation_delta);
            adjust_saturation(image, height * width, factor);
        }
    }
}

fn flip_horizontal(image: &mut [f32], height: usize, width: usize) {
    for row in image.chunks_exact_mut(width).take(3 * height) {
        row.reverse();
    }
}

fn flip_vertical(image: &mut [f32], height: usize, width: usize) {
    for channel in image.chunks_exact_mut(height * width).take(3) {
        for y in 0..height / 2 {
            let (top, bottom) = channel.split_at_mut((height - 1 - y) * width);
            top[y * width..(y + 1) * width].swap_with_slice(&mut bottom[..width]);
        }
    }
}

/// Interpolate each pixel between its luma and its color
fn adjust_saturation(image: &mut [f32], plane: usize, factor: f32) {
    if image.len() < 3 * plane {
        return;
    }
    let (r, rest) = image.split_at_mut(plane);
    let (g, b) = rest.split_at_mut(plane);

    for i in 0..plane {
        let gray = 0.299 * r[i] + 0.587 * g[i] + 0.114 * b[i];
        r[i] = (gray + factor * (r[i] - gray)).clamp(0.0, 1.0);
        g[i] = (gray + factor * (g[i] - gray)).clamp(0.0, 1.0);
        b[i] = (gray + factor * (b[i] - gray)).clamp(0.0, 1.0);
    }
}
