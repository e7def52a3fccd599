//! Per-channel normalization statistics

use serde::{Deserialize, Serialize};

use super::burn_dataset::ImageItem;
use crate::utils::error::{CoTeachingError, Result};

/// Mean and standard deviation of each RGB channel over a set of images
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ChannelStats {
    /// Pixel-weighted statistics over all items
    pub fn compute(items: &[ImageItem]) -> Result<Self> {
        let mut sum = [0f64; 3];
        let mut sum_sq = [0f64; 3];
        let mut pixels = 0usize;

        for item in items {
            let plane = item.height * item.width;
            for (c, channel) in item.image.chunks_exact(plane).enumerate().take(3) {
                for &v in channel {
                    let v = v as f64;
                    sum[c] += v;
                    sum_sq[c] += v * v;
                }
            }
            pixels += plane;
        }

        if pixels == 0 {
            return Err(CoTeachingError::Dataset(
                "cannot compute channel statistics of an empty image set".to_string(),
            ));
        }

        let n = pixels as f64;
        let mut mean = [0f32; 3];
        let mut std = [0f32; 3];
        for c in 0..3 {
            let m = sum[c] / n;
            let var = (sum_sq[c] / n - m * m).max(0.0);
            mean[c] = m as f32;
            // constant channels would divide by zero
            std[c] = (var.sqrt() as f32).max(1e-6);
        }

        Ok(Self { mean, std })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(r: f32, g: f32, b: f32) -> ImageItem {
        let plane = 4;
        let mut image = vec![r; plane];
        image.extend(vec![g; plane]);
        image.extend(vec![b; plane]);
        ImageItem {
            image,
            height: 2,
            width: 2,
            label: 0,
        }
    }

    #[test]
    fn test_compute_mean_and_std() {
        let stats = ChannelStats::compute(&[item(0.0, 0.5, 1.0), item(1.0, 0.5, 1.0)]).unwrap();

        assert!((stats.mean[0] - 0.5).abs() < 1e-6);
        assert!((stats.std[0] - 0.5).abs() < 1e-6);
        assert!((stats.mean[1] - 0.5).abs() < 1e-6);
        assert!(stats.std[1] > 0.0);
        assert!((stats.mean[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_set_is_an_error() {
        assert!(ChannelStats::compute(&[]).is_err());
    }
}
