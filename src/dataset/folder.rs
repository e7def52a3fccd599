//! Image Folder Loader
//!
//! Reads a split laid out as `root/<class>/<image>` the way torchvision's
//! `ImageFolder` does: class directories are sorted by name and the label of
//! a class is its position in that order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::imageops::FilterType;
use image::ImageReader;
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::burn_dataset::{ImageDataset, ImageItem};
use crate::utils::error::{CoTeachingError, Result};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// One image on disk with its class label
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Listing of an image-folder split
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root: PathBuf,
    /// Sorted class directory names, index = label
    pub classes: Vec<String>,
    pub samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// List classes and image files under `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CoTeachingError::PathNotFound(root));
        }

        let mut classes: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(CoTeachingError::Dataset(format!(
                "no class directories under {:?}",
                root
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.path().to_path_buf())
                .filter(|p| is_image(p))
                .collect();
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        info!(
            "Found {} images in {} classes under {:?}",
            samples.len(),
            classes.len(),
            root
        );

        Ok(Self {
            root,
            classes,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Label of every sample, in sample order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Number of samples per class
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Decode every image into memory, resized to `resize` when given
    pub fn load(&self, resize: Option<u32>) -> Result<ImageDataset> {
        info!("Decoding {} images from {:?}", self.len(), self.root);
        let loaded = AtomicUsize::new(0);
        let total = self.len();

        let items = self
            .samples
            .par_iter()
            .map(|sample| {
                let item = load_item(&sample.path, sample.label, resize);
                let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 500 == 0 {
                    debug!("Decoded {}/{} images", count, total);
                }
                item
            })
            .collect::<Result<Vec<_>>>()?;

        ImageDataset::new(items)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode one image as RGB, CHW, scaled to [0, 1]
pub fn load_item(path: &Path, label: usize, resize: Option<u32>) -> Result<ImageItem> {
    let img = ImageReader::open(path)
        .map_err(|e| CoTeachingError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| CoTeachingError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    let img = match resize {
        Some(size) => img.resize_exact(size, size, FilterType::Triangle),
        None => img,
    };
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = height * width;

    let mut image = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            image[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    Ok(ImageItem {
        image,
        height,
        width,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::Dataset;
    use image::{Rgb, RgbImage};

    fn write_image(path: &Path, size: u32, value: u8) {
        let img = RgbImage::from_pixel(size, size, Rgb([value, value / 2, 255 - value]));
        img.save(path).unwrap();
    }

    fn make_split(root: &Path) {
        for (class, count) in [("cargo", 3), ("tanker", 2)] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                write_image(&dir.join(format!("{}.png", i)), 12, 40 * i as u8);
            }
        }
        std::fs::write(root.join("cargo").join("notes.txt"), "not an image").unwrap();
    }

    #[test]
    fn test_open_sorts_classes_and_skips_non_images() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path());

        let folder = ImageFolder::open(dir.path()).unwrap();
        assert_eq!(folder.classes, vec!["cargo", "tanker"]);
        assert_eq!(folder.len(), 5);
        assert_eq!(folder.class_counts(), vec![3, 2]);
        assert_eq!(folder.labels(), vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_load_resizes_to_chw() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path());

        let dataset = ImageFolder::open(dir.path()).unwrap().load(Some(8)).unwrap();
        assert_eq!(dataset.len(), 5);

        let item = dataset.get(0).unwrap();
        assert_eq!((item.height, item.width), (8, 8));
        assert_eq!(item.image.len(), 3 * 8 * 8);
        assert!(item.image.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_missing_root() {
        let err = ImageFolder::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, CoTeachingError::PathNotFound(_)));
    }
}
