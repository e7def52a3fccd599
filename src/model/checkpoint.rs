//! Checkpoint naming and persistence
//!
//! Checkpoints are `CompactRecorder` files named
//! `{dataset}_{loss_fn}_{keep_rate:.2}_{network}_{epoch}.mpk`.
//!
//! The recorder replaces whatever follows the last dot with its own
//! extension, and the keep rate puts a dot inside every stem, so paths are
//! always handed over with `.mpk` already attached.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use tracing::info;

use super::backbone::CoTeachingNet;
use crate::config::{DatasetKind, LossKind};
use crate::utils::error::{CoTeachingError, Result};

const EXTENSION: &str = "mpk";

/// File stem of the checkpoint of `network` (1 or 2) after `epoch`
pub fn checkpoint_stem(
    dataset: DatasetKind,
    loss_fn: LossKind,
    keep_rate: f64,
    network: usize,
    epoch: usize,
) -> String {
    format!("{}_{}_{:.2}_{}_{}", dataset, loss_fn, keep_rate, network, epoch)
}

fn with_extension(name: &str) -> String {
    if name.ends_with(".mpk") {
        name.to_string()
    } else {
        format!("{}.{}", name, EXTENSION)
    }
}

/// Resolve a model name given on the command line to an existing `.mpk` file
///
/// The name is tried as a path first, then inside `model_dir`; the extension
/// is optional.
pub fn resolve_checkpoint(model_dir: &Path, name: &str) -> Result<PathBuf> {
    let file = with_extension(name);
    [PathBuf::from(&file), model_dir.join(&file)]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| CoTeachingError::PathNotFound(model_dir.join(file)))
}

/// Save `model` as `dir/stem.mpk`
pub fn save_checkpoint<B: Backend>(
    model: &CoTeachingNet<B>,
    dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(with_extension(stem));

    model
        .clone()
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|e| CoTeachingError::Checkpoint(format!("failed to save {:?}: {:?}", path, e)))?;

    info!("Saved checkpoint {:?}", path);
    Ok(path)
}

/// Load weights from an `.mpk` file into `model`
pub fn load_checkpoint<B: Backend>(
    model: CoTeachingNet<B>,
    path: &Path,
    device: &B::Device,
) -> Result<CoTeachingNet<B>> {
    if !path.is_file() {
        return Err(CoTeachingError::PathNotFound(path.to_path_buf()));
    }

    let model = model
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| CoTeachingError::Checkpoint(format!("failed to load {:?}: {:?}", path, e)))?;

    info!("Loaded checkpoint {:?}", path);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_stem() {
        let stem = checkpoint_stem(DatasetKind::Sar8A, LossKind::CoTeachingPlus, 0.7, 2, 40);
        assert_eq!(stem, "SAR_8A_co_teaching+_0.70_2_40");
    }

    #[test]
    fn test_resolve_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("SAR_4L_co_teaching_0.70_1_10.mpk");
        std::fs::write(&file, b"").unwrap();

        assert_eq!(
            resolve_checkpoint(dir.path(), "SAR_4L_co_teaching_0.70_1_10").unwrap(),
            file
        );
        assert_eq!(
            resolve_checkpoint(dir.path(), "SAR_4L_co_teaching_0.70_1_10.mpk").unwrap(),
            file
        );
        assert_eq!(
            resolve_checkpoint(Path::new("/elsewhere"), file.to_str().unwrap()).unwrap(),
            file
        );
        assert!(resolve_checkpoint(dir.path(), "missing").is_err());
    }
}
