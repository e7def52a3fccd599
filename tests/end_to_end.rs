//! Train a small pair on a generated image folder, then score the saved pair

use std::path::Path;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};

use coteaching::config::{BackboneKind, Mode, RunConfig, SamplerKind};
use coteaching::model::checkpoint_stem;
use coteaching::training::{run_coeval, run_coteaching};
use coteaching::utils::error::CoTeachingError;

type TrainBackend = Autodiff<NdArray>;

/// Two classes told apart by their dominant channel
fn write_split(root: &Path, per_class: usize) {
    for (class, color) in [("cargo", [200u8, 40, 40]), ("tanker", [40u8, 40, 200])] {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let shade = (i * 3) as u8;
            let pixel = Rgb([color[0] - shade, color[1] + shade, color[2] - shade]);
            RgbImage::from_pixel(10, 10, pixel)
                .save(dir.join(format!("{:02}.png", i)))
                .unwrap();
        }
    }
}

fn small_config(root: &Path) -> RunConfig {
    let data_dir = root.join("data");
    write_split(&data_dir.join("SAR_8A").join("train"), 10);
    write_split(&data_dir.join("SAR_8A").join("test"), 4);

    let mut config = RunConfig::default();
    config.data_dir = data_dir;
    config.output_dir = root.join("models");
    config.input_size = 8;
    config.augment = false;
    config.backbone = BackboneKind::Lite;
    config.batch_sampler = SamplerKind::Default;
    config.keep_rate = 1.0;
    config.n_epoch = 3;
    config.eval_freq = 1;
    config.save_freq = 3;
    config.batch_size = 4;
    config.lr = 1e-3;
    config
}

#[test]
fn full_keep_rate_reports_the_raw_batch_loss() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let device = Default::default();

    let history = run_coteaching::<TrainBackend>(&config, &device).unwrap();

    assert_eq!(history.rows.len(), 3);
    for row in &history.rows {
        assert_eq!(row.keep_rate, 1.0);
        assert!((row.train_loss_1 - row.total_train_loss_1).abs() < 1e-5);
        assert!((row.train_loss_2 - row.total_train_loss_2).abs() < 1e-5);
        assert!(row.test_loss_1.is_finite());
        assert!(row.test_accuracy_1.is_some());
    }

    for network in [1, 2] {
        let stem = checkpoint_stem(config.dataset, config.loss_fn, config.keep_rate, network, 3);
        assert!(config.output_dir.join(format!("{}.mpk", stem)).is_file());
    }
    assert!(config.output_dir.join("SAR_8A_co_teaching_1.00.json").is_file());
    assert!(config.output_dir.join("SAR_8A_dataset_info.json").is_file());
}

#[test]
fn saved_pair_can_be_tested() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.n_epoch = 1;
    config.save_freq = 1;
    let device = Default::default();

    run_coteaching::<TrainBackend>(&config, &device).unwrap();

    config.mode = Mode::Test;
    config.model1_name = Some(checkpoint_stem(config.dataset, config.loss_fn, 1.0, 1, 1));
    config.model2_name = Some(checkpoint_stem(config.dataset, config.loss_fn, 1.0, 2, 1));

    let report = run_coeval::<NdArray>(&config, &device).unwrap();

    assert_eq!(report.model_1.total_samples, 8);
    assert_eq!(report.joint.total_samples, 8);
    assert_eq!(report.joint.per_class.len(), 2);
    assert!((0.0..=1.0).contains(&report.joint.accuracy));
}

#[test]
fn test_mode_rejects_embedding_losses() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.mode = Mode::Test;
    config.loss_fn = coteaching::config::LossKind::CoTeachingTriplet;
    config.model1_name = Some("a".to_string());
    config.model2_name = Some("b".to_string());

    assert!(run_coeval::<NdArray>(&config, &Default::default()).is_err());
}

#[test]
fn balanced_batches_smaller_than_class_count_fail_before_decoding() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.batch_sampler = SamplerKind::Balanced;
    config.batch_size = 1;

    // decoding this file would fail with an image error
    let broken = config.split_dir("train").join("cargo").join("zz.png");
    std::fs::write(&broken, b"not an image").unwrap();

    let err = run_coteaching::<TrainBackend>(&config, &Default::default()).unwrap_err();
    assert!(matches!(err, CoTeachingError::Config(_)));
    assert!(!config.output_dir.join("SAR_8A_dataset_info.json").exists());
}
