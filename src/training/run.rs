//! Train and test entry points
//!
//! `run_coteaching` trains a pair from scratch (or fine-tunes two
//! checkpoints) on `<data_dir>/<dataset>/train` and evaluates it on
//! `<data_dir>/<dataset>/test`. `run_coeval` scores two saved networks on
//! the test split.

use std::path::PathBuf;

use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::{info, warn};

use super::evaluation::{evaluate_pair, TestReport};
use super::history::{HistoryRow, TrainingHistory};
use super::trainer::CoTeachingTrainer;
use crate::config::{Mode, RunConfig};
use crate::dataset::{
    AugmentationConfig, Augmenter, BatchPlan, ChannelStats, CoTeachingBatcher, DatasetInfo,
    ImageDataset, ImageFolder,
};
use crate::losses::CoTeachingCriterion;
use crate::model::{
    checkpoint_stem, load_checkpoint, resolve_checkpoint, save_checkpoint, CoTeachingNet,
    CoTeachingNetConfig, EMBEDDING_DIM,
};
use crate::utils::error::{CoTeachingError, Result};
use crate::utils::logging::TrainingLogger;

/// Decoded splits and the dataset description derived from the train split
pub struct PreparedData {
    pub info: DatasetInfo,
    pub train: ImageDataset,
    pub test: ImageDataset,
}

/// `<output_dir>/<dataset>_dataset_info.json`
pub fn dataset_info_path(config: &RunConfig) -> PathBuf {
    config
        .output_dir
        .join(format!("{}_dataset_info.json", config.dataset))
}

fn save_dataset_info(info: &DatasetInfo, config: &RunConfig) -> Result<()> {
    let path = dataset_info_path(config);
    std::fs::create_dir_all(&config.output_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(info)?)?;
    info!("Dataset info written to {:?}", path);
    Ok(())
}

fn load_dataset_info(config: &RunConfig) -> Result<Option<DatasetInfo>> {
    let path = dataset_info_path(config);
    if !path.is_file() {
        return Ok(None);
    }
    let info: DatasetInfo = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(Some(info))
}

/// Configured statistics win over computed ones, channel set by channel set
fn normalization(config: &RunConfig, train: &ImageDataset) -> Result<([f32; 3], [f32; 3])> {
    if let (Some(mean), Some(std)) = (config.mean, config.std) {
        return Ok((mean, std));
    }
    let stats = ChannelStats::compute(train.items())?;
    info!(
        "Channel statistics: mean {:?}, std {:?}",
        stats.mean, stats.std
    );
    Ok((config.mean.unwrap_or(stats.mean), config.std.unwrap_or(stats.std)))
}

fn open_splits(config: &RunConfig) -> Result<(ImageFolder, ImageFolder)> {
    let train = ImageFolder::open(config.split_dir("train"))?;
    let test = ImageFolder::open(config.split_dir("test"))?;

    if train.classes != test.classes {
        return Err(CoTeachingError::Dataset(format!(
            "train and test class directories differ: {:?} vs {:?}",
            train.classes, test.classes
        )));
    }
    config.check_classes(train.num_classes())?;

    info!(
        "{}: {} classes, {} train / {} test images",
        config.dataset,
        train.num_classes(),
        train.len(),
        test.len()
    );
    Ok((train, test))
}

/// Open and decode both splits and derive the dataset description
pub fn prepare_data(config: &RunConfig) -> Result<PreparedData> {
    let (train_folder, test_folder) = open_splits(config)?;

    let train = train_folder.load(config.resize_to())?;
    let test = test_folder.load(config.resize_to())?;
    let (mean, std) = normalization(config, &train)?;

    let info = DatasetInfo {
        name: config.dataset.to_string(),
        classes: train_folder.classes.clone(),
        class_counts: train_folder.class_counts(),
        mean,
        std,
    };

    Ok(PreparedData { info, train, test })
}

/// Network for a train run
///
/// With a checkpoint name the network is built with `pretrained_classes`
/// outputs, loaded, and given a fresh head when the dataset's class count
/// differs. Embedding networks always have `EMBEDDING_DIM` outputs.
pub fn build_network<B: Backend>(
    config: &RunConfig,
    n_classes: usize,
    pretrained: Option<&str>,
    pretrained_classes: usize,
    device: &B::Device,
) -> Result<CoTeachingNet<B>> {
    let embedding = config.loss_fn.is_metric_learning();
    let output_dim = if embedding { EMBEDDING_DIM } else { n_classes };

    let Some(name) = pretrained else {
        return Ok(CoTeachingNetConfig::for_backbone(config.backbone, output_dim, embedding).init(device));
    };

    let loaded_dim = if embedding {
        EMBEDDING_DIM
    } else {
        pretrained_classes
    };
    let path = resolve_checkpoint(&config.output_dir, name)?;
    let model = CoTeachingNetConfig::for_backbone(config.backbone, loaded_dim, embedding).init(device);
    let model = load_checkpoint(model, &path, device)?;

    if loaded_dim != output_dim {
        info!(
            "Replacing the {}-way head of {} with a {}-way head",
            loaded_dim, name, output_dim
        );
        Ok(model.with_new_head(output_dim, device))
    } else {
        Ok(model)
    }
}

fn train_batcher(config: &RunConfig, info: &DatasetInfo) -> CoTeachingBatcher {
    let batcher = CoTeachingBatcher::new(info.mean, info.std);
    if config.augment {
        batcher.with_augmentation(Augmenter::new(AugmentationConfig::default()), config.seed)
    } else {
        batcher
    }
}

/// Train a co-teaching pair; returns the history of evaluated epochs
pub fn run_coteaching<B: AutodiffBackend>(
    config: &RunConfig,
    device: &B::Device,
) -> Result<TrainingHistory> {
    config.validate()?;
    if config.mode != Mode::Train {
        return Err(CoTeachingError::Config(format!(
            "run_coteaching needs train mode, got {}",
            config.mode
        )));
    }

    let data = prepare_data(config)?;
    save_dataset_info(&data.info, config)?;
    let n_classes = data.info.num_classes();

    let class_weights = if config.use_classes_weight {
        if config.loss_fn.is_metric_learning() {
            warn!("Class weights have no effect on {}", config.loss_fn);
        }
        let weights = data.info.class_weights();
        info!("Class weights: {:?}", weights);
        Some(weights)
    } else {
        None
    };
    let criterion = CoTeachingCriterion::from_config(config, class_weights);

    let mut train_plan = BatchPlan::for_run(config, &data.train.labels(), n_classes, true)?;
    let mut test_plan = BatchPlan::for_run(config, &data.test.labels(), n_classes, false)?;
    let train_batcher = train_batcher(config, &data.info);
    let test_batcher = CoTeachingBatcher::new(data.info.mean, data.info.std);
    if train_batcher.is_augmenting() {
        info!("Augmenting training batches");
    }

    let model_1 = build_network::<B>(
        config,
        n_classes,
        config.model1_name.as_deref(),
        config.model1_numclasses,
        device,
    )?;
    let model_2 = build_network::<B>(
        config,
        n_classes,
        config.model2_name.as_deref(),
        config.model2_numclasses,
        device,
    )?;

    info!(
        "Training {} | backbone {} | sampler {} | keep rate {} | {} epochs",
        criterion.name(),
        config.backbone,
        config.batch_sampler,
        config.keep_rate,
        config.n_epoch
    );

    let mut trainer =
        CoTeachingTrainer::<B>::from_config(config, model_1, model_2, criterion, device.clone())?;
    let mut history = TrainingHistory::new(config);
    let history_path = TrainingHistory::path_for(config);
    let mut logger = TrainingLogger::new(config.n_epoch);

    for epoch in 1..=config.n_epoch {
        let (lr, keep_rate) = trainer.rates_at(epoch);
        logger.start_epoch(epoch, lr, keep_rate);

        let stats = trainer.train_epoch(epoch, &data.train, &mut train_plan, &train_batcher)?;
        logger.end_epoch(
            stats.loss_1,
            stats.total_loss_1,
            stats.loss_2,
            stats.total_loss_2,
        );

        if epoch % config.eval_freq == 0 {
            let eval = trainer.evaluate(&data.test, &mut test_plan, &test_batcher)?;
            history.push(HistoryRow::new(&stats, &eval));
            history.save(&history_path)?;
        }

        if epoch % config.save_freq == 0 {
            for (network, model) in [(1, trainer.model_1()), (2, trainer.model_2())] {
                let stem = checkpoint_stem(
                    config.dataset,
                    config.loss_fn,
                    config.keep_rate,
                    network,
                    epoch,
                );
                save_checkpoint(model, &config.output_dir, &stem)?;
            }
        }
    }

    logger.log_complete();
    history.save(&history_path)?;
    info!("Training history written to {:?}", history_path);
    Ok(history)
}

/// Score two saved networks on the test split
pub fn run_coeval<B: Backend>(config: &RunConfig, device: &B::Device) -> Result<TestReport> {
    config.validate()?;
    if config.loss_fn.is_metric_learning() {
        return Err(CoTeachingError::Config(format!(
            "test mode needs classification outputs, {} produces embeddings",
            config.loss_fn
        )));
    }
    let (Some(name_1), Some(name_2)) = (config.model1_name.as_deref(), config.model2_name.as_deref())
    else {
        return Err(CoTeachingError::Config(
            "test mode needs both model1_name and model2_name".to_string(),
        ));
    };

    let test_folder = ImageFolder::open(config.split_dir("test"))?;
    let n_classes = test_folder.num_classes();
    config.check_classes(n_classes)?;
    let test = test_folder.load(config.resize_to())?;

    let (mean, std) = match load_dataset_info(config)? {
        Some(info) if info.classes == test_folder.classes => (info.mean, info.std),
        Some(_) => {
            warn!("Saved dataset info lists other classes, recomputing statistics");
            let train = ImageFolder::open(config.split_dir("train"))?.load(config.resize_to())?;
            normalization(config, &train)?
        }
        None => match (config.mean, config.std) {
            (Some(mean), Some(std)) => (mean, std),
            _ => {
                let train =
                    ImageFolder::open(config.split_dir("train"))?.load(config.resize_to())?;
                normalization(config, &train)?
            }
        },
    };

    let load = |name: &str| -> Result<CoTeachingNet<B>> {
        let path = resolve_checkpoint(&config.output_dir, name)?;
        let model = CoTeachingNetConfig::for_backbone(config.backbone, n_classes, false).init(device);
        load_checkpoint(model, &path, device)
    };
    let model_1 = load(name_1)?;
    let model_2 = load(name_2)?;

    let mut plan = BatchPlan::for_run(config, &test.labels(), n_classes, false)?;
    let batcher = CoTeachingBatcher::new(mean, std);

    let report = evaluate_pair(
        &model_1,
        &model_2,
        &test,
        &mut plan,
        &batcher,
        &test_folder.classes,
        device,
    )?;
    report.log();
    report.save(&config.output_dir.join(format!(
        "{}_{}_{:.2}_test.json",
        config.dataset, config.loss_fn, config.keep_rate
    )))?;

    Ok(report)
}
