//! Co-Teaching CLI
//!
//! Train a pair of networks on a noisy-label image folder, score a saved
//! pair on its test split, or inspect a dataset.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use coteaching::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use coteaching::config::{
    BackboneKind, DatasetKind, LossKind, Mode, NegativeSelection, RunConfig, SamplerKind,
};
use coteaching::dataset::{ChannelStats, ImageFolder};
use coteaching::training::{run_coeval, run_coteaching};
use coteaching::utils::logging::{init_logging, LogConfig};
use coteaching::utils::format_duration;

/// Co-teaching for robust training on noisy labels
#[derive(Parser, Debug)]
#[command(name = "coteaching")]
#[command(version)]
#[command(about = "Co-teaching of two CNNs on noisy-label image datasets with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train two networks with co-teaching (fine-tunes when model names are given)
    Train(RunArgs),

    /// Evaluate two trained networks and their joint prediction
    Test(RunArgs),

    /// Print class counts and channel statistics of a dataset split
    Stats {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "SAR_8A")]
        dataset: DatasetKind,

        #[arg(long, default_value = "train")]
        split: String,

        /// Resize side before computing statistics (-1 keeps the original size)
        #[arg(long, default_value = "112", allow_hyphen_values = true)]
        input_size: i32,
    },
}

/// Options shared by `train` and `test`; each overrides the loaded config
#[derive(Args, Debug)]
struct RunArgs {
    /// JSON run configuration to start from
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    dataset: Option<DatasetKind>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Checkpoint and report directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Square resize side, -1 for no resize
    #[arg(long, allow_hyphen_values = true)]
    input_size: Option<i32>,

    /// Disable training-time augmentation
    #[arg(long, default_value = "false")]
    no_augment: bool,

    #[arg(long)]
    backbone: Option<BackboneKind>,

    /// balanced | default
    #[arg(long)]
    batch_sampler: Option<SamplerKind>,

    /// co_teaching | co_teaching+ | co_teaching_triplet | co_teaching_triplet+
    #[arg(long)]
    loss_fn: Option<LossKind>,

    /// random | hardest | semihard
    #[arg(long)]
    negative_selection: Option<NegativeSelection>,

    #[arg(long)]
    triplet_margin: Option<f32>,

    /// Weight the cross-entropy by inverse class frequency
    #[arg(long, default_value = "false")]
    use_classes_weight: bool,

    #[arg(long)]
    keep_rate: Option<f64>,

    #[arg(long)]
    num_gradual: Option<usize>,

    #[arg(long)]
    exponent: Option<f64>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    eval_freq: Option<usize>,

    #[arg(long)]
    save_freq: Option<usize>,

    #[arg(long)]
    n_epoch: Option<usize>,

    #[arg(long)]
    epoch_decay_start: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Batches per evaluation pass with the balanced sampler
    #[arg(long)]
    eval_batches: Option<usize>,

    #[arg(long)]
    model1_name: Option<String>,

    #[arg(long)]
    model1_numclasses: Option<usize>,

    #[arg(long)]
    model2_name: Option<String>,

    #[arg(long)]
    model2_numclasses: Option<usize>,
}

macro_rules! override_fields {
    ($config:ident, $args:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $args.$field {
                $config.$field = value;
            }
        )+
    };
}

impl RunArgs {
    fn into_config(self, mode: Mode) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("failed to load config {:?}", path))?,
            None => RunConfig::default(),
        };
        let args = self;

        override_fields!(
            config,
            args,
            seed,
            dataset,
            data_dir,
            output_dir,
            input_size,
            backbone,
            batch_sampler,
            loss_fn,
            negative_selection,
            triplet_margin,
            keep_rate,
            num_gradual,
            exponent,
            lr,
            eval_freq,
            save_freq,
            n_epoch,
            epoch_decay_start,
            batch_size,
            eval_batches,
            model1_numclasses,
            model2_numclasses,
        );
        if args.model1_name.is_some() {
            config.model1_name = args.model1_name;
        }
        if args.model2_name.is_some() {
            config.model2_name = args.model2_name;
        }
        if args.no_augment {
            config.augment = false;
        }
        if args.use_classes_weight {
            config.use_classes_weight = true;
        }

        config.mode = mode;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();
    info!("Backend: {}", backend_name());

    let start = std::time::Instant::now();
    match cli.command {
        Commands::Train(args) => {
            let config = args.into_config(Mode::Train)?;
            std::fs::create_dir_all(&config.output_dir)?;
            config.save(&config.output_dir.join("run_config.json"))?;

            let device = default_device();
            let history = run_coteaching::<TrainingBackend>(&config, &device)?;

            println!();
            println!("{}", "Training Complete!".green().bold());
            if let Some(last) = history.rows.last() {
                println!(
                    "  Epoch {}: test loss {:.4} / {:.4}",
                    last.epoch, last.test_loss_1, last.test_loss_2
                );
                if let (Some(acc_1), Some(acc_2)) = (last.test_accuracy_1, last.test_accuracy_2) {
                    println!("  Test accuracy: {:.2}% / {:.2}%", 100.0 * acc_1, 100.0 * acc_2);
                }
            }
        }

        Commands::Test(args) => {
            let config = args.into_config(Mode::Test)?;
            let device = default_device();
            let report = run_coeval::<DefaultBackend>(&config, &device)?;

            println!();
            println!("{}", "Test Results".green().bold());
            println!("  Model 1: {:.2}%", 100.0 * report.model_1.accuracy);
            println!("  Model 2: {:.2}%", 100.0 * report.model_2.accuracy);
            println!("  Joint:   {:.2}%", 100.0 * report.joint.accuracy);
        }

        Commands::Stats {
            data_dir,
            dataset,
            split,
            input_size,
        } => cmd_stats(data_dir, dataset, &split, input_size)?,
    }

    info!("Finished in {}", format_duration(start.elapsed().as_secs_f64()));
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ========================================================
   Co-Teaching: robust training on noisy labels
   Two networks, each teaching the other, with Burn
 ========================================================
  "#
        .green()
    );
}

fn cmd_stats(data_dir: PathBuf, dataset: DatasetKind, split: &str, input_size: i32) -> Result<()> {
    let root = data_dir.join(dataset.dir_name()).join(split);
    let folder = ImageFolder::open(&root).with_context(|| format!("cannot open {:?}", root))?;

    println!("{}", format!("{} / {}", dataset, split).cyan().bold());
    println!("  Images:  {}", folder.len());
    println!("  Classes: {}", folder.num_classes());
    for (name, count) in folder.classes.iter().zip(folder.class_counts()) {
        println!("    {:<24} {:>6}", name, count);
    }

    let resize = (input_size > 0).then_some(input_size as u32);
    let images = folder.load(resize)?;
    let stats = ChannelStats::compute(images.items())?;
    println!("  Mean: {:?}", stats.mean);
    println!("  Std:  {:?}", stats.std);
    Ok(())
}
