//! Training Module
//!
//! Rate schedules, the per-network optimizer slots, the co-teaching
//! train/eval loop and the train/test entry points.

pub mod evaluation;
pub mod history;
pub mod optimizer;
pub mod run;
pub mod schedule;
pub mod trainer;

pub use evaluation::{evaluate_pair, joint_logits, TestReport};
pub use history::{HistoryRow, TrainingHistory};
pub use optimizer::NetworkSlot;
pub use run::{build_network, prepare_data, run_coeval, run_coteaching, PreparedData};
pub use schedule::{DropRateSchedule, LearningRateSchedule, MOM1, MOM2};
pub use trainer::{CoTeachingTrainer, EpochStats, EvalStats};
