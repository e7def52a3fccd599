//! Model Module
//!
//! The CNN both peers share and the checkpoint files they are saved to.

pub mod backbone;
pub mod checkpoint;

pub use backbone::{CoTeachingNet, CoTeachingNetConfig, EMBEDDING_DIM};
pub use checkpoint::{checkpoint_stem, load_checkpoint, resolve_checkpoint, save_checkpoint};
