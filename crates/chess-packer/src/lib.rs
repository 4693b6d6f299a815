//! Concurrent chunked preprocessing of scraped chess games into fixed-shape
//! training tensors.
//!
//! The pipeline runs three phases, each completing before the next begins:
//!
//! 1. **Produce**: parallel workers drain a shared [`RecordPool`], run the
//!    caller-supplied [`ChunkEncoder`] over each chunk, and persist ten
//!    gzip-compressed NPY artifacts per chunk under a monotonically
//!    increasing chunk id.
//! 2. **Unify**: one worker per stream reassembles that stream's artifacts
//!    in chunk-id order into a contiguous `.dat` array sized to the frozen
//!    move totals.
//! 3. **Split**: a seeded permutation per mover partitions every stream
//!    into `<stream>_val.dat` and `<stream>_tuning.dat`, preserving
//!    feature/label row correspondence.
//!
//! Failures carry a [`PreprocessError`] kind in their context chain; a failed
//! run leaves intermediate artifacts in place for diagnosis.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

pub mod encode;
pub mod error;
pub mod loader;
pub mod pool;
pub mod produce;
pub mod schema;
pub mod split;
pub mod storage;
pub mod unify;

pub use encode::{ChunkEncoder, ColumnData, EncodedChunk, GameRecord};
pub use error::PreprocessError;
pub use loader::load_games;
pub use pool::RecordPool;
pub use produce::MoveTotals;
pub use schema::{ElemKind, Mover, Stream};
pub use split::{seeded_partitions, Partition};

/// Options controlling a preprocessing run.
#[derive(Clone, Debug, Deserialize)]
pub struct PreprocessOptions {
    /// Working directory for chunk artifacts and unified arrays.
    pub temp_dir: PathBuf,
    /// Output directory for the final train/validation arrays.
    pub data_dir: PathBuf,
    /// Games handed to the encoder per chunk.
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,
    /// Fraction of each mover's rows routed to the validation set.
    #[serde(default = "defaults::validation_fraction")]
    pub validation_fraction: f64,
    /// Seed for the split permutations.
    #[serde(default = "defaults::seed")]
    pub seed: u64,
    /// Producer worker count (defaults to host parallelism).
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Overall wall-clock budget for the run.
    #[serde(default)]
    pub deadline: Option<Duration>,
}

mod defaults {
    pub fn chunk_size() -> usize {
        100
    }
    pub fn validation_fraction() -> f64 {
        0.2
    }
    pub fn seed() -> u64 {
        42
    }
}

impl PreprocessOptions {
    pub fn new(temp_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        PreprocessOptions {
            temp_dir: temp_dir.into(),
            data_dir: data_dir.into(),
            chunk_size: defaults::chunk_size(),
            validation_fraction: defaults::validation_fraction(),
            seed: defaults::seed(),
            max_workers: None,
            deadline: None,
        }
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file {}", path.display()))?;
        let opts: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse options file {}", path.display()))?;
        Ok(opts)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PreprocessError::config("chunk_size must be > 0").into());
        }
        if !self.validation_fraction.is_finite()
            || self.validation_fraction < 0.0
            || self.validation_fraction >= 1.0
        {
            return Err(PreprocessError::config(format!(
                "validation_fraction must lie in [0, 1), got {}",
                self.validation_fraction
            ))
            .into());
        }
        if self.max_workers == Some(0) {
            return Err(PreprocessError::config("max_workers must be > 0 when set").into());
        }
        Ok(())
    }
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreprocessSummary {
    pub games: u64,
    pub chunks: u64,
    pub white_moves: u64,
    pub black_moves: u64,
    pub validation_white: u64,
    pub validation_black: u64,
}

/// Run the full produce, unify, and split pipeline over `games`.
///
/// The final `.dat` arrays under `opts.data_dir` are the only persisted
/// state; everything under `opts.temp_dir` is transient and removed as each
/// phase consumes it.
pub fn preprocess_dataset(
    games: Vec<GameRecord>,
    encoder: &dyn ChunkEncoder,
    opts: &PreprocessOptions,
) -> Result<PreprocessSummary> {
    opts.validate()?;
    fs::create_dir_all(&opts.temp_dir).context(PreprocessError::storage(&opts.temp_dir))?;
    fs::create_dir_all(&opts.data_dir).context(PreprocessError::storage(&opts.data_dir))?;

    let deadline = opts.deadline.map(|budget| Instant::now() + budget);
    info!(
        "Preprocessing {} games into {}",
        games.len(),
        opts.data_dir.display()
    );

    let record_pool = RecordPool::new(games);
    let totals = produce::run_producers(
        &record_pool,
        encoder,
        &opts.temp_dir,
        opts.chunk_size,
        opts.max_workers,
        deadline,
    )?;

    check_deadline(deadline)?;
    unify::run_unify(&opts.temp_dir, &totals)?;

    check_deadline(deadline)?;
    let (validation_white, validation_black) = split::run_split(
        &opts.temp_dir,
        &opts.data_dir,
        &totals,
        opts.validation_fraction,
        opts.seed,
    )?;

    let summary = PreprocessSummary {
        games: totals.games,
        chunks: totals.chunks,
        white_moves: totals.white_moves,
        black_moves: totals.black_moves,
        validation_white,
        validation_black,
    };
    info!(
        "Preprocessing complete: {} games, {} chunks, {}+{} moves",
        summary.games, summary.chunks, summary.white_moves, summary.black_moves
    );
    Ok(summary)
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => {
            Err(PreprocessError::DeadlineExceeded.into())
        }
        _ => Ok(()),
    }
}
