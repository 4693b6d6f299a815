use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::PreprocessError;
use crate::produce::MoveTotals;
use crate::schema::{Mover, Stream};
use crate::storage::{self, DatReader, DatWriter};

/// Disjoint validation/training row indices for one mover group, in gather
/// order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub validation: Vec<u64>,
    pub training: Vec<u64>,
}

impl Partition {
    pub fn total(&self) -> u64 {
        (self.validation.len() + self.training.len()) as u64
    }
}

/// Seeded partitions for both movers.
///
/// One RNG is seeded once; White's index range is shuffled first, then
/// Black's from the same stream. Both permutations are reproducible from the
/// seed and are distinct draws.
pub fn seeded_partitions(
    totals: &MoveTotals,
    validation_fraction: f64,
    seed: u64,
) -> (Partition, Partition) {
    let mut rng = StdRng::seed_from_u64(seed);
    let white = partition_indices(totals.white_moves, validation_fraction, &mut rng);
    let black = partition_indices(totals.black_moves, validation_fraction, &mut rng);
    (white, black)
}

fn partition_indices(total: u64, fraction: f64, rng: &mut StdRng) -> Partition {
    let mut indices: Vec<u64> = (0..total).collect();
    indices.shuffle(rng);
    let n_val = (fraction * total as f64).floor() as usize;
    let training = indices.split_off(n_val);
    Partition {
        validation: indices,
        training,
    }
}

/// Split every unified array into validation and training arrays, reusing one
/// partition per mover across that mover's five streams, then delete the
/// unified intermediates. Returns the per-mover validation row counts.
pub fn run_split(
    temp_dir: &Path,
    data_dir: &Path,
    totals: &MoveTotals,
    validation_fraction: f64,
    seed: u64,
) -> Result<(u64, u64)> {
    let (white, black) = seeded_partitions(totals, validation_fraction, seed);
    info!(
        "Splitting streams: white {}/{} validation, black {}/{}",
        white.validation.len(),
        totals.white_moves,
        black.validation.len(),
        totals.black_moves
    );

    let results: Vec<Result<()>> = Stream::ALL
        .par_iter()
        .map(|&stream| {
            let partition = match stream.mover() {
                Mover::White => &white,
                Mover::Black => &black,
            };
            split_stream(temp_dir, data_dir, stream, partition)
                .with_context(|| format!("failed to split stream {}", stream.name()))
        })
        .collect();
    for res in results {
        res?;
    }
    info!("All splits done");
    Ok((white.validation.len() as u64, black.validation.len() as u64))
}

fn split_stream(
    temp_dir: &Path,
    data_dir: &Path,
    stream: Stream,
    partition: &Partition,
) -> Result<()> {
    let unified_path = temp_dir.join(stream.unified_file_name());
    let mut reader = DatReader::open(&unified_path, stream.row_bytes())?;
    if reader.rows() != partition.total() {
        return Err(PreprocessError::consistency(format!(
            "{} holds {} rows but the partition covers {}",
            unified_path.display(),
            reader.rows(),
            partition.total()
        ))
        .into());
    }

    gather(
        &mut reader,
        data_dir.join(stream.val_file_name()),
        &partition.validation,
        stream,
    )?;
    gather(
        &mut reader,
        data_dir.join(stream.tuning_file_name()),
        &partition.training,
        stream,
    )?;
    storage::remove_file(&unified_path)
}

/// Copy rows at `indices`, in permuted order, into a new `.dat` file.
fn gather(
    reader: &mut DatReader,
    out_path: PathBuf,
    indices: &[u64],
    stream: Stream,
) -> Result<()> {
    let mut writer = DatWriter::create(out_path, stream.row_bytes(), indices.len() as u64)?;
    let mut row = vec![0u8; stream.row_bytes()];
    for &index in indices {
        reader.read_row(index, &mut row)?;
        writer.append(&row)?;
    }
    writer.finish()
}
