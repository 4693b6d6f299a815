use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::encode::ChunkEncoder;
use crate::error::PreprocessError;
use crate::pool::RecordPool;
use crate::schema::{Mover, Stream};
use crate::storage;

/// Per-mover totals frozen once every producer has terminated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveTotals {
    pub white_moves: u64,
    pub black_moves: u64,
    pub chunks: u64,
    pub games: u64,
}

impl MoveTotals {
    pub fn rows(&self, mover: Mover) -> u64 {
        match mover {
            Mover::White => self.white_moves,
            Mover::Black => self.black_moves,
        }
    }
}

/// State raced on by the producer workers. Each piece is guarded
/// independently; a worker never holds more than one lock at a time.
struct SharedState<'a> {
    pool: &'a RecordPool,
    next_chunk_id: AtomicU64,
    games_done: AtomicU64,
    white_moves: AtomicU64,
    black_moves: AtomicU64,
    cancel: AtomicBool,
    deadline: Option<Instant>,
    progress: ProgressBar,
}

impl SharedState<'_> {
    fn check_alive(&self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.cancel.store(true, Ordering::Relaxed);
                return Err(PreprocessError::DeadlineExceeded.into());
            }
        }
        if self.cancel.load(Ordering::Relaxed) {
            return Err(PreprocessError::Cancelled.into());
        }
        Ok(())
    }
}

pub(crate) fn default_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap()
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb
}

/// Run the producer phase: N workers race on the pool until it drains.
///
/// All workers are joined before any error is surfaced; the first
/// non-cancellation error wins. On success the returned totals are frozen
/// and the temp tree holds `totals.chunks` artifacts per stream.
pub fn run_producers(
    pool: &RecordPool,
    encoder: &dyn ChunkEncoder,
    temp_dir: &Path,
    chunk_size: usize,
    max_workers: Option<usize>,
    deadline: Option<Instant>,
) -> Result<MoveTotals> {
    for stream in Stream::ALL {
        let dir = temp_dir.join(stream.name());
        fs::create_dir_all(&dir).context(PreprocessError::storage(&dir))?;
    }

    let workers = max_workers
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .max(1);
    let total_games = pool.len() as u64;
    info!(
        "Spawning {} producer workers over {} games (chunk size {})",
        workers, total_games, chunk_size
    );

    let shared = SharedState {
        pool,
        next_chunk_id: AtomicU64::new(1),
        games_done: AtomicU64::new(0),
        white_moves: AtomicU64::new(0),
        black_moves: AtomicU64::new(0),
        cancel: AtomicBool::new(false),
        deadline,
        progress: default_progress_bar(total_games),
    };

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("failed to build producer thread pool")?;
    let results: Vec<Result<()>> = worker_pool.install(|| {
        (0..workers)
            .into_par_iter()
            .map(|_| {
                let res = producer_loop(&shared, encoder, temp_dir, chunk_size);
                if res.is_err() {
                    shared.cancel.store(true, Ordering::Relaxed);
                }
                res
            })
            .collect()
    });
    shared.progress.finish_with_message("chunks encoded");

    let mut first_cancelled = None;
    for res in results {
        if let Err(err) = res {
            if matches!(
                err.downcast_ref::<PreprocessError>(),
                Some(PreprocessError::Cancelled)
            ) {
                if first_cancelled.is_none() {
                    first_cancelled = Some(err);
                }
            } else {
                return Err(err);
            }
        }
    }
    if let Some(err) = first_cancelled {
        return Err(err);
    }

    let totals = MoveTotals {
        white_moves: shared.white_moves.load(Ordering::Relaxed),
        black_moves: shared.black_moves.load(Ordering::Relaxed),
        chunks: shared.next_chunk_id.load(Ordering::Relaxed) - 1,
        games: shared.games_done.load(Ordering::Relaxed),
    };
    info!(
        "Produced {} chunks: {} white moves, {} black moves",
        totals.chunks, totals.white_moves, totals.black_moves
    );
    Ok(totals)
}

fn producer_loop(
    shared: &SharedState<'_>,
    encoder: &dyn ChunkEncoder,
    temp_dir: &Path,
    chunk_size: usize,
) -> Result<()> {
    loop {
        shared.check_alive()?;
        let games = shared.pool.take_chunk(chunk_size);
        if games.is_empty() {
            return Ok(());
        }

        let encoded = encoder
            .encode(&games)
            .map_err(|err| err.context(PreprocessError::Encoding))?;

        let chunk_id = shared.next_chunk_id.fetch_add(1, Ordering::Relaxed);
        for stream in Stream::ALL {
            storage::write_artifact(temp_dir, stream, chunk_id, encoded.block(stream))
                .with_context(|| {
                    format!(
                        "failed to persist chunk {} of stream {}",
                        chunk_id,
                        stream.name()
                    )
                })?;
        }

        shared
            .white_moves
            .fetch_add(encoded.rows(Mover::White) as u64, Ordering::Relaxed);
        shared
            .black_moves
            .fetch_add(encoded.rows(Mover::Black) as u64, Ordering::Relaxed);
        shared
            .games_done
            .fetch_add(games.len() as u64, Ordering::Relaxed);
        shared.progress.inc(games.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{ColumnData, EncodedChunk, GameRecord};
    use anyhow::bail;
    use tempfile::tempdir;

    /// Deterministic encoder: two white moves and one black move per game.
    struct CountingEncoder;

    fn constant_chunk(rows_white: usize, rows_black: usize) -> EncodedChunk {
        let features = |rows: usize| {
            [
                ColumnData::Bool(vec![false; rows * 768]),
                ColumnData::Int(vec![7; rows * 384]),
                ColumnData::Real(vec![0.5; rows * 256]),
                ColumnData::Real(vec![0.25; rows * 128]),
            ]
        };
        EncodedChunk::new(
            features(rows_white),
            features(rows_black),
            vec![true; rows_white],
            vec![false; rows_black],
        )
        .unwrap()
    }

    impl ChunkEncoder for CountingEncoder {
        fn encode(&self, games: &[GameRecord]) -> Result<EncodedChunk> {
            Ok(constant_chunk(games.len() * 2, games.len()))
        }
    }

    struct FailingEncoder;

    impl ChunkEncoder for FailingEncoder {
        fn encode(&self, _games: &[GameRecord]) -> Result<EncodedChunk> {
            bail!("malformed transcript")
        }
    }

    fn games(n: usize) -> Vec<GameRecord> {
        (0..n)
            .map(|i| GameRecord {
                pgn: format!("game-{i}"),
                is_white_win: true,
            })
            .collect()
    }

    #[test]
    fn totals_sum_over_chunks_regardless_of_scheduling() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::new(games(10));
        let totals =
            run_producers(&pool, &CountingEncoder, dir.path(), 3, Some(4), None).unwrap();

        assert_eq!(totals.games, 10);
        assert_eq!(totals.white_moves, 20);
        assert_eq!(totals.black_moves, 10);
        assert_eq!(totals.chunks, 4);

        // Every stream holds one artifact per chunk.
        for stream in Stream::ALL {
            let ids: Vec<u64> = storage::list_artifacts(&dir.path().join(stream.name()), stream)
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            assert_eq!(ids, vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn single_short_chunk_allocates_one_id() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::new(games(5));
        let totals =
            run_producers(&pool, &CountingEncoder, dir.path(), 100, Some(2), None).unwrap();
        assert_eq!(totals.chunks, 1);
        assert_eq!(totals.games, 5);
    }

    #[test]
    fn empty_pool_produces_zero_totals() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::new(Vec::new());
        let totals =
            run_producers(&pool, &CountingEncoder, dir.path(), 100, Some(2), None).unwrap();
        assert_eq!(totals, MoveTotals::default());
    }

    #[test]
    fn encoder_failure_surfaces_as_encoding_error() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::new(games(20));
        let err =
            run_producers(&pool, &FailingEncoder, dir.path(), 5, Some(4), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::Encoding)
        ));
    }

    #[test]
    fn expired_deadline_surfaces_as_deadline_error() {
        let dir = tempdir().unwrap();
        let pool = RecordPool::new(games(4));
        let deadline = Some(Instant::now() - std::time::Duration::from_secs(1));
        let err =
            run_producers(&pool, &CountingEncoder, dir.path(), 1, Some(2), deadline).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::DeadlineExceeded)
        ));
    }
}
