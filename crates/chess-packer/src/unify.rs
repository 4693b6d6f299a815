//! Reassemble each stream's chunk artifacts into one contiguous array.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use rayon::prelude::*;

use crate::error::PreprocessError;
use crate::produce::MoveTotals;
use crate::schema::Stream;
use crate::storage;

/// Merge every stream in parallel. Streams share no mutable state; each
/// touches only its own subdirectory and `.dat` file.
pub fn run_unify(temp_dir: &Path, totals: &MoveTotals) -> Result<()> {
    info!(
        "Unifying {} streams into {}",
        Stream::ALL.len(),
        temp_dir.display()
    );
    let results: Vec<Result<()>> = Stream::ALL
        .par_iter()
        .map(|&stream| {
            unify_stream(temp_dir, stream, totals)
                .with_context(|| format!("failed to unify stream {}", stream.name()))
        })
        .collect();
    for res in results {
        res?;
    }
    info!("Unification done");
    Ok(())
}

/// Copy one stream's artifacts into a `.dat` file sized to the frozen total,
/// in chunk-id order, then delete the artifacts and their subdirectory.
fn unify_stream(temp_dir: &Path, stream: Stream, totals: &MoveTotals) -> Result<()> {
    let stream_dir = temp_dir.join(stream.name());
    let artifacts = storage::list_artifacts(&stream_dir, stream)?;
    if artifacts.len() as u64 != totals.chunks {
        return Err(PreprocessError::consistency(format!(
            "stream {} has {} chunk artifacts but {} chunks were produced",
            stream.name(),
            artifacts.len(),
            totals.chunks
        ))
        .into());
    }

    let expected_rows = totals.rows(stream.mover());
    let mut writer = storage::DatWriter::create(
        temp_dir.join(stream.unified_file_name()),
        stream.row_bytes(),
        expected_rows,
    )?;
    for (chunk_id, path) in &artifacts {
        let (_, bytes) = storage::read_artifact(path, stream)
            .with_context(|| format!("failed to read chunk {} of stream {}", chunk_id, stream.name()))?;
        writer.append(&bytes)?;
    }
    // Short or excess coverage of the declared total fails here.
    writer.finish()?;

    for (_, path) in &artifacts {
        storage::remove_file(path)?;
    }
    storage::remove_dir(&stream_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::ColumnData;
    use std::fs;
    use tempfile::tempdir;

    fn label_rows(path: &Path) -> Vec<u8> {
        fs::read(path).unwrap()
    }

    fn write_label_artifact(temp_dir: &Path, stream: Stream, id: u64, rows: &[bool]) {
        storage::write_artifact(temp_dir, stream, id, &ColumnData::Bool(rows.to_vec())).unwrap();
    }

    fn totals_for(stream: Stream, rows: u64, chunks: u64) -> MoveTotals {
        let mut totals = MoveTotals {
            chunks,
            ..MoveTotals::default()
        };
        match stream.mover() {
            crate::schema::Mover::White => totals.white_moves = rows,
            crate::schema::Mover::Black => totals.black_moves = rows,
        }
        totals
    }

    #[test]
    fn reassembly_follows_chunk_id_order_not_write_order() {
        let dir = tempdir().unwrap();
        let stream = Stream::YWhite;
        fs::create_dir_all(dir.path().join(stream.name())).unwrap();

        // Chunk 2 is written before chunk 1 and chunk 10 sorts after both
        // numerically despite sorting first lexically.
        write_label_artifact(dir.path(), stream, 2, &[true, true]);
        write_label_artifact(dir.path(), stream, 10, &[false]);
        write_label_artifact(dir.path(), stream, 1, &[false, false, false]);

        let totals = totals_for(stream, 6, 3);
        unify_stream(dir.path(), stream, &totals).unwrap();

        let unified = dir.path().join(stream.unified_file_name());
        assert_eq!(label_rows(&unified), vec![0, 0, 0, 1, 1, 0]);

        // Artifacts and their subdirectory are gone.
        assert!(!dir.path().join(stream.name()).exists());
    }

    #[test]
    fn reassembly_is_idempotent() {
        let dir = tempdir().unwrap();
        let stream = Stream::YBlack;

        let mut first = Vec::new();
        for run in 0..2 {
            fs::create_dir_all(dir.path().join(stream.name())).unwrap();
            write_label_artifact(dir.path(), stream, 1, &[true, false]);
            write_label_artifact(dir.path(), stream, 2, &[false, true, true]);
            let totals = totals_for(stream, 5, 2);
            unify_stream(dir.path(), stream, &totals).unwrap();
            let bytes = label_rows(&dir.path().join(stream.unified_file_name()));
            if run == 0 {
                first = bytes;
            } else {
                assert_eq!(bytes, first);
            }
        }
    }

    #[test]
    fn missing_artifact_is_a_consistency_error() {
        let dir = tempdir().unwrap();
        let stream = Stream::YWhite;
        fs::create_dir_all(dir.path().join(stream.name())).unwrap();
        write_label_artifact(dir.path(), stream, 1, &[true]);

        // Two chunks were produced but only one artifact survived.
        let totals = totals_for(stream, 2, 2);
        let err = unify_stream(dir.path(), stream, &totals).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::Consistency { .. })
        ));
    }

    #[test]
    fn zero_chunks_yield_an_empty_unified_array() {
        let dir = tempdir().unwrap();
        let stream = Stream::YWhite;
        fs::create_dir_all(dir.path().join(stream.name())).unwrap();

        let totals = totals_for(stream, 0, 0);
        unify_stream(dir.path(), stream, &totals).unwrap();
        let unified = dir.path().join(stream.unified_file_name());
        assert!(unified.exists());
        assert_eq!(fs::metadata(&unified).unwrap().len(), 0);
    }
}
