//! On-disk formats for the three pipeline stages: gzip-compressed NPY chunk
//! artifacts, and headerless little-endian `.dat` arrays for the unified and
//! final stages, addressed by row offset.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;
use npyz::{DType, NpyFile, TypeStr, WriterBuilder};

use crate::encode::ColumnData;
use crate::error::PreprocessError;
use crate::schema::{ElemKind, Stream};

const IO_ATTEMPTS: usize = 3;
const IO_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Run a file-system operation, retrying transient failures a bounded number
/// of times before surfacing a storage error for `path`.
fn with_retry<T>(path: &Path, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < IO_ATTEMPTS && is_transient(&err) => {
                warn!(
                    "retrying {} after transient error: {err}",
                    path.display()
                );
                std::thread::sleep(IO_RETRY_DELAY);
                attempt += 1;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context(PreprocessError::storage(path)));
            }
        }
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
    )
}

pub fn remove_file(path: &Path) -> Result<()> {
    with_retry(path, || fs::remove_file(path))
}

pub fn remove_dir(path: &Path) -> Result<()> {
    with_retry(path, || fs::remove_dir(path))
}

fn npy_bytes<T: npyz::Serialize>(
    type_str: TypeStr,
    shape: &[u64],
    values: impl IntoIterator<Item = T>,
) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = npyz::WriteOptions::new()
        .dtype(DType::Plain(type_str))
        .shape(shape)
        .writer(&mut cursor)
        .begin_nd()?;
    writer.extend(values)?;
    writer.finish()?;
    Ok(cursor.into_inner())
}

/// Persist one (stream, chunk) array as a gzip-compressed NPY artifact,
/// written to a temporary path and renamed into place.
pub fn write_artifact(
    temp_dir: &Path,
    stream: Stream,
    chunk_id: u64,
    data: &ColumnData,
) -> Result<()> {
    let rows = (data.len() / stream.row_elems()) as u64;
    let mut shape = Vec::with_capacity(1 + stream.trailing_shape().len());
    shape.push(rows);
    shape.extend_from_slice(stream.trailing_shape());

    let type_str = stream.elem_kind().type_str();
    let npy = match data {
        ColumnData::Bool(v) => npy_bytes(type_str, &shape, v.iter().copied())?,
        ColumnData::Int(v) => npy_bytes(type_str, &shape, v.iter().copied())?,
        ColumnData::Real(v) => npy_bytes(type_str, &shape, v.iter().copied())?,
    };

    let final_path = temp_dir
        .join(stream.name())
        .join(stream.chunk_file_name(chunk_id));
    let tmp_path = final_path.with_extension("gz.tmp");
    let file = with_retry(&tmp_path, || File::create(&tmp_path))?;
    let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
    gz.write_all(&npy)
        .context(PreprocessError::storage(&tmp_path))?;
    let mut inner = gz.finish().context(PreprocessError::storage(&tmp_path))?;
    inner
        .flush()
        .context(PreprocessError::storage(&tmp_path))?;
    drop(inner);
    with_retry(&final_path, || fs::rename(&tmp_path, &final_path))
}

/// Read one artifact back as raw little-endian row bytes.
pub fn read_artifact(path: &Path, stream: Stream) -> Result<(u64, Vec<u8>)> {
    let file = with_retry(path, || File::open(path))?;
    let mut reader = BufReader::new(GzDecoder::new(file));
    let npy = NpyFile::new(&mut reader)
        .with_context(|| format!("failed to read artifact {}", path.display()))?;

    let shape = npy.shape().to_vec();
    let trailing = stream.trailing_shape();
    if shape.len() != 1 + trailing.len() || shape[1..] != trailing[..] {
        return Err(PreprocessError::consistency(format!(
            "artifact {} has shape {:?}, expected trailing shape {:?}",
            path.display(),
            shape,
            trailing
        ))
        .into());
    }
    let rows = shape[0];

    let mut bytes = Vec::with_capacity(rows as usize * stream.row_bytes());
    match stream.elem_kind() {
        ElemKind::Bool => {
            let data = npy
                .data::<bool>()
                .map_err(|err| anyhow!("{}: {err}", path.display()))?;
            for value in data {
                let value =
                    value.with_context(|| format!("failed to decode {}", path.display()))?;
                bytes.push(u8::from(value));
            }
        }
        ElemKind::Int => {
            let data = npy
                .data::<i64>()
                .map_err(|err| anyhow!("{}: {err}", path.display()))?;
            for value in data {
                let value =
                    value.with_context(|| format!("failed to decode {}", path.display()))?;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        ElemKind::Real => {
            let data = npy
                .data::<f64>()
                .map_err(|err| anyhow!("{}: {err}", path.display()))?;
            for value in data {
                let value =
                    value.with_context(|| format!("failed to decode {}", path.display()))?;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    if bytes.len() != rows as usize * stream.row_bytes() {
        return Err(PreprocessError::consistency(format!(
            "artifact {} declares {} rows but carries {} bytes",
            path.display(),
            rows,
            bytes.len()
        ))
        .into());
    }
    Ok((rows, bytes))
}

/// Enumerate a stream's chunk artifacts, sorted by embedded chunk id.
///
/// Directory listing order is never trusted; misalignment between a feature
/// stream and its label stream is exactly what the id sort prevents.
pub fn list_artifacts(stream_dir: &Path, stream: Stream) -> Result<Vec<(u64, PathBuf)>> {
    let mut artifacts = Vec::new();
    let entries = with_retry(stream_dir, || fs::read_dir(stream_dir))?;
    for entry in entries {
        let entry = entry.context(PreprocessError::storage(stream_dir))?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        match stream.parse_chunk_id(name) {
            Some(id) => artifacts.push((id, entry.path())),
            None => warn!(
                "ignoring foreign file {} in {}",
                name,
                stream_dir.display()
            ),
        }
    }
    artifacts.sort_by_key(|(id, _)| *id);
    Ok(artifacts)
}

/// Sequential writer for a `.dat` array with a declared final row count,
/// written to a temporary path and renamed into place by [`DatWriter::finish`].
pub struct DatWriter {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_bytes: usize,
    rows_written: u64,
    expected_rows: u64,
}

impl DatWriter {
    pub fn create(final_path: PathBuf, row_bytes: usize, expected_rows: u64) -> Result<Self> {
        if let Some(parent) = final_path.parent() {
            with_retry(parent, || fs::create_dir_all(parent))?;
        }
        let tmp_path = final_path.with_extension("dat.tmp");
        let file = with_retry(&tmp_path, || File::create(&tmp_path))?;
        Ok(DatWriter {
            writer: BufWriter::new(file),
            tmp_path,
            final_path,
            row_bytes,
            rows_written: 0,
            expected_rows,
        })
    }

    /// Append whole rows of raw bytes at the next contiguous offset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % self.row_bytes != 0 {
            return Err(PreprocessError::consistency(format!(
                "{} bytes is not a whole number of {}-byte rows for {}",
                bytes.len(),
                self.row_bytes,
                self.final_path.display()
            ))
            .into());
        }
        let rows = (bytes.len() / self.row_bytes) as u64;
        if self.rows_written + rows > self.expected_rows {
            return Err(PreprocessError::consistency(format!(
                "{} would exceed its declared total of {} rows",
                self.final_path.display(),
                self.expected_rows
            ))
            .into());
        }
        self.writer
            .write_all(bytes)
            .context(PreprocessError::storage(&self.tmp_path))?;
        self.rows_written += rows;
        Ok(())
    }

    /// Flush, verify the declared row count was reached, and rename into
    /// place. A short count is a consistency error and leaves the temporary
    /// file behind for diagnosis.
    pub fn finish(self) -> Result<()> {
        let DatWriter {
            mut writer,
            tmp_path,
            final_path,
            rows_written,
            expected_rows,
            ..
        } = self;
        writer
            .flush()
            .context(PreprocessError::storage(&tmp_path))?;
        drop(writer);
        if rows_written != expected_rows {
            return Err(PreprocessError::consistency(format!(
                "{} holds {} rows but {} were declared",
                final_path.display(),
                rows_written,
                expected_rows
            ))
            .into());
        }
        with_retry(&final_path, || fs::rename(&tmp_path, &final_path))
    }
}

/// Row-offset reader over a finished `.dat` array.
pub struct DatReader {
    file: File,
    path: PathBuf,
    row_bytes: usize,
    rows: u64,
}

impl DatReader {
    pub fn open(path: &Path, row_bytes: usize) -> Result<Self> {
        let file = with_retry(path, || File::open(path))?;
        let len = file
            .metadata()
            .context(PreprocessError::storage(path))?
            .len();
        if len % row_bytes as u64 != 0 {
            return Err(PreprocessError::consistency(format!(
                "{} is {} bytes, not a whole number of {}-byte rows",
                path.display(),
                len,
                row_bytes
            ))
            .into());
        }
        Ok(DatReader {
            file,
            path: path.to_path_buf(),
            row_bytes,
            rows: len / row_bytes as u64,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Read the row at `index` into `buf` (`buf.len()` must equal the row
    /// width).
    pub fn read_row(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.row_bytes {
            return Err(PreprocessError::consistency(format!(
                "row buffer of {} bytes does not match row width {}",
                buf.len(),
                self.row_bytes
            ))
            .into());
        }
        if index >= self.rows {
            return Err(PreprocessError::consistency(format!(
                "row {} out of range for {} ({} rows)",
                index,
                self.path.display(),
                self.rows
            ))
            .into());
        }
        self.file
            .seek(SeekFrom::Start(index * self.row_bytes as u64))
            .context(PreprocessError::storage(&self.path))?;
        self.file
            .read_exact(buf)
            .context(PreprocessError::storage(&self.path))?;
        Ok(())
    }
}
