use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::info;

use crate::encode::GameRecord;
use crate::error::PreprocessError;

/// Load scraped game records from every `*.jsonl` / `*.jsonl.gz` file under
/// `root`, in deterministic path order. Each line is one JSON object with
/// `pgn_text` and `is_white_win` fields.
pub fn load_games(root: &Path) -> Result<Vec<GameRecord>> {
    if !root.exists() {
        return Err(PreprocessError::config(format!(
            "input directory '{}' does not exist",
            root.display()
        ))
        .into());
    }

    let files = discover_record_files(root)?;
    if files.is_empty() {
        return Err(PreprocessError::config(format!(
            "no .jsonl or .jsonl.gz files found under {}",
            root.display()
        ))
        .into());
    }

    let mut games = Vec::new();
    for path in &files {
        read_record_file(path, &mut games)?;
    }
    info!("Loaded {} games from {} files", games.len(), files.len());
    Ok(games)
}

fn discover_record_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(n) => n,
            None => continue,
        };
        if name.ends_with(".jsonl") || name.ends_with(".jsonl.gz") {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn read_record_file(path: &Path, games: &mut Vec<GameRecord>) -> Result<()> {
    let file = File::open(path).context(PreprocessError::storage(path))?;
    let gzipped = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz")
        .unwrap_or(false);
    let reader: Box<dyn BufRead> = if gzipped {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} of {}", line_idx + 1, path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let game: GameRecord = serde_json::from_str(&line).with_context(|| {
            format!(
                "failed to parse game JSON in {} at line {}",
                path.display(),
                line_idx + 1
            )
        })?;
        games.push(game);
    }
    Ok(())
}
