use anyhow::{bail, Result};
use serde::Deserialize;

use crate::schema::{ElemKind, Mover, Stream};

/// One scraped game: PGN transcript plus outcome label.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GameRecord {
    #[serde(rename = "pgn_text")]
    pub pgn: String,
    pub is_white_win: bool,
}

/// Typed column data for one stream of one chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Real(Vec<f64>),
}

impl ColumnData {
    pub fn elem_kind(&self) -> ElemKind {
        match self {
            ColumnData::Bool(_) => ElemKind::Bool,
            ColumnData::Int(_) => ElemKind::Int,
            ColumnData::Real(_) => ElemKind::Real,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Real(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The ten per-chunk arrays produced by a [`ChunkEncoder`], validated
/// against the stream table at construction.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    blocks: [ColumnData; 10],
    rows_white: usize,
    rows_black: usize,
}

impl EncodedChunk {
    /// Bundle the encoder output. Feature arrays must carry
    /// `rows * row_elems` elements of the stream's kind, where `rows` is the
    /// length of that mover's label vector.
    pub fn new(
        x_white: [ColumnData; 4],
        x_black: [ColumnData; 4],
        y_white: Vec<bool>,
        y_black: Vec<bool>,
    ) -> Result<Self> {
        let rows_white = y_white.len();
        let rows_black = y_black.len();
        for (mover, features, rows) in [
            (Mover::White, &x_white, rows_white),
            (Mover::Black, &x_black, rows_black),
        ] {
            for (feature, stream) in features.iter().zip(Stream::features(mover)) {
                if feature.elem_kind() != stream.elem_kind() {
                    bail!(
                        "stream {} expects {:?} elements, encoder produced {:?}",
                        stream.name(),
                        stream.elem_kind(),
                        feature.elem_kind()
                    );
                }
                let expected = rows * stream.row_elems();
                if feature.len() != expected {
                    bail!(
                        "stream {} expects {} elements for {} rows, encoder produced {}",
                        stream.name(),
                        expected,
                        rows,
                        feature.len()
                    );
                }
            }
        }

        let [w1, w2, w3, w4] = x_white;
        let [b1, b2, b3, b4] = x_black;
        let blocks = [
            w1,
            w2,
            w3,
            w4,
            b1,
            b2,
            b3,
            b4,
            ColumnData::Bool(y_white),
            ColumnData::Bool(y_black),
        ];
        Ok(EncodedChunk {
            blocks,
            rows_white,
            rows_black,
        })
    }

    /// Number of moves this chunk contributes to a mover's population.
    pub fn rows(&self, mover: Mover) -> usize {
        match mover {
            Mover::White => self.rows_white,
            Mover::Black => self.rows_black,
        }
    }

    pub fn block(&self, stream: Stream) -> &ColumnData {
        &self.blocks[stream.index()]
    }
}

/// External collaborator turning a slice of games into the ten raw arrays.
///
/// Row counts per mover must equal the number of moves made by that mover
/// within the chunk; [`EncodedChunk::new`] enforces shape and kind agreement.
pub trait ChunkEncoder: Send + Sync {
    fn encode(&self, games: &[GameRecord]) -> Result<EncodedChunk>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rows: usize) -> [ColumnData; 4] {
        [
            ColumnData::Bool(vec![false; rows * 768]),
            ColumnData::Int(vec![0; rows * 384]),
            ColumnData::Real(vec![0.0; rows * 256]),
            ColumnData::Real(vec![0.0; rows * 128]),
        ]
    }

    #[test]
    fn accepts_well_formed_output() {
        let chunk =
            EncodedChunk::new(features(3), features(2), vec![true; 3], vec![false; 2]).unwrap();
        assert_eq!(chunk.rows(Mover::White), 3);
        assert_eq!(chunk.rows(Mover::Black), 2);
        assert_eq!(chunk.block(Stream::XBlack2).len(), 2 * 384);
        assert_eq!(chunk.block(Stream::YWhite).len(), 3);
    }

    #[test]
    fn rejects_row_count_mismatch() {
        let mut x = features(3);
        x[1] = ColumnData::Int(vec![0; 2 * 384]);
        let err = EncodedChunk::new(x, features(0), vec![true; 3], vec![]).unwrap_err();
        assert!(err.to_string().contains("X_white_2"));
    }

    #[test]
    fn rejects_element_kind_mismatch() {
        let mut x = features(1);
        x[0] = ColumnData::Real(vec![0.0; 768]);
        let err = EncodedChunk::new(x, features(0), vec![true], vec![]).unwrap_err();
        assert!(err.to_string().contains("X_white_1"));
    }
}
