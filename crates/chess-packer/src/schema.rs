//! Static stream table: names, shapes, and element kinds for the ten
//! tensor streams produced by the pipeline.

use npyz::TypeStr;

/// The side that made a move. Rows are partitioned into two independent
/// populations by mover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mover {
    White,
    Black,
}

impl Mover {
    pub const BOTH: [Mover; 2] = [Mover::White, Mover::Black];

    pub fn name(self) -> &'static str {
        match self {
            Mover::White => "white",
            Mover::Black => "black",
        }
    }
}

/// Element kind of a stream, fixed per stream by the table below.
///
/// On disk: booleans are one byte (0/1), integers little-endian `i64`,
/// reals little-endian `f64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemKind {
    Bool,
    Int,
    Real,
}

impl ElemKind {
    pub fn byte_width(self) -> usize {
        match self {
            ElemKind::Bool => 1,
            ElemKind::Int => 8,
            ElemKind::Real => 8,
        }
    }

    /// NumPy type string for NPY chunk artifacts.
    pub fn type_str(self) -> TypeStr {
        let ts = match self {
            ElemKind::Bool => "|b1",
            ElemKind::Int => "<i8",
            ElemKind::Real => "<f8",
        };
        ts.parse().unwrap()
    }
}

/// One of the ten tensor streams: four feature channels plus one label
/// channel per mover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    XWhite1,
    XWhite2,
    XWhite3,
    XWhite4,
    XBlack1,
    XBlack2,
    XBlack3,
    XBlack4,
    YWhite,
    YBlack,
}

impl Stream {
    pub const ALL: [Stream; 10] = [
        Stream::XWhite1,
        Stream::XWhite2,
        Stream::XWhite3,
        Stream::XWhite4,
        Stream::XBlack1,
        Stream::XBlack2,
        Stream::XBlack3,
        Stream::XBlack4,
        Stream::YWhite,
        Stream::YBlack,
    ];

    /// The four feature streams of a mover, in channel order.
    pub fn features(mover: Mover) -> [Stream; 4] {
        match mover {
            Mover::White => [
                Stream::XWhite1,
                Stream::XWhite2,
                Stream::XWhite3,
                Stream::XWhite4,
            ],
            Mover::Black => [
                Stream::XBlack1,
                Stream::XBlack2,
                Stream::XBlack3,
                Stream::XBlack4,
            ],
        }
    }

    /// The label stream of a mover.
    pub fn label(mover: Mover) -> Stream {
        match mover {
            Mover::White => Stream::YWhite,
            Mover::Black => Stream::YBlack,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stream::XWhite1 => "X_white_1",
            Stream::XWhite2 => "X_white_2",
            Stream::XWhite3 => "X_white_3",
            Stream::XWhite4 => "X_white_4",
            Stream::XBlack1 => "X_black_1",
            Stream::XBlack2 => "X_black_2",
            Stream::XBlack3 => "X_black_3",
            Stream::XBlack4 => "X_black_4",
            Stream::YWhite => "y_white",
            Stream::YBlack => "y_black",
        }
    }

    pub fn mover(self) -> Mover {
        match self {
            Stream::XWhite1
            | Stream::XWhite2
            | Stream::XWhite3
            | Stream::XWhite4
            | Stream::YWhite => Mover::White,
            Stream::XBlack1
            | Stream::XBlack2
            | Stream::XBlack3
            | Stream::XBlack4
            | Stream::YBlack => Mover::Black,
        }
    }

    pub fn elem_kind(self) -> ElemKind {
        match self {
            Stream::XWhite1 | Stream::XBlack1 => ElemKind::Bool,
            Stream::XWhite2 | Stream::XBlack2 => ElemKind::Int,
            Stream::XWhite3 | Stream::XBlack3 => ElemKind::Real,
            Stream::XWhite4 | Stream::XBlack4 => ElemKind::Real,
            Stream::YWhite | Stream::YBlack => ElemKind::Bool,
        }
    }

    /// Per-row tensor shape after the leading row dimension. Empty for the
    /// scalar label streams.
    pub fn trailing_shape(self) -> &'static [u64] {
        match self {
            Stream::XWhite1 | Stream::XBlack1 => &[8, 8, 12],
            Stream::XWhite2 | Stream::XBlack2 => &[8, 8, 6],
            Stream::XWhite3 | Stream::XBlack3 => &[8, 8, 4],
            Stream::XWhite4 | Stream::XBlack4 => &[8, 8, 2],
            Stream::YWhite | Stream::YBlack => &[],
        }
    }

    /// Number of elements in one row. The empty trailing shape of a label
    /// stream yields one element.
    pub fn row_elems(self) -> usize {
        self.trailing_shape().iter().product::<u64>() as usize
    }

    /// Width of one row in the raw `.dat` encoding.
    pub fn row_bytes(self) -> usize {
        self.row_elems() * self.elem_kind().byte_width()
    }

    /// Position of this stream in [`Stream::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn chunk_file_name(self, chunk_id: u64) -> String {
        format!("{}_chunk_{}.npy.gz", self.name(), chunk_id)
    }

    /// Parse the chunk id embedded in an artifact file name of this stream.
    /// Returns `None` for foreign files.
    pub fn parse_chunk_id(self, file_name: &str) -> Option<u64> {
        let stem = file_name.strip_suffix(".npy.gz")?;
        let id = stem.strip_prefix(self.name())?.strip_prefix("_chunk_")?;
        id.parse().ok()
    }

    pub fn unified_file_name(self) -> String {
        format!("{}.dat", self.name())
    }

    pub fn val_file_name(self) -> String {
        format!("{}_val.dat", self.name())
    }

    pub fn tuning_file_name(self) -> String {
        format!("{}_tuning.dat", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_documented_layout() {
        assert_eq!(Stream::ALL.len(), 10);
        assert_eq!(Stream::XWhite1.row_elems(), 8 * 8 * 12);
        assert_eq!(Stream::XWhite2.row_elems(), 8 * 8 * 6);
        assert_eq!(Stream::XBlack3.row_elems(), 8 * 8 * 4);
        assert_eq!(Stream::XBlack4.row_elems(), 8 * 8 * 2);
        assert_eq!(Stream::YWhite.row_elems(), 1);

        // Bool streams are one byte per element, int/real eight.
        assert_eq!(Stream::XWhite1.row_bytes(), 768);
        assert_eq!(Stream::XWhite2.row_bytes(), 384 * 8);
        assert_eq!(Stream::XWhite3.row_bytes(), 256 * 8);
        assert_eq!(Stream::YBlack.row_bytes(), 1);

        for (idx, stream) in Stream::ALL.iter().enumerate() {
            assert_eq!(stream.index(), idx);
        }
    }

    #[test]
    fn movers_partition_the_streams() {
        let white: Vec<Stream> = Stream::ALL
            .iter()
            .copied()
            .filter(|s| s.mover() == Mover::White)
            .collect();
        assert_eq!(white.len(), 5);
        assert!(white.contains(&Stream::YWhite));
        assert_eq!(Stream::label(Mover::Black), Stream::YBlack);
        assert_eq!(Stream::features(Mover::Black)[2], Stream::XBlack3);
    }

    #[test]
    fn chunk_file_names_round_trip() {
        let name = Stream::XWhite1.chunk_file_name(17);
        assert_eq!(name, "X_white_1_chunk_17.npy.gz");
        assert_eq!(Stream::XWhite1.parse_chunk_id(&name), Some(17));

        // Foreign names are ignored rather than misparsed.
        assert_eq!(Stream::XWhite1.parse_chunk_id("X_white_2_chunk_17.npy.gz"), None);
        assert_eq!(Stream::XWhite1.parse_chunk_id("X_white_1_chunk_17.npy.tmp"), None);
        assert_eq!(Stream::XWhite1.parse_chunk_id("X_white_1_chunk_abc.npy.gz"), None);
    }
}
