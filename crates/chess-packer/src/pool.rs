use parking_lot::Mutex;

use crate::encode::GameRecord;

/// Thread-safe pool over the full record set.
///
/// Workers drain it through [`RecordPool::take_chunk`]; the backing buffer is
/// never exposed and callers always receive owned records. An empty return
/// signals "no more work", not an error.
pub struct RecordPool {
    games: Mutex<Vec<GameRecord>>,
}

impl RecordPool {
    pub fn new(games: Vec<GameRecord>) -> Self {
        RecordPool {
            games: Mutex::new(games),
        }
    }

    /// Atomically remove and return up to `size` records from the tail.
    ///
    /// Returns `size` records while at least that many remain, then the
    /// remainder, then an empty vec. Concurrent callers never receive
    /// overlapping records and every record is handed out exactly once.
    pub fn take_chunk(&self, size: usize) -> Vec<GameRecord> {
        let mut games = self.games.lock();
        let len = games.len();
        if len == 0 || size == 0 {
            return Vec::new();
        }
        games.split_off(len - size.min(len))
    }

    pub fn len(&self) -> usize {
        self.games.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
