use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of frames retained per player when no capacity is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// One timestamped progress sample submitted by a player during a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFrame {
    /// Gameplay clock of the sample, in milliseconds.
    pub timestamp: u64,
    /// Cumulative score at this point of the play.
    pub total_score: u64,
    /// Current combo.
    #[serde(default)]
    pub combo: u32,
    /// Highest combo reached so far.
    #[serde(default)]
    pub max_combo: u32,
    /// Accuracy in the `0.0..=1.0` range.
    #[serde(default)]
    pub accuracy: f64,
    /// Judgement counts keyed by judgement name (`great`, `miss`, ...).
    #[serde(default)]
    pub statistics: BTreeMap<String, u32>,
    /// The player reached the end of the play with this frame.
    #[serde(default)]
    pub completed: bool,
    /// The player failed the play with this frame.
    #[serde(default)]
    pub failed: bool,
}

/// Returned when a frame is not newer than the newest buffered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale frame: timestamp {timestamp} is not newer than {newest}")]
pub struct StaleFrame {
    /// Timestamp of the rejected frame.
    pub timestamp: u64,
    /// Timestamp of the newest frame already buffered.
    pub newest: u64,
}

/// Fixed-capacity FIFO of the most recent score frames of one player.
///
/// Frames are kept in strictly increasing timestamp order; once the buffer is
/// full every accepted frame evicts the oldest one.
#[derive(Debug, Clone)]
pub struct ScoreFrameBuffer {
    frames: VecDeque<ScoreFrame>,
    capacity: usize,
}

impl ScoreFrameBuffer {
    /// Build an empty buffer. A zero capacity is bumped to one frame.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one when the buffer is full.
    pub fn append(&mut self, frame: ScoreFrame) -> Result<(), StaleFrame> {
        if let Some(newest) = self.frames.back()
            && frame.timestamp <= newest.timestamp
        {
            return Err(StaleFrame {
                timestamp: frame.timestamp,
                newest: newest.timestamp,
            });
        }

        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Newest frame, if any.
    pub fn latest(&self) -> Option<&ScoreFrame> {
        self.frames.back()
    }

    /// Copy of every buffered frame, oldest first. Meant for replays and
    /// debugging; the leaderboard only ever looks at [`Self::latest`].
    pub fn snapshot_all(&self) -> Vec<ScoreFrame> {
        self.frames.iter().cloned().collect()
    }

    /// Drop every frame, returning how many were buffered.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Maximum number of frames retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ScoreFrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
pub(crate) fn frame(timestamp: u64, total_score: u64) -> ScoreFrame {
    ScoreFrame {
        timestamp,
        total_score,
        combo: 0,
        max_combo: 0,
        accuracy: 1.0,
        statistics: BTreeMap::new(),
        completed: false,
        failed: false,
    }
}
