use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BLOCK_SECS: u64 = 600;
pub const DEFAULT_HOURS: u32 = 8;
/// Upper bound for any single block; longer stored values are treated as corrupt.
pub const MAX_BLOCK_SECS: u64 = 24 * 3600;
pub const MAX_HOURS: u32 = 24;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlockStatus {
    Waiting,
    InProgress,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimeBlock {
    pub id: String,
    pub status: BlockStatus,
    /// Nominal duration while waiting; frozen at the starting value once completed.
    pub remaining_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl TimeBlock {
    pub fn waiting(id: impl Into<String>, remaining_time: u64) -> Self {
        Self {
            id: id.into(),
            status: BlockStatus::Waiting,
            remaining_time,
            description: None,
            image_path: None,
        }
    }
}

/// Builds the default waiting set: six blocks per hour of `block_secs` each.
pub fn generate_blocks(hours: u32, block_secs: u64) -> Vec<TimeBlock> {
    let per_hour = (3600 / block_secs.max(1)).max(1);
    let total = hours as u64 * per_hour;
    (0..total)
        .map(|i| TimeBlock::waiting(format!("block-{}", i), block_secs))
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSnapshot {
    pub waiting_blocks: Vec<TimeBlock>,
    pub in_progress_blocks: Vec<TimeBlock>,
    pub completed_blocks: Vec<TimeBlock>,
    #[serde(default)]
    pub break_time_minutes: u32,
}

impl StorageSnapshot {
    pub fn with_defaults(hours: u32, block_secs: u64) -> Self {
        Self {
            waiting_blocks: generate_blocks(hours, block_secs),
            ..Self::default()
        }
    }

    pub fn lanes(&self) -> impl Iterator<Item = &TimeBlock> {
        self.waiting_blocks
            .iter()
            .chain(self.in_progress_blocks.iter())
            .chain(self.completed_blocks.iter())
    }

    /// Drops later occurrences of an id already seen in an earlier lane.
    /// Returns the number of blocks removed.
    pub fn dedup(&mut self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let mut removed = 0;
        for lane in [
            &mut self.completed_blocks,
            &mut self.in_progress_blocks,
            &mut self.waiting_blocks,
        ] {
            let before = lane.len();
            lane.retain(|b| seen.insert(b.id.clone()));
            removed += before - lane.len();
        }
        removed
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActiveTimerSnapshot {
    /// Owning block. Older records may not carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    /// Set only while the countdown is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_remaining: Option<u64>,
}
