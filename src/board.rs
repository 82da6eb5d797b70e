use crate::models::{BlockStatus, StorageSnapshot, TimeBlock, MAX_BLOCK_SECS, MAX_HOURS};
use crate::notify::Notifier;
use crate::storage::Storage;
use crate::timer::MAX_DESCRIPTION_CHARS;
use crate::uploads::UploadStore;
use anyhow::{bail, Result};
use tracing::{debug, info, warn};

pub const COMPLETION_TITLE: &str = "tiblo";
pub const COMPLETION_MESSAGE: &str = "Productivity block completed!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSettings {
    pub hours: u32,
    pub block_secs: u64,
    pub break_award_mins: u32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            hours: crate::models::DEFAULT_HOURS,
            block_secs: crate::models::DEFAULT_BLOCK_SECS,
            break_award_mins: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedPatch {
    pub description: Option<String>,
    pub image_path: Option<String>,
}

/// Owner of the three block lanes and the break-time balance.
///
/// Every successful mutation writes the whole snapshot back to storage before
/// returning. Operations that are not allowed in the current state return
/// `Ok(false)` and change nothing.
pub struct Board {
    storage: Storage,
    snapshot: StorageSnapshot,
    settings: BoardSettings,
    notifier: Box<dyn Notifier>,
    uploads: Option<UploadStore>,
}

impl Board {
    pub fn new(
        storage: Storage,
        snapshot: StorageSnapshot,
        settings: BoardSettings,
        notifier: Box<dyn Notifier>,
        uploads: Option<UploadStore>,
    ) -> Self {
        Self {
            storage,
            snapshot,
            settings,
            notifier,
            uploads,
        }
    }

    pub fn snapshot(&self) -> &StorageSnapshot {
        &self.snapshot
    }

    pub fn waiting(&self) -> &[TimeBlock] {
        &self.snapshot.waiting_blocks
    }

    pub fn in_progress(&self) -> &[TimeBlock] {
        &self.snapshot.in_progress_blocks
    }

    pub fn completed(&self) -> &[TimeBlock] {
        &self.snapshot.completed_blocks
    }

    pub fn break_time_minutes(&self) -> u32 {
        self.snapshot.break_time_minutes
    }

    pub fn active_block(&self) -> Option<&TimeBlock> {
        self.snapshot.in_progress_blocks.first()
    }

    pub fn status_of(&self, id: &str) -> Option<BlockStatus> {
        self.snapshot.lanes().find(|b| b.id == id).map(|b| b.status)
    }

    pub fn move_to_in_progress(&mut self, id: &str) -> Result<bool> {
        if !self.snapshot.in_progress_blocks.is_empty() {
            debug!("Refusing to start {}: a block is already in progress", id);
            return Ok(false);
        }
        let Some(idx) = self.snapshot.waiting_blocks.iter().position(|b| b.id == id) else {
            debug!("Refusing to start {}: not in the waiting lane", id);
            return Ok(false);
        };

        let mut block = self.snapshot.waiting_blocks.remove(idx);
        block.status = BlockStatus::InProgress;
        self.snapshot.in_progress_blocks.push(block);
        self.save()?;
        info!("Moved {} to in progress", id);
        Ok(true)
    }

    /// Finishes the in-progress block. Only a block currently in the
    /// in-progress lane can complete, so repeated completion signals for the
    /// same id are no-ops.
    pub fn complete_block(&mut self, id: &str, description: &str) -> Result<bool> {
        let Some(idx) = self.snapshot.in_progress_blocks.iter().position(|b| b.id == id) else {
            debug!("Ignoring completion for {}: not in progress", id);
            return Ok(false);
        };

        // Commit in memory only once the write has succeeded.
        let mut next = self.snapshot.clone();
        let mut block = next.in_progress_blocks.remove(idx);
        block.status = BlockStatus::Completed;
        if !description.trim().is_empty() {
            block.description = Some(description.to_string());
        }
        next.completed_blocks.push(block);
        next.break_time_minutes = next
            .break_time_minutes
            .saturating_add(self.settings.break_award_mins);
        self.storage.save_snapshot(&next)?;
        self.snapshot = next;
        info!(
            "Completed {}; break balance now {} minutes",
            id, self.snapshot.break_time_minutes
        );

        self.notifier.notify(COMPLETION_TITLE, COMPLETION_MESSAGE);
        Ok(true)
    }

    pub fn update_completed_block(&mut self, id: &str, patch: CompletedPatch) -> Result<bool> {
        let Some(block) = self
            .snapshot
            .completed_blocks
            .iter_mut()
            .find(|b| b.id == id)
        else {
            return Ok(false);
        };

        if let Some(description) = patch.description {
            let capped = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
            block.description = Some(capped);
        }
        if let Some(image_path) = patch.image_path {
            block.image_path = Some(image_path);
        }
        self.save()?;
        Ok(true)
    }

    /// Detaches the image from a completed block and deletes the file.
    /// A failed file deletion is logged; the block is updated regardless.
    pub fn remove_completed_image(&mut self, id: &str) -> Result<bool> {
        let Some(block) = self
            .snapshot
            .completed_blocks
            .iter_mut()
            .find(|b| b.id == id)
        else {
            return Ok(false);
        };
        let Some(path) = block.image_path.take() else {
            return Ok(false);
        };

        if let Some(uploads) = &self.uploads {
            if let Err(e) = uploads.delete(&path) {
                warn!("Failed to delete upload {}: {}", path, e);
            }
        }
        self.save()?;
        Ok(true)
    }

    pub fn consume_break_time(&mut self, minutes: u32) -> Result<bool> {
        if self.snapshot.break_time_minutes < minutes {
            return Ok(false);
        }
        self.snapshot.break_time_minutes -= minutes;
        self.save()?;
        Ok(true)
    }

    pub fn set_break_time(&mut self, minutes: i64) -> Result<()> {
        self.snapshot.break_time_minutes = minutes.clamp(0, u32::MAX as i64) as u32;
        self.save()
    }

    pub fn reset(&mut self) -> Result<()> {
        if let Some(uploads) = &self.uploads {
            if let Err(e) = uploads.delete_all() {
                warn!("Failed to delete uploaded images: {}", e);
            }
        }

        self.storage.clear_data()?;
        self.snapshot =
            StorageSnapshot::with_defaults(self.settings.hours, self.settings.block_secs);
        self.save()?;
        info!(
            "Board reset to {} waiting blocks",
            self.snapshot.waiting_blocks.len()
        );
        Ok(())
    }

    /// Reset with new block dimensions.
    pub fn reset_with(&mut self, hours: u32, block_secs: u64) -> Result<()> {
        if block_secs == 0 || block_secs > MAX_BLOCK_SECS || hours > MAX_HOURS {
            bail!("Invalid block layout: {} hours of {}s blocks", hours, block_secs);
        }
        self.settings.hours = hours;
        self.settings.block_secs = block_secs;
        self.reset()
    }

    pub fn total_completed_secs(&self) -> u64 {
        self.snapshot
            .completed_blocks
            .iter()
            .map(|b| b.remaining_time)
            .sum()
    }

    fn save(&self) -> Result<()> {
        self.storage.save_snapshot(&self.snapshot)
    }
}

/// Parses a manual break-time edit. Anything but a plain non-negative number
/// is rejected so the caller keeps the previous value.
pub fn parse_break_minutes(input: &str) -> Option<u32> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
