use crate::models::{ActiveTimerSnapshot, StorageSnapshot};
use crate::storage::Storage;
use crate::timer::remaining_secs;
use crate::utils::{format_clock, format_duration, format_total};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt::Write;

pub struct Reporter {
    storage: Storage,
}

impl Reporter {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn report(&self) -> Result<()> {
        let Some(snapshot) = self.storage.load_snapshot()? else {
            println!("No data recorded yet.");
            return Ok(());
        };
        let timer = self.storage.load_active_timer()?;
        print!("{}", render(&snapshot, timer.as_ref(), Utc::now()));
        Ok(())
    }
}

pub fn render(
    snapshot: &StorageSnapshot,
    timer: Option<&ActiveTimerSnapshot>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let waiting_secs: u64 = snapshot.waiting_blocks.iter().map(|b| b.remaining_time).sum();
    let completed_secs: u64 = snapshot
        .completed_blocks
        .iter()
        .map(|b| b.remaining_time)
        .sum();

    let _ = writeln!(out, "tiblo Report");
    let _ = writeln!(out, "============");
    let _ = writeln!(
        out,
        "Waiting:      {} blocks ({})",
        snapshot.waiting_blocks.len(),
        format_duration(waiting_secs as i64)
    );

    match snapshot.in_progress_blocks.first() {
        Some(block) => {
            let left = match timer {
                Some(t) => match t.paused_remaining {
                    Some(paused) => format!("{} left, paused", format_clock(paused)),
                    None => format!("{} left", format_clock(remaining_secs(t.end_time, now))),
                },
                None => format!("{} left, not started", format_clock(block.remaining_time)),
            };
            let _ = writeln!(out, "In progress:  {} ({})", block.id, left);
        }
        None => {
            let _ = writeln!(out, "In progress:  none");
        }
    }

    let _ = writeln!(
        out,
        "Completed:    {} blocks (Total: {})",
        snapshot.completed_blocks.len(),
        format_total(completed_secs)
    );
    let _ = writeln!(out, "Break time:   {} minutes", snapshot.break_time_minutes);

    if !snapshot.completed_blocks.is_empty() {
        let _ = writeln!(out, "\nCompleted blocks");
        let _ = writeln!(out, "----------------");
        for block in &snapshot.completed_blocks {
            let _ = write!(
                out,
                "  {:<10} {:>6}",
                block.id,
                format_duration(block.remaining_time as i64)
            );
            if let Some(description) = block.description.as_deref().filter(|d| !d.is_empty()) {
                let _ = write!(out, "  {}", description);
            }
            if let Some(image) = &block.image_path {
                let _ = write!(out, "  [{}]", image);
            }
            let _ = writeln!(out);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockStatus, TimeBlock};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_render_summary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut snapshot = StorageSnapshot::with_defaults(1, 600);
        let mut done = snapshot.waiting_blocks.remove(0);
        done.status = BlockStatus::Completed;
        done.description = Some("inbox zero".to_string());
        done.image_path = Some("uploads/1-proof.png".to_string());
        snapshot.completed_blocks.push(done);
        snapshot.in_progress_blocks.push(TimeBlock {
            status: BlockStatus::InProgress,
            ..snapshot.waiting_blocks.remove(0)
        });
        snapshot.break_time_minutes = 10;

        let timer = ActiveTimerSnapshot {
            block_id: Some("block-1".to_string()),
            end_time: now + Duration::seconds(125),
            description: String::new(),
            paused_remaining: None,
        };

        let text = render(&snapshot, Some(&timer), now);
        assert!(text.contains("Waiting:      4 blocks (40m)"));
        assert!(text.contains("In progress:  block-1 (2:05 left)"));
        assert!(text.contains("Completed:    1 blocks (Total: 10 minutes)"));
        assert!(text.contains("Break time:   10 minutes"));
        assert!(text.contains("inbox zero  [uploads/1-proof.png]"));
    }

    #[test]
    fn test_render_paused_and_idle() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut snapshot = StorageSnapshot::with_defaults(1, 600);
        assert!(render(&snapshot, None, now).contains("In progress:  none"));

        snapshot.in_progress_blocks.push(snapshot.waiting_blocks.remove(0));
        let timer = ActiveTimerSnapshot {
            block_id: None,
            end_time: now,
            description: String::new(),
            paused_remaining: Some(61),
        };
        assert!(render(&snapshot, Some(&timer), now).contains("(1:01 left, paused)"));
    }
}
