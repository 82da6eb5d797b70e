use crate::board::{Board, BoardSettings};
use crate::models::{BlockStatus, StorageSnapshot, MAX_BLOCK_SECS};
use crate::notify::Notifier;
use crate::storage::Storage;
use crate::timer::{remaining_secs, ActiveTimer};
use crate::uploads::UploadStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing in progress and no timer record.
    Idle,
    /// The persisted countdown was handed back to the in-progress block.
    Resumed,
    /// A block was in progress without a usable record; its countdown starts over.
    Restarted,
    /// A timer record existed with no matching in-progress block and was deleted.
    OrphanDiscarded,
}

pub struct Recovered {
    pub board: Board,
    pub timer: Option<ActiveTimer>,
    pub outcome: Reconciliation,
}

/// Reads the block snapshot once. Missing or unreadable data yields the
/// default waiting set, which is persisted right away.
pub fn load_board(
    storage: &Storage,
    settings: BoardSettings,
    notifier: Box<dyn Notifier>,
    uploads: Option<UploadStore>,
) -> Result<Board> {
    let snapshot = match storage.load_snapshot()? {
        Some(mut snapshot) => {
            if repair(&mut snapshot, settings.block_secs) {
                storage.save_snapshot(&snapshot)?;
            }
            snapshot
        }
        None => {
            info!("No saved board, generating defaults");
            let snapshot = StorageSnapshot::with_defaults(settings.hours, settings.block_secs);
            storage.save_snapshot(&snapshot)?;
            snapshot
        }
    };

    Ok(Board::new(storage.clone(), snapshot, settings, notifier, uploads))
}

/// Pairs the persisted active-timer record with the in-progress block.
pub fn recover_timer(
    storage: &Storage,
    board: &Board,
    persist_interval: Duration,
    now: DateTime<Utc>,
) -> Result<(Option<ActiveTimer>, Reconciliation)> {
    let record = storage.load_active_timer()?;

    let Some(block) = board.active_block() else {
        if record.is_some() {
            info!("Discarding orphaned active timer record");
            storage.clear_active_timer()?;
            return Ok((None, Reconciliation::OrphanDiscarded));
        }
        return Ok((None, Reconciliation::Idle));
    };

    let record = record.filter(|r| match r.block_id.as_deref() {
        Some(owner) if owner != block.id => {
            warn!(
                "Active timer record belongs to {}, not {}; discarding",
                owner, block.id
            );
            false
        }
        _ => true,
    });
    let record = record.filter(|r| {
        let left = r
            .paused_remaining
            .unwrap_or_else(|| remaining_secs(r.end_time, now));
        if left > MAX_BLOCK_SECS {
            warn!("Active timer record has {}s left; discarding", left);
            return false;
        }
        true
    });

    let outcome = if record.is_some() {
        Reconciliation::Resumed
    } else {
        Reconciliation::Restarted
    };
    let timer = ActiveTimer::start(
        storage.clone(),
        block.id.clone(),
        block.remaining_time,
        record,
        persist_interval,
        now,
    )?;
    Ok((Some(timer), outcome))
}

pub fn bootstrap(
    storage: &Storage,
    settings: BoardSettings,
    persist_interval: Duration,
    notifier: Box<dyn Notifier>,
    uploads: Option<UploadStore>,
    now: DateTime<Utc>,
) -> Result<Recovered> {
    let board = load_board(storage, settings, notifier, uploads)?;
    let (timer, outcome) = recover_timer(storage, &board, persist_interval, now)?;
    Ok(Recovered {
        board,
        timer,
        outcome,
    })
}

/// Restores the lane invariants on a snapshot read from disk. Returns true
/// if anything changed.
fn repair(snapshot: &mut StorageSnapshot, block_secs: u64) -> bool {
    let mut changed = false;

    let fallback = block_secs.clamp(1, MAX_BLOCK_SECS);
    for block in snapshot
        .waiting_blocks
        .iter_mut()
        .chain(snapshot.in_progress_blocks.iter_mut())
        .chain(snapshot.completed_blocks.iter_mut())
    {
        if block.remaining_time > MAX_BLOCK_SECS {
            warn!(
                "{} has a duration of {}s; resetting to {}s",
                block.id, block.remaining_time, fallback
            );
            block.remaining_time = fallback;
            changed = true;
        }
    }

    let dropped = snapshot.dedup();
    if dropped > 0 {
        warn!("Dropped {} duplicate blocks from saved board", dropped);
        changed = true;
    }

    if snapshot.in_progress_blocks.len() > 1 {
        let extra: Vec<_> = snapshot.in_progress_blocks.drain(1..).collect();
        warn!("Returning {} extra in-progress blocks to waiting", extra.len());
        for mut block in extra.into_iter().rev() {
            block.status = BlockStatus::Waiting;
            snapshot.waiting_blocks.insert(0, block);
        }
        changed = true;
    }

    changed
}
