use crate::models::{ActiveTimerSnapshot, MAX_BLOCK_SECS};
use crate::storage::Storage;
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Running,
    Paused { remaining: u64 },
    Completed,
}

/// Emitted exactly once per timer, when the countdown reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub block_id: String,
    pub description: String,
}

/// Countdown for the single in-progress block.
///
/// The stored `end_time` is the source of truth: remaining time is derived
/// from it on every tick, so missed ticks (a suspended process, a slow
/// terminal) never cause drift. Pausing freezes the remaining seconds and
/// resuming moves `end_time` forward from the moment of resume.
pub struct ActiveTimer {
    storage: Storage,
    block_id: String,
    initial_secs: u64,
    end_time: DateTime<Utc>,
    remaining: u64,
    description: String,
    state: TimerState,
    persist_interval: Duration,
    last_persist: DateTime<Utc>,
}

impl ActiveTimer {
    /// Starts a countdown of `duration_secs`, or picks up a previously
    /// persisted one. A prior `end_time` already in the past is kept as-is and
    /// completes on the first tick.
    pub fn start(
        storage: Storage,
        block_id: impl Into<String>,
        duration_secs: u64,
        prior: Option<ActiveTimerSnapshot>,
        persist_interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let block_id = block_id.into();
        let (end_time, description, state) = match prior {
            Some(prior) => {
                info!("Resuming timer for {} (ends {})", block_id, prior.end_time);
                let state = match prior.paused_remaining {
                    Some(remaining) => TimerState::Paused { remaining },
                    None => TimerState::Running,
                };
                (prior.end_time, prior.description, state)
            }
            None => {
                info!("Starting {}s timer for {}", duration_secs, block_id);
                (
                    end_after(now, duration_secs)?,
                    String::new(),
                    TimerState::Running,
                )
            }
        };

        let remaining = match state {
            TimerState::Paused { remaining } => remaining,
            _ => remaining_secs(end_time, now),
        };

        let timer = Self {
            storage,
            block_id,
            initial_secs: duration_secs,
            end_time,
            remaining,
            description,
            state,
            persist_interval,
            last_persist: now,
        };
        timer.persist()?;
        Ok(timer)
    }

    /// Display tick. Recomputes remaining time, fires the completion edge and
    /// persists on the configured cadence.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<Completion>> {
        if let Some(done) = self.evaluate(now) {
            return Ok(Some(done));
        }

        if self.state == TimerState::Running && now - self.last_persist >= self.persist_interval {
            self.persist()?;
            self.last_persist = now;
        }

        Ok(None)
    }

    /// The terminal regained focus: recheck immediately instead of waiting
    /// for the next tick.
    pub fn on_visible(&mut self, now: DateTime<Utc>) -> Option<Completion> {
        self.evaluate(now)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<Option<Completion>> {
        if self.state != TimerState::Running {
            return Ok(None);
        }
        if let Some(done) = self.evaluate(now) {
            return Ok(Some(done));
        }

        self.state = TimerState::Paused {
            remaining: self.remaining,
        };
        debug!("Paused {} at {}s", self.block_id, self.remaining);
        self.persist()?;
        Ok(None)
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        let TimerState::Paused { remaining } = self.state else {
            return Ok(());
        };

        self.end_time = end_after(now, remaining)?;
        self.remaining = remaining;
        self.state = TimerState::Running;
        self.last_persist = now;
        debug!("Resumed {} with {}s left", self.block_id, remaining);
        self.persist()
    }

    pub fn toggle(&mut self, now: DateTime<Utc>) -> Result<Option<Completion>> {
        match self.state {
            TimerState::Running => self.pause(now),
            TimerState::Paused { .. } => self.resume(now).map(|_| None),
            TimerState::Completed => Ok(None),
        }
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        if self.state == TimerState::Completed {
            return Ok(());
        }
        self.description = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
        self.persist()
    }

    /// Completed timers erase their record; anything else is saved so the
    /// countdown can be resumed by the next process.
    pub fn teardown(self) -> Result<()> {
        if self.state == TimerState::Completed {
            self.storage.clear_active_timer()
        } else {
            self.persist()
        }
    }

    pub fn snapshot(&self) -> ActiveTimerSnapshot {
        ActiveTimerSnapshot {
            block_id: Some(self.block_id.clone()),
            end_time: self.end_time,
            description: self.description.clone(),
            paused_remaining: match self.state {
                TimerState::Paused { remaining } => Some(remaining),
                _ => None,
            },
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    /// Fraction of the initial duration still left, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.initial_secs == 0 {
            return 0.0;
        }
        (self.remaining as f64 / self.initial_secs as f64).clamp(0.0, 1.0)
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> Option<Completion> {
        if self.state != TimerState::Running {
            return None;
        }

        self.remaining = remaining_secs(self.end_time, now);
        if self.remaining > 0 {
            return None;
        }

        // The record stays until teardown, after the board has saved the
        // completion.
        self.state = TimerState::Completed;
        info!("Timer for {} completed", self.block_id);

        Some(Completion {
            block_id: self.block_id.clone(),
            description: self.description.clone(),
        })
    }

    fn persist(&self) -> Result<()> {
        self.storage.save_active_timer(&self.snapshot())
    }
}

/// `now + secs`, refusing durations longer than a block may last.
fn end_after(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>> {
    if secs > MAX_BLOCK_SECS {
        bail!("Timer duration of {}s exceeds {}s", secs, MAX_BLOCK_SECS);
    }
    Duration::try_seconds(secs as i64)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| anyhow::anyhow!("Timer end time out of range"))
}

/// Whole seconds left until `end_time`, rounded up and never negative.
pub fn remaining_secs(end_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (end_time - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn start_fresh(storage: &Storage, secs: u64) -> ActiveTimer {
        ActiveTimer::start(
            storage.clone(),
            "block-0",
            secs,
            None,
            Duration::seconds(10),
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn test_remaining_rounds_up_and_clamps() {
        let end = t0() + Duration::seconds(10);
        assert_eq!(remaining_secs(end, t0()), 10);
        assert_eq!(remaining_secs(end, t0() + Duration::milliseconds(100)), 10);
        assert_eq!(remaining_secs(end, t0() + Duration::milliseconds(9_001)), 1);
        assert_eq!(remaining_secs(end, end), 0);
        assert_eq!(remaining_secs(end, end + Duration::hours(3)), 0);
    }

    #[test]
    fn test_start_persists_end_time() {
        let storage = Storage::in_memory();
        let timer = start_fresh(&storage, 600);

        let saved = storage.load_active_timer().unwrap().unwrap();
        assert_eq!(saved.end_time, t0() + Duration::seconds(600));
        assert_eq!(saved.block_id.as_deref(), Some("block-0"));
        assert_eq!(timer.remaining_secs(), 600);
        assert!(timer.is_running());
    }

    #[test]
    fn test_completes_once_within_one_tick_of_duration() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);
        let tick = Duration::milliseconds(100);

        let mut now = t0();
        let mut fired = Vec::new();
        while now < t0() + Duration::seconds(605) {
            now += tick;
            if let Some(done) = timer.tick(now).unwrap() {
                fired.push((now, done));
            }
        }

        assert_eq!(fired.len(), 1);
        let (at, done) = &fired[0];
        let elapsed = *at - t0();
        assert!(elapsed >= Duration::seconds(600));
        assert!(elapsed < Duration::seconds(600) + tick);
        assert_eq!(done.block_id, "block-0");

        // the record outlives the completion edge until teardown
        assert!(storage.load_active_timer().unwrap().is_some());
        timer.teardown().unwrap();
        assert!(storage.load_active_timer().unwrap().is_none());
    }

    #[test]
    fn test_oversized_duration_is_rejected() {
        let storage = Storage::in_memory();
        let result = ActiveTimer::start(
            storage.clone(),
            "block-0",
            100_000_000_000_000_000,
            None,
            Duration::seconds(10),
            t0(),
        );
        assert!(result.is_err());
        assert!(storage.load_active_timer().unwrap().is_none());

        let mut timer = ActiveTimer::start(
            storage,
            "block-0",
            600,
            Some(ActiveTimerSnapshot {
                block_id: Some("block-0".to_string()),
                end_time: t0(),
                description: String::new(),
                paused_remaining: Some(u64::MAX),
            }),
            Duration::seconds(10),
            t0(),
        )
        .unwrap();
        assert!(timer.resume(t0()).is_err());
        assert_eq!(timer.state(), TimerState::Paused { remaining: u64::MAX });
    }

    #[test]
    fn test_missed_ticks_do_not_drift() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);

        // a single tick after a long stall sees the wall-clock truth
        assert!(timer.tick(t0() + Duration::seconds(420)).unwrap().is_none());
        assert_eq!(timer.remaining_secs(), 180);
    }

    #[test]
    fn test_pause_resume_preserves_remaining() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);

        let mut now = t0() + Duration::milliseconds(123_400);
        for pause_for in [5, 3600, 1, 86_400] {
            timer.tick(now).unwrap();
            let before = timer.remaining_secs();
            assert!(timer.pause(now).unwrap().is_none());

            now += Duration::seconds(pause_for);
            assert!(timer.tick(now).unwrap().is_none());
            assert_eq!(timer.remaining_secs(), before);

            timer.resume(now).unwrap();
            timer.tick(now).unwrap();
            assert_eq!(timer.remaining_secs(), before);

            now += Duration::milliseconds(7_250);
        }
    }

    #[test]
    fn test_paused_state_survives_reload() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);
        timer.pause(t0() + Duration::seconds(100)).unwrap();
        timer.teardown().unwrap();

        let prior = storage.load_active_timer().unwrap();
        assert_eq!(prior.as_ref().unwrap().paused_remaining, Some(500));

        let later = t0() + Duration::hours(2);
        let mut restored = ActiveTimer::start(
            storage.clone(),
            "block-0",
            600,
            prior,
            Duration::seconds(10),
            later,
        )
        .unwrap();
        assert_eq!(restored.state(), TimerState::Paused { remaining: 500 });

        restored.resume(later).unwrap();
        assert_eq!(restored.end_time(), later + Duration::seconds(500));
    }

    #[test]
    fn test_visibility_recheck_completes_immediately() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);
        timer.tick(t0() + Duration::seconds(1)).unwrap();

        // backgrounded for longer than what was left; no ticks in between
        let back = t0() + Duration::seconds(900);
        let done = timer.on_visible(back);
        assert_eq!(done.map(|c| c.block_id), Some("block-0".to_string()));

        assert!(timer.on_visible(back).is_none());
        assert!(timer.tick(back + Duration::milliseconds(100)).unwrap().is_none());
        assert_eq!(timer.state(), TimerState::Completed);
    }

    #[test]
    fn test_resume_from_prior_end_time() {
        let storage = Storage::in_memory();
        let prior = ActiveTimerSnapshot {
            block_id: Some("block-4".to_string()),
            end_time: t0() + Duration::seconds(250),
            description: "halfway".to_string(),
            paused_remaining: None,
        };

        let timer = ActiveTimer::start(
            storage,
            "block-4",
            600,
            Some(prior),
            Duration::seconds(10),
            t0(),
        )
        .unwrap();

        assert_eq!(timer.remaining_secs(), 250);
        assert_eq!(timer.description(), "halfway");
        assert_eq!(timer.end_time(), t0() + Duration::seconds(250));
    }

    #[test]
    fn test_overdue_prior_completes_on_first_tick() {
        let storage = Storage::in_memory();
        let prior = ActiveTimerSnapshot {
            block_id: None,
            end_time: t0() - Duration::minutes(30),
            description: "notes".to_string(),
            paused_remaining: None,
        };
        let mut timer = ActiveTimer::start(
            storage,
            "block-1",
            600,
            Some(prior),
            Duration::seconds(10),
            t0(),
        )
        .unwrap();

        let done = timer.tick(t0()).unwrap().unwrap();
        assert_eq!(done.description, "notes");
    }

    #[test]
    fn test_periodic_persistence_cadence() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);
        timer.description = "in flight".to_string();

        timer.tick(t0() + Duration::seconds(9)).unwrap();
        assert_eq!(storage.load_active_timer().unwrap().unwrap().description, "");

        timer.tick(t0() + Duration::seconds(10)).unwrap();
        assert_eq!(
            storage.load_active_timer().unwrap().unwrap().description,
            "in flight"
        );
    }

    #[test]
    fn test_description_is_truncated_and_saved() {
        let storage = Storage::in_memory();
        let mut timer = start_fresh(&storage, 600);

        timer.set_description(&"x".repeat(800)).unwrap();
        let saved = storage.load_active_timer().unwrap().unwrap();
        assert_eq!(saved.description.len(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_teardown() {
        let storage = Storage::in_memory();
        let timer = start_fresh(&storage, 600);
        storage.clear_active_timer().unwrap();
        timer.teardown().unwrap();
        assert!(storage.load_active_timer().unwrap().is_some());

        let mut finished = start_fresh(&storage, 1);
        finished.tick(t0() + Duration::seconds(1)).unwrap().unwrap();
        // simulate a stale write landing after completion
        storage.save_active_timer(&finished.snapshot()).unwrap();
        finished.teardown().unwrap();
        assert!(storage.load_active_timer().unwrap().is_none());
    }
}
