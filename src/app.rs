use crate::board::{Board, CompletedPatch};
use crate::clock::{Clock, SystemClock};
use crate::notify::Focus;
use crate::recovery::Recovered;
use crate::storage::Storage;
use crate::timer::{ActiveTimer, Completion};
use anyhow::Result;
use chrono::Duration;
use tracing::{debug, warn};

/// Runs the board and the active timer together. The timer's completion
/// event is the only thing that flows from one into the other.
pub struct App<C: Clock = SystemClock> {
    board: Board,
    timer: Option<ActiveTimer>,
    storage: Storage,
    clock: C,
    persist_interval: Duration,
    focus: Focus,
}

impl<C: Clock> App<C> {
    pub fn new(
        recovered: Recovered,
        storage: Storage,
        clock: C,
        persist_interval: Duration,
        focus: Focus,
    ) -> Self {
        Self {
            board: recovered.board,
            timer: recovered.timer,
            storage,
            clock,
            persist_interval,
            focus,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn timer(&self) -> Option<&ActiveTimer> {
        self.timer.as_ref()
    }

    /// Moves a waiting block into progress and starts its countdown.
    pub fn start_block(&mut self, id: &str) -> Result<bool> {
        if !self.board.move_to_in_progress(id)? {
            return Ok(false);
        }
        let Some(block) = self.board.active_block() else {
            return Ok(false);
        };

        let timer = ActiveTimer::start(
            self.storage.clone(),
            block.id.clone(),
            block.remaining_time,
            None,
            self.persist_interval,
            self.clock.now(),
        )?;
        self.timer = Some(timer);
        Ok(true)
    }

    /// Returns the id of a block that completed during this tick.
    pub fn tick(&mut self) -> Result<Option<String>> {
        let now = self.clock.now();
        let done = match self.timer.as_mut() {
            Some(timer) => timer.tick(now)?,
            None => None,
        };
        self.finish(done)
    }

    pub fn set_visible(&mut self, visible: bool) -> Result<Option<String>> {
        self.focus.set(visible);
        if !visible {
            return Ok(None);
        }
        let now = self.clock.now();
        let done = self.timer.as_mut().and_then(|t| t.on_visible(now));
        self.finish(done)
    }

    pub fn toggle_pause(&mut self) -> Result<Option<String>> {
        let now = self.clock.now();
        let done = match self.timer.as_mut() {
            Some(timer) => timer.toggle(now)?,
            None => None,
        };
        self.finish(done)
    }

    pub fn set_description(&mut self, text: &str) -> Result<()> {
        match self.timer.as_mut() {
            Some(timer) => timer.set_description(text),
            None => Ok(()),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        // reset wipes the timer record itself; nothing to tear down
        self.timer = None;
        self.board.reset()
    }

    pub fn reset_with(&mut self, hours: u32, block_secs: u64) -> Result<()> {
        self.board.reset_with(hours, block_secs)?;
        self.timer = None;
        Ok(())
    }

    /// Sets the description of the running block, or of a completed one.
    pub fn describe(&mut self, id: &str, text: &str) -> Result<bool> {
        if let Some(timer) = self.timer.as_mut().filter(|t| t.block_id() == id) {
            timer.set_description(text)?;
            return Ok(true);
        }
        let patch = CompletedPatch {
            description: Some(text.to_string()),
            ..CompletedPatch::default()
        };
        self.board.update_completed_block(id, patch)
    }

    /// Persists an unfinished countdown so the next start can resume it.
    pub fn shutdown(self) -> Result<()> {
        match self.timer {
            Some(timer) => timer.teardown(),
            None => Ok(()),
        }
    }

    fn finish(&mut self, done: Option<Completion>) -> Result<Option<String>> {
        let Some(done) = done else {
            return Ok(None);
        };

        // The board must hold the completion before the timer record goes
        // away; if saving fails the record lets the next start finish it.
        let applied = self.board.complete_block(&done.block_id, &done.description)?;

        if let Some(timer) = self.timer.take() {
            if let Err(e) = timer.teardown() {
                warn!("Failed to tear down finished timer: {:#}", e);
            }
        }

        if applied {
            Ok(Some(done.block_id))
        } else {
            debug!("Completion for {} had no effect", done.block_id);
            Ok(None)
        }
    }
}
