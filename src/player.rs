//! Preview playback over the final cycles.
//!
//! The player only holds a `(cycle, frame)` cursor and a state flag; the
//! cycles are passed in on every call, so it never outlives or locks the
//! document it reads.

use log::debug;

use crate::frame::CycleEntry;

/// How playback proceeds at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Play the current cycle once, then stop on its first frame.
    CurrentCycleOnce,
    /// Repeat the current cycle.
    #[default]
    CurrentCycleLooped,
    /// Play every cycle in turn, then stop on the first cycle.
    AllCyclesOnce,
    /// Play every cycle in turn, forever.
    AllCyclesLooped,
}

/// Only a playing player advances; paused and stopped players keep their
/// cursor until moved explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Outcome of one [`Player::advance`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved,
    /// A one-shot mode reached its end; the player is now stopped.
    Stopped,
    /// No cycle has frames to move to.
    Stuck,
    /// The player is paused or stopped; the cursor did not move.
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct Player {
    mode: PlaybackMode,
    state: PlaybackState,
    cycle: usize,
    frame: usize,
}

impl Player {
    pub fn new(mode: PlaybackMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Cursor as `(cycle, position within cycle)`.
    pub fn position(&self) -> (usize, usize) {
        (self.cycle, self.frame)
    }

    pub fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Stop and rewind to the first frame of the current cycle.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.frame = 0;
    }

    /// Select a cycle and rewind to its first frame. Out-of-range indices are clamped.
    pub fn set_cycle(&mut self, index: usize, cycles: &[CycleEntry]) {
        self.cycle = index.min(cycles.len().saturating_sub(1));
        self.frame = 0;
    }

    /// Move within the current cycle, clamped to its length.
    pub fn set_frame(&mut self, position: usize, cycles: &[CycleEntry]) {
        let len = cycles.get(self.cycle).map_or(0, CycleEntry::len);
        self.frame = position.min(len.saturating_sub(1));
    }

    /// The frame index the cursor points at, if the cycle has one there.
    pub fn current_frame(&self, cycles: &[CycleEntry]) -> Option<usize> {
        cycles.get(self.cycle)?.frames.get(self.frame).copied()
    }

    /// Step the cursor once according to the playback mode.
    ///
    /// Does nothing unless playing. Empty cycles are skipped in the
    /// all-cycles modes, trying each cycle at most once before giving up
    /// with [`Advance::Stuck`].
    pub fn advance(&mut self, cycles: &[CycleEntry]) -> Advance {
        if self.state != PlaybackState::Playing {
            return Advance::Idle;
        }
        if cycles.is_empty() {
            self.state = PlaybackState::Stopped;
            return Advance::Stuck;
        }
        if self.cycle >= cycles.len() {
            self.cycle = 0;
            self.frame = 0;
        }

        let len = cycles[self.cycle].len();
        if self.frame + 1 < len {
            self.frame += 1;
            return Advance::Moved;
        }

        match self.mode {
            PlaybackMode::CurrentCycleOnce => {
                self.frame = 0;
                self.state = PlaybackState::Stopped;
                Advance::Stopped
            }
            PlaybackMode::CurrentCycleLooped if len == 0 => {
                self.state = PlaybackState::Stopped;
                Advance::Stuck
            }
            PlaybackMode::CurrentCycleLooped => {
                self.frame = 0;
                Advance::Moved
            }
            PlaybackMode::AllCyclesOnce | PlaybackMode::AllCyclesLooped => self.next_cycle(cycles),
        }
    }

    fn next_cycle(&mut self, cycles: &[CycleEntry]) -> Advance {
        let once = self.mode == PlaybackMode::AllCyclesOnce;
        let mut next = self.cycle;
        for _ in 0..cycles.len() {
            next += 1;
            if next >= cycles.len() {
                next = 0;
                if once {
                    debug!("playback finished after cycle {}", self.cycle);
                    self.cycle = 0;
                    self.frame = 0;
                    self.state = PlaybackState::Stopped;
                    return Advance::Stopped;
                }
            }
            if !cycles[next].is_empty() {
                self.cycle = next;
                self.frame = 0;
                return Advance::Moved;
            }
        }
        debug!("no cycle has frames, playback stuck");
        self.frame = 0;
        self.state = PlaybackState::Stopped;
        Advance::Stuck
    }
}
