//! Game clock: owns tick count and pause state.
//!
//! Checkpoints are only taken while paused, between ticks.

use crate::types::Tick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameClock {
    pub current_tick: Tick,
    pub paused:       bool,
    /// Number of times the loop has been paused.
    pub pauses:       u64,
}

impl GameClock {
    pub fn new() -> Self {
        Self {
            current_tick: 0,
            paused:       true,
            pauses:       0,
        }
    }

    /// Advance one tick. Returns the new tick number.
    /// Panics if called while paused; callers must check.
    pub fn advance(&mut self) -> Tick {
        assert!(!self.paused, "advance() called on paused clock");
        self.current_tick += 1;
        self.current_tick
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.pauses += 1;
        }
    }

    pub fn resume(&mut self) { self.paused = false; }

    /// Move the clock back after a rewind restored an earlier tick.
    pub fn rewind_to(&mut self, tick: Tick) {
        self.current_tick = tick;
        self.paused = true;
    }
}

impl Default for GameClock {
    fn default() -> Self { Self::new() }
}
