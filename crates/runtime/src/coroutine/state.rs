//! Coroutine scheduling state
//!
//! The wire encoding is a bit-set: WAIT=0, BUSY=1, DEAD=2, ERROR=4. WAIT and
//! BUSY are the two runnable states and exclude each other; DEAD and ERROR are
//! terminal flags that may sit on top of either. Here the runnable part is an
//! enum, so WAIT+BUSY cannot be expressed at all.

use crate::error::{Result, RuntimeError};

pub const STATE_WAIT: u8 = 0;
pub const STATE_BUSY: u8 = 1;
pub const STATE_DEAD: u8 = 2;
pub const STATE_ERROR: u8 = 4;

/// Whether the scheduler may pick the coroutine up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Parked until something external moves it back to `Busy`
    Wait,
    /// Resumed on every scheduler sweep
    Busy,
}

/// Full scheduling state of a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineState {
    run: RunState,
    dead: bool,
    error: bool,
}

impl CoroutineState {
    pub const WAIT: CoroutineState = CoroutineState {
        run: RunState::Wait,
        dead: false,
        error: false,
    };

    pub const BUSY: CoroutineState = CoroutineState {
        run: RunState::Busy,
        dead: false,
        error: false,
    };

    /// Same runnable bit, with DEAD set
    pub const fn with_dead(self) -> Self {
        Self { dead: true, ..self }
    }

    /// Same runnable bit, with ERROR set
    pub const fn with_error(self) -> Self {
        Self {
            error: true,
            ..self
        }
    }

    pub const fn run_state(self) -> RunState {
        self.run
    }

    pub const fn is_dead(self) -> bool {
        self.dead
    }

    pub const fn is_error(self) -> bool {
        self.error
    }

    /// DEAD or ERROR: never resumed again
    pub const fn is_terminal(self) -> bool {
        self.dead || self.error
    }

    /// BUSY and not terminal
    pub const fn is_runnable(self) -> bool {
        matches!(self.run, RunState::Busy) && !self.is_terminal()
    }

    /// Bit-set encoding
    pub const fn bits(self) -> u8 {
        let mut bits = match self.run {
            RunState::Wait => STATE_WAIT,
            RunState::Busy => STATE_BUSY,
        };
        if self.dead {
            bits |= STATE_DEAD;
        }
        if self.error {
            bits |= STATE_ERROR;
        }
        bits
    }

    /// Decode the bit-set encoding
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !(STATE_BUSY | STATE_DEAD | STATE_ERROR) != 0 {
            return Err(RuntimeError::InvalidState(bits));
        }
        Ok(Self {
            run: if bits & STATE_BUSY != 0 {
                RunState::Busy
            } else {
                RunState::Wait
            },
            dead: bits & STATE_DEAD != 0,
            error: bits & STATE_ERROR != 0,
        })
    }
}

impl Default for CoroutineState {
    fn default() -> Self {
        Self::WAIT
    }
}

impl std::fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let run = match self.run {
            RunState::Wait => "WAIT",
            RunState::Busy => "BUSY",
        };
        write!(f, "{}", run)?;
        if self.dead {
            write!(f, "|DEAD")?;
        }
        if self.error {
            write!(f, "|ERROR")?;
        }
        Ok(())
    }
}
