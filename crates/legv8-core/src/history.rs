//! Undo/redo log of full machine snapshots.

use std::collections::VecDeque;

use crate::alu::Flags;
use crate::registers::GENERAL_REGISTER_COUNT;
use crate::Fault;

/// Default number of retained snapshots.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Immutable snapshot taken at a micro-step boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExecutionState {
    /// Program counter.
    pub pc: u64,
    /// Condition flags.
    pub flags: Flags,
    /// Disassembly of the last retired instruction.
    pub last_instruction: Option<String>,
    /// Program ran past its last instruction.
    pub finished: bool,
    /// Micro-steps of the current instruction already applied.
    pub micro_step_index: usize,
    /// All register values, `X31` included.
    pub registers: [i64; GENERAL_REGISTER_COUNT],
    /// Non-zero 8-byte-aligned doublewords.
    pub memory: Vec<(u64, i64)>,
    /// Free-text description of the step that produced this state.
    pub description: String,
}

/// Snapshot log with a cursor; recording after stepping back drops the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHistory {
    states: VecDeque<ExecutionState>,
    cursor: Option<usize>,
    capacity: usize,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    /// Creates an empty log holding at most `capacity` states (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            states: VecDeque::new(),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    /// Appends `state` after the cursor, discarding anything beyond it.
    pub fn record(&mut self, state: ExecutionState) {
        match self.cursor {
            Some(cursor) => self.states.truncate(cursor + 1),
            None => self.states.clear(),
        }
        self.states.push_back(state);
        if self.states.len() > self.capacity {
            self.states.pop_front();
        }
        self.cursor = Some(self.states.len() - 1);
    }

    /// Moves the cursor one state back.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::NoHistory`] at the oldest state.
    pub fn step_back(&mut self) -> Result<&ExecutionState, Fault> {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                Ok(&self.states[cursor - 1])
            }
            _ => Err(Fault::NoHistory),
        }
    }

    /// Moves the cursor one state forward.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::NoHistory`] at the newest state.
    pub fn step_forward(&mut self) -> Result<&ExecutionState, Fault> {
        match self.cursor {
            Some(cursor) if cursor + 1 < self.states.len() => {
                self.cursor = Some(cursor + 1);
                Ok(&self.states[cursor + 1])
            }
            _ => Err(Fault::NoHistory),
        }
    }

    /// State at the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&ExecutionState> {
        self.cursor.and_then(|cursor| self.states.get(cursor))
    }

    /// Drops every state.
    pub fn clear(&mut self) {
        self.states.clear();
        self.cursor = None;
    }

    /// Number of retained states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Cursor position, `None` before the first record.
    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Maximum number of retained states.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if [`Self::step_back`] would succeed.
    #[must_use]
    pub const fn can_step_back(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor > 0)
    }

    /// Returns true if [`Self::step_forward`] would succeed.
    #[must_use]
    pub fn can_step_forward(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor + 1 < self.states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionHistory, ExecutionState};
    use crate::alu::Flags;
    use crate::Fault;

    fn state(pc: u64) -> ExecutionState {
        ExecutionState {
            pc,
            flags: Flags::CLEAR,
            last_instruction: None,
            finished: false,
            micro_step_index: 0,
            registers: [0; 32],
            memory: Vec::new(),
            description: format!("state at {pc}"),
        }
    }

    #[test]
    fn empty_history_has_nowhere_to_go() {
        let mut history = ExecutionHistory::default();
        assert!(history.is_empty());
        assert_eq!(history.cursor(), None);
        assert_eq!(history.step_back().map(|s| s.pc), Err(Fault::NoHistory));
        assert_eq!(history.step_forward().map(|s| s.pc), Err(Fault::NoHistory));
        assert!(history.current().is_none());
    }

    #[test]
    fn recording_after_step_back_truncates_future() {
        let mut history = ExecutionHistory::default();
        history.record(state(1));
        history.record(state(2));
        assert_eq!(history.step_back().map(|s| s.pc), Ok(1));
        assert!(history.can_step_forward());
        history.record(state(3));
        assert_eq!(history.len(), 2);
        assert!(!history.can_step_forward());
        assert_eq!(history.step_back().map(|s| s.pc), Ok(1));
        assert_eq!(history.step_forward().map(|s| s.pc), Ok(3));
    }

    #[test]
    fn eviction_drops_oldest_and_keeps_cursor_at_tail() {
        let mut history = ExecutionHistory::new(3);
        for pc in 0..5 {
            history.record(state(pc));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), Some(2));
        assert_eq!(history.current().map(|s| s.pc), Some(4));
        assert_eq!(history.step_back().map(|s| s.pc), Ok(3));
        assert_eq!(history.step_back().map(|s| s.pc), Ok(2));
        assert!(!history.can_step_back());
    }

    #[test]
    fn clear_resets_cursor() {
        let mut history = ExecutionHistory::new(0);
        assert_eq!(history.capacity(), 1);
        history.record(state(7));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.cursor(), None);
    }
}
