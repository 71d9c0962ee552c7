//! Session-wide debugger state shared by every processor's hooks.

use std::collections::VecDeque;
use std::time::Instant;

use crate::symbols::{SymbolTable, SCRATCH_VARIABLE_COUNT};

/// Whether emulation is allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecutionState {
    /// Processors execute freely.
    #[default]
    Running,
    /// The active instruction hook is blocked in the wait loop.
    Stopped,
}

impl ExecutionState {
    /// Returns `true` when stopped.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// One per session: run/stop state, processor roles, scratch variables, global symbols.
#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct GlobalDebugState {
    pub(crate) execution: ExecutionState,
    pub(crate) live_cpu: Option<usize>,
    pub(crate) visible_cpu: Option<usize>,
    pub(crate) break_cpu: Option<usize>,
    pub(crate) within_instruction_hook: bool,
    pub(crate) debugger_access: bool,
    pub(crate) memory_modified: bool,
    pub(crate) vblank_occurred: bool,
    pub(crate) wp_address: u64,
    pub(crate) wp_data: u64,
    pub(crate) scratch: [u64; SCRATCH_VARIABLE_COUNT],
    pub(crate) symbols: SymbolTable,
    pub(crate) last_periodic_update: Option<Instant>,
    pub(crate) next_breakpoint_index: u32,
    pub(crate) next_watchpoint_index: u32,
    pub(crate) script: VecDeque<String>,
}

impl Default for GlobalDebugState {
    fn default() -> Self {
        Self {
            execution: ExecutionState::Running,
            live_cpu: None,
            visible_cpu: None,
            break_cpu: None,
            within_instruction_hook: false,
            debugger_access: false,
            memory_modified: false,
            vblank_occurred: false,
            wp_address: 0,
            wp_data: 0,
            scratch: [0; SCRATCH_VARIABLE_COUNT],
            symbols: SymbolTable::global(),
            last_periodic_update: None,
            next_breakpoint_index: 1,
            next_watchpoint_index: 1,
            script: VecDeque::new(),
        }
    }
}

impl GlobalDebugState {
    /// Current run/stop state.
    #[must_use]
    pub const fn execution(&self) -> ExecutionState {
        self.execution
    }

    /// Processor currently inside its timeslice.
    #[must_use]
    pub const fn live_cpu(&self) -> Option<usize> {
        self.live_cpu
    }

    /// Processor the user interface follows.
    #[must_use]
    pub const fn visible_cpu(&self) -> Option<usize> {
        self.visible_cpu
    }

    /// Processor with a deferred break request.
    #[must_use]
    pub const fn break_cpu(&self) -> Option<usize> {
        self.break_cpu
    }

    /// Byte address of the last watchpoint hit.
    #[must_use]
    pub const fn watchpoint_address(&self) -> u64 {
        self.wp_address
    }

    /// Data of the last write watchpoint hit.
    #[must_use]
    pub const fn watchpoint_data(&self) -> u64 {
        self.wp_data
    }

    /// Scratch variable `index`.
    #[must_use]
    pub fn scratch(&self, index: usize) -> Option<u64> {
        self.scratch.get(index).copied()
    }

    /// Global symbol table.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Whether a debugger write has touched memory since the wait loop last cleared it.
    #[must_use]
    pub const fn memory_modified(&self) -> bool {
        self.memory_modified
    }

    pub(crate) const fn allocate_breakpoint_index(&mut self) -> u32 {
        let index = self.next_breakpoint_index;
        self.next_breakpoint_index += 1;
        index
    }

    pub(crate) const fn allocate_watchpoint_index(&mut self) -> u32 {
        let index = self.next_watchpoint_index;
        self.next_watchpoint_index += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionState, GlobalDebugState};

    #[test]
    fn execution_state_default_is_running() {
        assert_eq!(ExecutionState::default(), ExecutionState::Running);
        assert!(ExecutionState::Stopped.is_stopped());
    }

    #[test]
    fn point_indices_are_monotonic_and_independent() {
        let mut state = GlobalDebugState::default();
        assert_eq!(state.allocate_breakpoint_index(), 1);
        assert_eq!(state.allocate_breakpoint_index(), 2);
        assert_eq!(state.allocate_watchpoint_index(), 1);
        assert_eq!(state.allocate_breakpoint_index(), 3);
    }

    #[test]
    fn scratch_bank_is_bounded() {
        let state = GlobalDebugState::default();
        assert_eq!(state.scratch(9), Some(0));
        assert_eq!(state.scratch(10), None);
        assert!(state.symbols().get("temp3").is_some());
    }
}
