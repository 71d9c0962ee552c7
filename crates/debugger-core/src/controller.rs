//! Per-processor debug state: breakpoints, watchpoints, stepping, history, and tracing.
//!
//! A [`DebugController`] is pure bookkeeping. Everything that needs the live machine
//! (evaluating guards, disassembling, blocking for the user) is driven by the
//! [`DebugSession`](crate::session::DebugSession) that owns it.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::api::DebugDevice;
use crate::comments::CommentStore;
use crate::hotspot::HotspotTracker;
use crate::memory::{AddressSpaceInfo, SpaceRef, DATA_SPACE, IO_SPACE, PROGRAM_SPACE};
use crate::points::{Breakpoint, WatchKind, Watchpoint};
use crate::symbols::{SymbolBinding, SymbolTable};
use crate::trace::Tracer;

/// Entries in the PC history ring.
pub const HISTORY_SIZE: usize = 256;

/// Externally installed per-instruction callback; returning `true` requests a stop.
pub type InstructionHook = Box<dyn FnMut(u64) -> bool>;

/// Stepping mode; at most one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepMode {
    /// Not stepping.
    #[default]
    None,
    /// Stop after N instructions.
    Single,
    /// Like single, but calls count as one instruction.
    Over,
    /// Run until the current subroutine returns.
    Out,
}

/// Pending stop conditions armed by `go`-style commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopConditions {
    /// Temporary run-to address.
    pub address: Option<u64>,
    /// Stop when this processor's timeslice ends.
    pub context_switch: bool,
    /// Stop on an interrupt; the inner value narrows it to one line.
    pub interrupt: Option<Option<i32>>,
    /// Stop on this exception number.
    pub exception: Option<i32>,
    /// Stop at the next vertical blank.
    pub vblank: bool,
    /// Stop once machine time reaches this value.
    pub time: Option<Duration>,
}

const SPACE_LOG_SYMBOLS: [(usize, &str); 3] = [
    (PROGRAM_SPACE, "logunmap"),
    (DATA_SPACE, "logunmapd"),
    (IO_SPACE, "logunmapi"),
];

/// Debug state owned per processor.
#[allow(clippy::struct_excessive_bools)]
pub struct DebugController {
    index: usize,
    tag: String,
    name: String,
    has_execution: bool,
    has_disassembly: bool,
    min_opcode_bytes: u32,
    max_opcode_bytes: u32,
    spaces: Vec<Option<AddressSpaceInfo>>,
    pub(crate) observing: bool,
    pub(crate) track_history: bool,
    pub(crate) step_mode: StepMode,
    pub(crate) steps_left: u32,
    pub(crate) step_address: Option<u64>,
    pub(crate) stop: StopConditions,
    pub(crate) end_exec_time: Duration,
    breakpoints: VecDeque<Breakpoint>,
    watchpoints: Vec<VecDeque<Watchpoint>>,
    history: [u64; HISTORY_SIZE],
    history_count: usize,
    pub(crate) tracer: Option<Tracer>,
    pub(crate) hotspots: Option<HotspotTracker>,
    pub(crate) instruction_hook: Option<InstructionHook>,
    symbols: SymbolTable,
    pub(crate) comments: CommentStore,
    call_hook: bool,
}

impl fmt::Debug for DebugController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugController")
            .field("index", &self.index)
            .field("tag", &self.tag)
            .field("observing", &self.observing)
            .field("step_mode", &self.step_mode)
            .field("steps_left", &self.steps_left)
            .field("stop", &self.stop)
            .field("breakpoints", &self.breakpoints)
            .field("tracer", &self.tracer)
            .field("hooked", &self.instruction_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl DebugController {
    /// Queries `device`'s capabilities and builds its symbol table.
    pub fn new(index: usize, device: &mut dyn DebugDevice) -> Self {
        let tag = device.tag().to_string();
        let name = device.name().to_string();
        let has_execution = device.execution().is_some();

        let spaces: Vec<Option<AddressSpaceInfo>> = device.memory().map_or_else(Vec::new, |memory| {
            (0..memory.space_count())
                .map(|space| memory.space_config(space).map(AddressSpaceInfo::new))
                .collect()
        });

        let (has_disassembly, min_opcode_bytes, max_opcode_bytes) = device
            .disassembly()
            .map_or((false, 1, 1), |dasm| {
                (true, dasm.min_opcode_bytes().max(1), dasm.max_opcode_bytes().max(1))
            });

        let mut symbols = SymbolTable::new();
        if let Some(state) = device.state() {
            for entry in state.state_entries() {
                symbols.add(
                    &entry.symbol,
                    SymbolBinding::Register {
                        device: index,
                        index: entry.index,
                        writable: entry.writable,
                    },
                );
            }
        }
        if has_execution {
            if symbols.get("pc").is_none() {
                symbols.add("pc", SymbolBinding::ProgramCounter { device: index });
            }
            symbols.add("curpc", SymbolBinding::ProgramCounter { device: index });
            symbols.add("cycles", SymbolBinding::CyclesRemaining { device: index });
        }
        for (space, symbol) in SPACE_LOG_SYMBOLS {
            if matches!(spaces.get(space), Some(Some(_))) {
                symbols.add(symbol, SymbolBinding::LogUnmapped(SpaceRef::new(index, space)));
            }
        }

        let watchpoints = spaces.iter().map(|_| VecDeque::new()).collect();
        Self {
            index,
            tag,
            name,
            has_execution,
            has_disassembly,
            min_opcode_bytes,
            max_opcode_bytes,
            spaces,
            observing: true,
            track_history: true,
            step_mode: StepMode::None,
            steps_left: 0,
            step_address: None,
            stop: StopConditions::default(),
            end_exec_time: Duration::ZERO,
            breakpoints: VecDeque::new(),
            watchpoints,
            history: [0; HISTORY_SIZE],
            history_count: 0,
            tracer: None,
            hotspots: None,
            instruction_hook: None,
            symbols,
            comments: CommentStore::new(),
            call_hook: false,
        }
    }

    /// Device index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Device tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Device type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the device executes code.
    #[must_use]
    pub const fn has_execution(&self) -> bool {
        self.has_execution
    }

    /// Whether the device can disassemble.
    #[must_use]
    pub const fn has_disassembly(&self) -> bool {
        self.has_disassembly
    }

    /// Shortest instruction in bytes.
    #[must_use]
    pub const fn min_opcode_bytes(&self) -> u32 {
        self.min_opcode_bytes
    }

    /// Longest instruction in bytes.
    #[must_use]
    pub const fn max_opcode_bytes(&self) -> u32 {
        self.max_opcode_bytes
    }

    /// Geometry of space `space`.
    #[must_use]
    pub fn space(&self, space: usize) -> Option<&AddressSpaceInfo> {
        self.spaces.get(space).and_then(Option::as_ref)
    }

    /// Present spaces with their indices.
    pub fn spaces(&self) -> impl Iterator<Item = (usize, &AddressSpaceInfo)> + '_ {
        self.spaces
            .iter()
            .enumerate()
            .filter_map(|(index, info)| info.as_ref().map(|info| (index, info)))
    }

    /// Hex digits of a program-space logical address.
    #[must_use]
    pub fn logical_address_chars(&self) -> usize {
        self.space(PROGRAM_SPACE)
            .map_or(8, AddressSpaceInfo::logical_address_chars)
    }

    /// Processor symbol table.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Whether the debugger observes this processor.
    #[must_use]
    pub const fn is_observing(&self) -> bool {
        self.observing
    }

    /// Active stepping mode.
    #[must_use]
    pub const fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    /// Instructions left before a step completes.
    #[must_use]
    pub const fn steps_left(&self) -> u32 {
        self.steps_left
    }

    /// Armed stop conditions.
    #[must_use]
    pub const fn stop_conditions(&self) -> &StopConditions {
        &self.stop
    }

    /// Active tracer.
    #[must_use]
    pub const fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Hotspot table when tracking is enabled.
    #[must_use]
    pub const fn hotspots(&self) -> Option<&HotspotTracker> {
        self.hotspots.as_ref()
    }

    /// Comment store.
    #[must_use]
    pub const fn comments(&self) -> &CommentStore {
        &self.comments
    }

    /// Whether the scheduler must call the instruction hook.
    #[must_use]
    pub const fn call_hook(&self) -> bool {
        self.call_hook
    }

    /// Breakpoints, most recently added first.
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> + '_ {
        self.breakpoints.iter()
    }

    /// Watchpoints of `space`, most recently added first.
    pub fn watchpoints(&self, space: usize) -> impl Iterator<Item = &Watchpoint> + '_ {
        self.watchpoints.get(space).into_iter().flatten()
    }

    pub(crate) fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.push_front(breakpoint);
    }

    pub(crate) fn remove_breakpoint(&mut self, index: u32) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.index() != index);
        self.breakpoints.len() != before
    }

    pub(crate) fn enable_breakpoint(&mut self, index: u32, enable: bool) -> bool {
        let Some(bp) = self.breakpoints.iter_mut().find(|bp| bp.index() == index) else {
            return false;
        };
        bp.set_enabled(enable);
        true
    }

    pub(crate) fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub(crate) fn enable_all_breakpoints(&mut self, enable: bool) {
        self.breakpoints.iter_mut().for_each(|bp| bp.set_enabled(enable));
    }

    pub(crate) fn add_watchpoint(&mut self, watchpoint: Watchpoint) {
        if let Some(list) = self.watchpoints.get_mut(watchpoint.space().space) {
            list.push_front(watchpoint);
        }
    }

    /// Removes watchpoint `index`, returning the space it lived in.
    pub(crate) fn remove_watchpoint(&mut self, index: u32) -> Option<usize> {
        self.watchpoints.iter_mut().enumerate().find_map(|(space, list)| {
            let position = list.iter().position(|wp| wp.index() == index)?;
            list.remove(position);
            Some(space)
        })
    }

    /// Enables or disables watchpoint `index`, returning the space it lives in.
    pub(crate) fn enable_watchpoint(&mut self, index: u32, enable: bool) -> Option<usize> {
        self.watchpoints.iter_mut().enumerate().find_map(|(space, list)| {
            let wp = list.iter_mut().find(|wp| wp.index() == index)?;
            wp.set_enabled(enable);
            Some(space)
        })
    }

    pub(crate) fn clear_watchpoints(&mut self) {
        self.watchpoints.iter_mut().for_each(VecDeque::clear);
    }

    pub(crate) fn enable_all_watchpoints(&mut self, enable: bool) {
        self.watchpoints
            .iter_mut()
            .flatten()
            .for_each(|wp| wp.set_enabled(enable));
    }

    /// (read, write) watch enables implied by the enabled watchpoints of `space`.
    #[must_use]
    pub fn watch_enables(&self, space: usize) -> (bool, bool) {
        let mut enables = (false, false);
        for wp in self.watchpoints(space).filter(|wp| wp.is_enabled()) {
            match wp.kind() {
                WatchKind::Read => enables.0 = true,
                WatchKind::Write => enables.1 = true,
                WatchKind::ReadWrite => enables = (true, true),
            }
        }
        if self.hotspots.is_some() {
            enables.0 = true;
        }
        enables
    }

    fn has_live_breakpoints(&self) -> bool {
        self.breakpoints.iter().any(Breakpoint::is_enabled)
    }

    pub(crate) const fn push_history(&mut self, pc: u64) {
        self.history[self.history_count % HISTORY_SIZE] = pc;
        self.history_count += 1;
    }

    /// PC executed `back` instructions ago; 0 is the most recent.
    #[must_use]
    pub const fn pc_history(&self, back: usize) -> Option<u64> {
        if back >= HISTORY_SIZE || back >= self.history_count {
            return None;
        }
        Some(self.history[(self.history_count - 1 - back) % HISTORY_SIZE])
    }

    /// Clears stepping and every transient stop condition.
    pub(crate) fn reset_transient_flags(&mut self) {
        self.step_mode = StepMode::None;
        self.steps_left = 0;
        self.step_address = None;
        self.stop = StopConditions::default();
    }

    /// Recomputes whether the instruction hook must run.
    pub(crate) fn compute_call_hook(&mut self, stopped: bool, event_pending: bool) {
        self.call_hook = false;
        if !self.observing || event_pending {
            return;
        }
        let per_instruction = self.track_history
            || self.instruction_hook.is_some()
            || self.step_mode != StepMode::None
            || self.stop.address.is_some()
            || self.has_live_breakpoints();
        let time_in_slice = self
            .stop
            .time
            .is_some_and(|stop_time| self.end_exec_time >= stop_time);
        self.call_hook = stopped || per_instruction || self.tracer.is_some() || time_in_slice;
    }
}

#[cfg(test)]
mod tests {
    use super::{DebugController, StepMode, HISTORY_SIZE};
    use crate::memory::SpaceRef;
    use crate::points::{Breakpoint, WatchKind, Watchpoint};
    use crate::symbols::SymbolBinding;
    use crate::testing::ToyCpu;

    fn controller() -> DebugController {
        let mut cpu = ToyCpu::new("maincpu");
        DebugController::new(0, &mut cpu)
    }

    #[test]
    fn queries_capabilities_and_publishes_symbols() {
        let ctrl = controller();
        assert!(ctrl.has_execution());
        assert!(ctrl.has_disassembly());
        assert_eq!(ctrl.min_opcode_bytes(), 2);
        assert_eq!(ctrl.symbols().get("curpc"), Some(SymbolBinding::ProgramCounter { device: 0 }));
        assert_eq!(
            ctrl.symbols().get("logunmap"),
            Some(SymbolBinding::LogUnmapped(SpaceRef::program(0)))
        );
        assert!(matches!(ctrl.symbols().get("r0"), Some(SymbolBinding::Register { .. })));
        assert_eq!(ctrl.logical_address_chars(), 4);
    }

    #[test]
    fn breakpoints_enumerate_newest_first() {
        let mut ctrl = controller();
        for index in 1..=3 {
            ctrl.add_breakpoint(Breakpoint::new(index, u64::from(index) * 0x10, None, None));
        }
        assert!(ctrl.remove_breakpoint(2));
        assert!(!ctrl.remove_breakpoint(2));
        let order: Vec<u32> = ctrl.breakpoints().map(Breakpoint::index).collect();
        assert_eq!(order, vec![3, 1]);
        assert!(ctrl.enable_breakpoint(1, false));
        assert!(!ctrl.enable_breakpoint(9, false));
        assert_eq!(ctrl.breakpoints().count(), 2);
    }

    #[test]
    fn watch_enables_track_enabled_kinds() {
        let mut ctrl = controller();
        let space = SpaceRef::program(0);
        ctrl.add_watchpoint(Watchpoint::new(1, space, WatchKind::Write, 0, 4, None, None));
        assert_eq!(ctrl.watch_enables(0), (false, true));
        ctrl.add_watchpoint(Watchpoint::new(2, space, WatchKind::Read, 0, 4, None, None));
        assert_eq!(ctrl.watch_enables(0), (true, true));
        assert_eq!(ctrl.enable_watchpoint(2, false), Some(0));
        assert_eq!(ctrl.watch_enables(0), (false, true));
        assert_eq!(ctrl.remove_watchpoint(1), Some(0));
        assert_eq!(ctrl.watch_enables(0), (false, false));
        assert_eq!(ctrl.remove_watchpoint(1), None);
    }

    #[test]
    fn history_ring_wraps() {
        let mut ctrl = controller();
        assert_eq!(ctrl.pc_history(0), None);
        for pc in 0..(HISTORY_SIZE as u64 + 10) {
            ctrl.push_history(pc);
        }
        assert_eq!(ctrl.pc_history(0), Some(HISTORY_SIZE as u64 + 9));
        assert_eq!(ctrl.pc_history(HISTORY_SIZE - 1), Some(10));
        assert_eq!(ctrl.pc_history(HISTORY_SIZE), None);
    }

    #[test]
    fn call_hook_follows_observation_and_state() {
        let mut ctrl = controller();
        ctrl.track_history = false;
        ctrl.compute_call_hook(false, false);
        assert!(!ctrl.call_hook());
        ctrl.compute_call_hook(true, false);
        assert!(ctrl.call_hook());
        ctrl.step_mode = StepMode::Single;
        ctrl.compute_call_hook(false, true);
        assert!(!ctrl.call_hook());
        ctrl.compute_call_hook(false, false);
        assert!(ctrl.call_hook());
        ctrl.observing = false;
        ctrl.compute_call_hook(true, false);
        assert!(!ctrl.call_hook());
    }
}
