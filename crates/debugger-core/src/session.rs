//! The debugger session: hook entry points, the wait-for-debugger loop, and commands.
//!
//! The scheduler drives a [`DebugSession`] through its hooks:
//!
//! - [`DebugSession::slice_start_hook`] / [`DebugSession::slice_end_hook`] around each
//!   processor timeslice,
//! - [`DebugSession::instruction_hook`] before every instruction while
//!   [`DebugSession::should_call_instruction_hook`] is set,
//! - [`DebugSession::interrupt_hook`] / [`DebugSession::exception_hook`] when the processor
//!   takes one,
//! - [`DebugSession::memory_read_hook`] / [`DebugSession::memory_write_hook`] from the bus for
//!   spaces whose watch enables are set.
//!
//! Once execution is stopped the instruction hook blocks in the wait loop, handing control to
//! [`Console::wait_for_debugger`](crate::api::Console::wait_for_debugger) until a command sets
//! execution running again.

use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::api::{DebugConfig, DebugHost, TraceSink, WriterSink};
use crate::context::DebugContext;
use crate::controller::{DebugController, InstructionHook, StepMode};
use crate::error::DebugError;
use crate::expression::Expression;
use crate::hotspot::HotspotTracker;
use crate::memory::{AccessSize, Endianness, SpaceRef, TranslateIntent};
use crate::points::{AccessKind, Breakpoint, WatchKind, Watchpoint};
use crate::state::{ExecutionState, GlobalDebugState};
use crate::trace::Tracer;
use crate::view::{ViewId, ViewKind, ViewManager, ViewSlot};

/// Root of the debugger: global state, one controller per device, and the views.
pub struct DebugSession {
    config: DebugConfig,
    state: GlobalDebugState,
    cpus: Vec<DebugController>,
    views: ViewManager,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("state", &self.state)
            .field("cpus", &self.cpus)
            .finish_non_exhaustive()
    }
}

/// Narrows a bus access to the lanes selected by `mem_mask`, returning the byte address, the
/// size in bytes, and the data shifted down to match. A zero mask covers the whole bus.
pub(crate) fn narrow_access(
    address: u64,
    value: u64,
    mem_mask: u64,
    bus_bytes: u64,
    endianness: Endianness,
) -> (u64, u64, u64) {
    if mem_mask == 0 {
        return (address, bus_bytes, value);
    }
    let mut offset = 0;
    let mut mask = mem_mask;
    let mut value = value;
    while offset < bus_bytes && mask & 0xFF == 0 {
        offset += 1;
        value >>= 8;
        mask >>= 8;
    }
    let mut size = 0;
    while mask != 0 {
        size += 1;
        mask >>= 8;
    }
    let value = if size >= 8 { value } else { value & ((1 << (8 * size)) - 1) };
    let address = match endianness {
        Endianness::Little => address.wrapping_add(offset),
        Endianness::Big => address.wrapping_add(bus_bytes.saturating_sub(size + offset)),
    };
    (address, size, value)
}

fn size_name(size: u64) -> String {
    u8::try_from(size)
        .ok()
        .and_then(AccessSize::from_bytes)
        .map_or_else(|| format!("{size}bytes"), |size| size.name().to_string())
}

impl DebugSession {
    /// Creates a controller for every device the host exposes.
    ///
    /// With [`DebugConfig::start_stopped`] the first observed instruction enters the wait loop.
    pub fn new(host: &mut dyn DebugHost, config: DebugConfig) -> Self {
        let cpus: Vec<DebugController> = (0..host.device_count())
            .map_while(|index| host.device(index).map(|device| DebugController::new(index, device)))
            .collect();
        let mut state = GlobalDebugState::default();
        state.visible_cpu = cpus
            .iter()
            .find(|cpu| cpu.has_execution() && cpu.is_observing())
            .map(DebugController::index);
        if config.start_stopped {
            state.execution = ExecutionState::Stopped;
        }
        log::debug!(
            "debugger session created with {} devices, visible {:?}",
            cpus.len(),
            state.visible_cpu
        );
        let mut session = Self {
            config,
            state,
            cpus,
            views: ViewManager::new(),
        };
        for cpu in 0..session.cpus.len() {
            session.compute_flags(host, cpu);
        }
        session
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Global state.
    #[must_use]
    pub const fn state(&self) -> &GlobalDebugState {
        &self.state
    }

    /// Whether execution is stopped.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.state.execution.is_stopped()
    }

    /// Processor inside its timeslice.
    #[must_use]
    pub const fn live_cpu(&self) -> Option<usize> {
        self.state.live_cpu
    }

    /// Processor the user interface follows and commands act on.
    #[must_use]
    pub const fn visible_cpu(&self) -> Option<usize> {
        self.state.visible_cpu
    }

    /// Makes `cpu` the target of subsequent commands.
    pub fn set_visible_cpu(&mut self, cpu: usize) -> bool {
        if self.cpus.get(cpu).is_none() {
            return false;
        }
        self.state.visible_cpu = Some(cpu);
        true
    }

    /// Whether an instruction hook is running on the stack.
    #[must_use]
    pub const fn within_instruction_hook(&self) -> bool {
        self.state.within_instruction_hook
    }

    /// All controllers, indexed by device.
    #[must_use]
    pub fn controllers(&self) -> &[DebugController] {
        &self.cpus
    }

    /// Controller of device `cpu`.
    #[must_use]
    pub fn controller(&self, cpu: usize) -> Option<&DebugController> {
        self.cpus.get(cpu)
    }

    /// Borrows the session state together with `host` for memory and expression access.
    pub fn context<'s>(&'s mut self, host: &'s mut dyn DebugHost) -> DebugContext<'s> {
        DebugContext::new(host, &mut self.state, &self.cpus)
    }

    /// Whether the scheduler must call [`Self::instruction_hook`] for `cpu`.
    #[must_use]
    pub fn should_call_instruction_hook(&self, cpu: usize) -> bool {
        self.cpus.get(cpu).is_some_and(DebugController::call_hook)
    }

    /// Whether the bus must deliver `access` hooks for `space`.
    #[must_use]
    pub fn watch_enabled(&self, space: SpaceRef, access: AccessKind) -> bool {
        self.cpus.get(space.device).is_some_and(|cpu| {
            let (read, write) = cpu.watch_enables(space.space);
            match access {
                AccessKind::Read => read,
                AccessKind::Write => write,
            }
        })
    }

    fn compute_flags(&mut self, host: &dyn DebugHost, cpu: usize) {
        let stopped = self.state.execution.is_stopped();
        let pending = host.scheduled_event_pending();
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.compute_call_hook(stopped, pending);
        }
    }

    fn refresh_call_hook(&mut self, cpu: usize) {
        let stopped = self.state.execution.is_stopped();
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.compute_call_hook(stopped, false);
        }
    }

    fn refresh_views(&mut self, host: &mut dyn DebugHost, kind: Option<ViewKind>) {
        let mut ctx = DebugContext::new(host, &mut self.state, &self.cpus);
        self.views.update_all(&mut ctx, kind);
    }

    // ---- scheduler hooks ----

    /// Called when `cpu` starts a timeslice ending at machine time `slice_end`.
    pub fn slice_start_hook(&mut self, host: &mut dyn DebugHost, cpu: usize, slice_end: Duration) {
        if cpu >= self.cpus.len() {
            return;
        }
        if let Some(live) = self.state.live_cpu {
            log::warn!("slice start on device {cpu} while device {live} is still live");
        }
        self.state.live_cpu = Some(cpu);
        self.cpus[cpu].end_exec_time = slice_end;

        if !self.state.execution.is_stopped() {
            if self.state.visible_cpu == Some(cpu) {
                let due = self
                    .state
                    .last_periodic_update
                    .is_none_or(|last| last.elapsed() >= self.config.view_refresh_interval);
                if due {
                    self.refresh_views(host, None);
                    self.views.flush_updates();
                    self.state.last_periodic_update = Some(Instant::now());
                }
            }
            if self.state.break_cpu == Some(cpu) {
                self.state.execution = ExecutionState::Stopped;
                self.state.break_cpu = None;
            }
            if self.state.vblank_occurred {
                self.state.vblank_occurred = false;
                if self.cpus[cpu].stop.vblank {
                    self.state.execution = ExecutionState::Stopped;
                    host.print("Stopped at VBLANK");
                } else if host.break_requested() {
                    if let Some(visible) = self.state.visible_cpu {
                        self.halt_on_next_instruction(host, visible, "User-initiated break");
                    }
                }
            }
        }
        self.compute_flags(host, cpu);
    }

    /// Called when `cpu` finishes its timeslice.
    pub fn slice_end_hook(&mut self, _host: &mut dyn DebugHost, cpu: usize) {
        if self.state.live_cpu != Some(cpu) {
            log::warn!("slice end on device {cpu}, live is {:?}", self.state.live_cpu);
        }
        if self.cpus.get(cpu).is_some_and(|ctrl| ctrl.stop.context_switch) {
            self.state.execution = ExecutionState::Stopped;
            self.cpus.iter_mut().for_each(DebugController::reset_transient_flags);
        }
        self.state.live_cpu = None;
    }

    /// Marks a vertical blank; acted on at the next slice start.
    pub const fn vblank(&mut self) {
        self.state.vblank_occurred = true;
    }

    /// Called before `cpu` executes the instruction at `pc`.
    pub fn instruction_hook(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        if cpu >= self.cpus.len() {
            return;
        }
        self.state.within_instruction_hook = true;
        self.cpus[cpu].push_history(pc);
        self.trace_instruction(host, cpu, pc);

        if !self.is_stopped() {
            if let Some(hook) = self.cpus[cpu].instruction_hook.as_mut() {
                if hook(pc) {
                    self.state.execution = ExecutionState::Stopped;
                }
            }
        }

        if !self.is_stopped() {
            if self.cpus[cpu].step_mode == StepMode::None {
                self.check_stop_conditions(host, cpu, pc);
            } else {
                self.advance_step(host, cpu, pc);
            }
        }

        if self.is_stopped() {
            self.wait_for_debugger(host, cpu);
        }

        let ctrl = &self.cpus[cpu];
        if matches!(ctrl.step_mode, StepMode::Over | StepMode::Out) && ctrl.step_address.is_none() {
            self.prepare_step_over_out(host, cpu, pc);
        }

        self.state.within_instruction_hook = false;
        self.compute_flags(host, cpu);
    }

    fn advance_step(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        let ctrl = &mut self.cpus[cpu];
        if ctrl.step_address.is_some_and(|target| target != pc) {
            return;
        }
        ctrl.steps_left = ctrl.steps_left.saturating_sub(1);
        ctrl.step_address = None;
        if ctrl.steps_left == 0 {
            self.state.execution = ExecutionState::Stopped;
        } else if ctrl.step_mode != StepMode::Out && (ctrl.steps_left < 200 || ctrl.steps_left % 100 == 0) {
            self.refresh_views(host, None);
            self.views.flush_updates();
        }
    }

    fn check_stop_conditions(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        let now = host.machine_time();
        let ctrl = &mut self.cpus[cpu];
        if ctrl.stop.time.is_some_and(|stop_time| now >= stop_time) {
            ctrl.stop.time = None;
            self.state.execution = ExecutionState::Stopped;
            host.print(&format!("Stopped at time interval {:.3}", now.as_secs_f64()));
        } else if ctrl.stop.address == Some(pc) {
            let message = format!("Stopped at temporary breakpoint {pc:X} on CPU '{}'", ctrl.tag());
            self.state.execution = ExecutionState::Stopped;
            host.print(&message);
        } else if ctrl.breakpoints().any(Breakpoint::is_enabled) {
            self.breakpoint_check(host, cpu, pc);
        }
    }

    fn breakpoint_check(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        let hit = {
            let cpus = &self.cpus;
            let mut ctx = DebugContext::new(host, &mut self.state, cpus).with_scope(Some(cpu));
            cpus[cpu]
                .breakpoints()
                .find(|bp| bp.hit(pc, &mut ctx))
                .map(|bp| (bp.index(), bp.action().map(str::to_string)))
        };
        let Some((index, action)) = hit else {
            return;
        };
        log::debug!("breakpoint {index} hit at {pc:X} on device {cpu}");
        self.state.execution = ExecutionState::Stopped;
        if let Some(action) = action {
            host.execute_command(self, &action, false);
        }
        if self.is_stopped() {
            host.print(&format!("Stopped at breakpoint {index:X}"));
        }
    }

    fn wait_for_debugger(&mut self, host: &mut dyn DebugHost, cpu: usize) {
        self.cpus.iter_mut().for_each(DebugController::reset_transient_flags);
        self.state.break_cpu = None;
        self.state.visible_cpu = Some(cpu);
        self.refresh_views(host, None);

        host.set_sound_muted(true);
        let mut first_stop = true;
        while self.state.execution.is_stopped() {
            self.views.flush_updates();
            self.state.memory_modified = false;
            host.wait_for_debugger(self, first_stop);
            first_stop = false;
            if self.state.memory_modified {
                self.refresh_views(host, None);
            }
            self.process_script(host);
            if host.scheduled_event_pending() {
                self.state.execution = ExecutionState::Running;
            }
        }
        host.set_sound_muted(false);
        self.state.visible_cpu = Some(cpu);
    }

    fn prepare_step_over_out(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        let (dasm, target) = {
            let mut ctx = DebugContext::new(host, &mut self.state, &self.cpus);
            let dasm = ctx.disassemble(cpu, pc);
            let target = dasm
                .as_ref()
                .and_then(|dasm| ctx.step_over_target(cpu, pc, dasm));
            (dasm, target)
        };
        let budget = self.config.step_out_budget.max(1);
        let ctrl = &mut self.cpus[cpu];
        if target.is_some() {
            ctrl.step_address = target;
        }
        if ctrl.step_mode == StepMode::Out {
            ctrl.steps_left = match dasm {
                Some(dasm) if dasm.supported && dasm.flow.is_return() => 1,
                _ => budget,
            };
        }
    }

    fn trace_instruction(&mut self, host: &mut dyn DebugHost, cpu: usize, pc: u64) {
        let action = match self.cpus[cpu].tracer.as_mut() {
            Some(tracer) => {
                if !tracer.begin(pc) {
                    return;
                }
                tracer.action().map(str::to_string)
            }
            None => return,
        };
        if let Some(action) = action {
            host.execute_command(self, &action, false);
        }
        let Some(trace_over) = self.cpus[cpu].tracer.as_ref().map(Tracer::trace_over) else {
            return;
        };
        let address_chars = self.cpus[cpu].logical_address_chars();
        let (text, over_target) = {
            let mut ctx = DebugContext::new(host, &mut self.state, &self.cpus);
            match ctx.disassemble(cpu, pc) {
                Some(dasm) => {
                    let target = if trace_over {
                        ctx.step_over_target(cpu, pc, &dasm)
                    } else {
                        None
                    };
                    (dasm.text, target)
                }
                None => (String::from("<unmapped>"), None),
            }
        };
        if let Some(tracer) = self.cpus[cpu].tracer.as_mut() {
            tracer.finish(pc, address_chars, &text, over_target);
        }
    }

    fn process_script(&mut self, host: &mut dyn DebugHost) {
        while self.state.execution.is_stopped() {
            let Some(line) = self.state.script.pop_front() else {
                break;
            };
            let command = line.trim();
            if command.is_empty() || command.starts_with('#') || command.starts_with("//") {
                continue;
            }
            host.execute_command(self, command, true);
        }
    }

    /// Called when `cpu` takes interrupt `irq`.
    pub fn interrupt_hook(&mut self, host: &mut dyn DebugHost, cpu: usize, irq: i32) {
        let Some(ctrl) = self.cpus.get(cpu) else {
            return;
        };
        if let Some(wanted) = ctrl.stop.interrupt {
            if wanted.is_none_or(|line| line == irq) {
                let message = format!("Stopped on interrupt (CPU '{}', IRQ {irq})", ctrl.tag());
                self.state.execution = ExecutionState::Stopped;
                host.print(&message);
                self.compute_flags(host, cpu);
            }
        }
    }

    /// Called when `cpu` takes exception `exception`.
    pub fn exception_hook(&mut self, host: &mut dyn DebugHost, cpu: usize, exception: i32) {
        let Some(ctrl) = self.cpus.get(cpu) else {
            return;
        };
        if ctrl.stop.exception == Some(exception) {
            let message = format!("Stopped on exception (CPU '{}', exception {exception})", ctrl.tag());
            self.state.execution = ExecutionState::Stopped;
            host.print(&message);
            self.compute_flags(host, cpu);
        }
    }

    /// Bus read of the lanes in `mem_mask` of the bus word at byte address `address`.
    pub fn memory_read_hook(&mut self, host: &mut dyn DebugHost, space: SpaceRef, address: u64, mem_mask: u64) {
        self.watchpoint_check(host, space, AccessKind::Read, address, 0, mem_mask);
        self.hotspot_check(host, space, address);
    }

    /// Bus write of `data` to the lanes in `mem_mask` of the bus word at byte address `address`.
    pub fn memory_write_hook(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        address: u64,
        data: u64,
        mem_mask: u64,
    ) {
        self.watchpoint_check(host, space, AccessKind::Write, address, data, mem_mask);
    }

    fn watchpoint_check(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        access: AccessKind,
        address: u64,
        data: u64,
        mem_mask: u64,
    ) {
        if self.state.within_instruction_hook || self.state.debugger_access {
            return;
        }
        let Some(info) = self.cpus.get(space.device).and_then(|cpu| cpu.space(space.space)) else {
            return;
        };
        let bus_bytes = u64::from(info.bus_bytes().max(1));
        let (address, size, data) = narrow_access(address, data, mem_mask, bus_bytes, info.endianness());
        let display_address = info.byte_to_address(address);

        self.state.within_instruction_hook = true;
        self.state.wp_address = address;
        if access == AccessKind::Write {
            self.state.wp_data = data;
        }

        let hit = {
            let cpus = &self.cpus;
            let mut ctx = DebugContext::new(host, &mut self.state, cpus).with_scope(Some(space.device));
            cpus[space.device]
                .watchpoints(space.space)
                .find(|wp| wp.hit(access, address, size, &mut ctx))
                .map(|wp| (wp.index(), wp.action().map(str::to_string)))
        };

        if let Some((index, action)) = hit {
            log::debug!("watchpoint {index} hit at {address:X} on device {}", space.device);
            self.state.execution = ExecutionState::Stopped;
            if let Some(action) = action {
                host.execute_command(self, &action, false);
            }
            if self.is_stopped() {
                let pc = self.context(host).pc(space.device).unwrap_or(0);
                let size = size_name(size);
                let message = match access {
                    AccessKind::Write => format!(
                        "Stopped at watchpoint {index:X} writing {size} to {display_address:08X} (PC={pc:X}) (data={data:X})"
                    ),
                    AccessKind::Read => format!(
                        "Stopped at watchpoint {index:X} reading {size} from {display_address:08X} (PC={pc:X})"
                    ),
                };
                host.print(&message);
                self.compute_flags(host, space.device);
            }
        }
        self.state.within_instruction_hook = false;
    }

    fn hotspot_check(&mut self, host: &mut dyn DebugHost, space: SpaceRef, address: u64) {
        if self.state.debugger_access
            || self.cpus.get(space.device).is_none_or(|cpu| cpu.hotspots.is_none())
        {
            return;
        }
        let pc = self.context(host).pc(space.device).unwrap_or(0);
        let ctrl = &mut self.cpus[space.device];
        let evicted = ctrl
            .hotspots
            .as_mut()
            .and_then(|tracker| tracker.record(space, address, pc));
        if let Some(entry) = evicted {
            let name = ctrl.space(space.space).map_or("unknown", |info| info.name());
            let message = format!(
                "Hotspot @ {name} {:08X} (PC={:08X}) hit {} times (fell off bottom)",
                entry.access, entry.pc, entry.count
            );
            log::warn!("{message}");
            host.print(&message);
        }
    }

    // ---- execution control ----

    fn resume(&mut self, cpu: usize) {
        self.state.execution = ExecutionState::Running;
        self.refresh_call_hook(cpu);
    }

    fn with_visible(&mut self, arm: impl FnOnce(&mut DebugController)) {
        let Some(cpu) = self.state.visible_cpu.filter(|&cpu| cpu < self.cpus.len()) else {
            return;
        };
        arm(&mut self.cpus[cpu]);
        self.resume(cpu);
    }

    /// Runs `count` instructions on the visible processor, then stops.
    pub fn single_step(&mut self, count: u32) {
        self.with_visible(|ctrl| {
            ctrl.step_mode = StepMode::Single;
            ctrl.steps_left = count.max(1);
            ctrl.step_address = None;
        });
    }

    /// Like [`Self::single_step`], but a call-style instruction counts as one step.
    pub fn step_over(&mut self, count: u32) {
        self.with_visible(|ctrl| {
            ctrl.step_mode = StepMode::Over;
            ctrl.steps_left = count.max(1);
            ctrl.step_address = None;
        });
    }

    /// Runs until the current subroutine returns.
    pub fn step_out(&mut self) {
        let budget = self.config.step_out_budget.max(1);
        self.with_visible(|ctrl| {
            ctrl.step_mode = StepMode::Out;
            ctrl.steps_left = budget;
            ctrl.step_address = None;
        });
    }

    /// Resumes, optionally stopping when the visible processor reaches `target`.
    pub fn go(&mut self, target: Option<u64>) {
        self.with_visible(|ctrl| ctrl.stop.address = target);
    }

    /// Resumes until the next vertical blank.
    pub fn go_vblank(&mut self) {
        self.state.vblank_occurred = false;
        self.with_visible(|ctrl| ctrl.stop.vblank = true);
    }

    /// Resumes until the visible processor takes interrupt `irq`, or any interrupt.
    pub fn go_interrupt(&mut self, irq: Option<i32>) {
        self.with_visible(|ctrl| ctrl.stop.interrupt = Some(irq));
    }

    /// Resumes until the visible processor takes `exception`.
    pub fn go_exception(&mut self, exception: i32) {
        self.with_visible(|ctrl| ctrl.stop.exception = Some(exception));
    }

    /// Resumes for `milliseconds` of emulated time.
    pub fn go_milliseconds(&mut self, host: &dyn DebugHost, milliseconds: u64) {
        let stop_time = host.machine_time() + Duration::from_millis(milliseconds);
        self.with_visible(|ctrl| ctrl.stop.time = Some(stop_time));
    }

    /// Resumes until the visible processor's timeslice ends.
    pub fn go_next_device(&mut self) {
        self.with_visible(|ctrl| ctrl.stop.context_switch = true);
    }

    /// Stops before `cpu`'s next instruction, printing `message`. Stops immediately when
    /// `cpu` is live, otherwise defers to its next slice start. Repeated requests are ignored.
    pub fn halt_on_next_instruction(&mut self, host: &mut dyn DebugHost, cpu: usize, message: &str) {
        if self.state.break_cpu == Some(cpu) || cpu >= self.cpus.len() {
            return;
        }
        host.print(message);
        if self.state.live_cpu == Some(cpu) {
            self.state.execution = ExecutionState::Stopped;
            self.compute_flags(host, cpu);
        } else {
            self.state.break_cpu = Some(cpu);
        }
    }

    /// Stops or resumes observing `cpu`. Refuses to ignore the last observed processor.
    pub fn ignore_cpu(&mut self, host: &mut dyn DebugHost, cpu: usize, ignore: bool) -> bool {
        if cpu >= self.cpus.len() {
            return false;
        }
        if ignore
            && !self
                .cpus
                .iter()
                .any(|other| other.index() != cpu && other.has_execution() && other.is_observing())
        {
            host.print("Can't ignore all devices");
            return false;
        }
        self.cpus[cpu].observing = !ignore;
        if ignore && self.is_stopped() && self.state.visible_cpu == Some(cpu) {
            self.go_next_device();
        }
        self.compute_flags(host, cpu);
        true
    }

    /// Enables or disables the PC history for `cpu`.
    pub fn set_track_history(&mut self, cpu: usize, track: bool) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.track_history = track;
            self.refresh_call_hook(cpu);
        }
    }

    /// Installs or removes a per-instruction callback on `cpu`.
    pub fn set_instruction_hook(&mut self, cpu: usize, hook: Option<InstructionHook>) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.instruction_hook = hook;
            self.refresh_call_hook(cpu);
        }
    }

    // ---- breakpoints and watchpoints ----

    fn parse_guard(
        &mut self,
        host: &mut dyn DebugHost,
        cpu: usize,
        text: Option<&str>,
    ) -> Result<Option<Box<dyn Expression>>, DebugError> {
        let Some(text) = text else {
            return Ok(None);
        };
        let mut ctx = DebugContext::new(host, &mut self.state, &self.cpus);
        Ok(Some(ctx.parse_expression(text, Some(cpu))?))
    }

    /// Adds a breakpoint on `cpu` and returns its index.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSuchDevice`] for an unknown device, [`DebugError::Expression`] when the
    /// condition does not parse.
    pub fn breakpoint_set(
        &mut self,
        host: &mut dyn DebugHost,
        cpu: usize,
        address: u64,
        condition: Option<&str>,
        action: Option<&str>,
    ) -> Result<u32, DebugError> {
        if cpu >= self.cpus.len() {
            return Err(DebugError::NoSuchDevice(cpu));
        }
        let condition = self.parse_guard(host, cpu, condition)?;
        let index = self.state.allocate_breakpoint_index();
        self.cpus[cpu].add_breakpoint(Breakpoint::new(index, address, condition, action.map(str::to_string)));
        self.compute_flags(host, cpu);
        Ok(index)
    }

    /// Removes breakpoint `index` from whichever processor owns it.
    pub fn breakpoint_clear(&mut self, host: &mut dyn DebugHost, index: u32) -> bool {
        let Some(cpu) = self.cpus.iter_mut().position(|ctrl| ctrl.remove_breakpoint(index)) else {
            return false;
        };
        self.compute_flags(host, cpu);
        true
    }

    /// Enables or disables breakpoint `index`.
    pub fn breakpoint_enable(&mut self, host: &mut dyn DebugHost, index: u32, enable: bool) -> bool {
        let Some(cpu) = self
            .cpus
            .iter_mut()
            .position(|ctrl| ctrl.enable_breakpoint(index, enable))
        else {
            return false;
        };
        self.compute_flags(host, cpu);
        true
    }

    /// Removes every breakpoint of `cpu`.
    pub fn breakpoint_clear_all(&mut self, host: &mut dyn DebugHost, cpu: usize) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.clear_breakpoints();
            self.compute_flags(host, cpu);
        }
    }

    /// Enables or disables every breakpoint of `cpu`.
    pub fn breakpoint_enable_all(&mut self, host: &mut dyn DebugHost, cpu: usize, enable: bool) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.enable_all_breakpoints(enable);
            self.compute_flags(host, cpu);
        }
    }

    fn update_watch_enables(&mut self, host: &mut dyn DebugHost, cpu: usize, space: usize) {
        let Some((read, write)) = self.cpus.get(cpu).map(|ctrl| ctrl.watch_enables(space)) else {
            return;
        };
        if let Some(memory) = host.device(cpu).and_then(|device| device.memory()) {
            memory.set_watch_enables(space, read, write);
        }
    }

    /// Adds a watchpoint over `length` address units from `address` and returns its index.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSuchDevice`] or [`DebugError::NoSuchSpace`] for a missing target,
    /// [`DebugError::Expression`] when the condition does not parse.
    #[allow(clippy::too_many_arguments)]
    pub fn watchpoint_set(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        kind: WatchKind,
        address: u64,
        length: u64,
        condition: Option<&str>,
        action: Option<&str>,
    ) -> Result<u32, DebugError> {
        let info = self
            .cpus
            .get(space.device)
            .ok_or(DebugError::NoSuchDevice(space.device))?
            .space(space.space)
            .ok_or(DebugError::NoSuchSpace)?;
        let byte_address = info.address_to_byte(address) & info.byte_mask();
        let byte_length = info.address_to_byte(length);
        let condition = self.parse_guard(host, space.device, condition)?;
        let index = self.state.allocate_watchpoint_index();
        self.cpus[space.device].add_watchpoint(Watchpoint::new(
            index,
            space,
            kind,
            byte_address,
            byte_length,
            condition,
            action.map(str::to_string),
        ));
        self.update_watch_enables(host, space.device, space.space);
        self.compute_flags(host, space.device);
        Ok(index)
    }

    /// Removes watchpoint `index` from whichever processor owns it.
    pub fn watchpoint_clear(&mut self, host: &mut dyn DebugHost, index: u32) -> bool {
        let found = self
            .cpus
            .iter_mut()
            .enumerate()
            .find_map(|(cpu, ctrl)| ctrl.remove_watchpoint(index).map(|space| (cpu, space)));
        let Some((cpu, space)) = found else {
            return false;
        };
        self.update_watch_enables(host, cpu, space);
        self.compute_flags(host, cpu);
        true
    }

    /// Enables or disables watchpoint `index`.
    pub fn watchpoint_enable(&mut self, host: &mut dyn DebugHost, index: u32, enable: bool) -> bool {
        let found = self
            .cpus
            .iter_mut()
            .enumerate()
            .find_map(|(cpu, ctrl)| ctrl.enable_watchpoint(index, enable).map(|space| (cpu, space)));
        let Some((cpu, space)) = found else {
            return false;
        };
        self.update_watch_enables(host, cpu, space);
        self.compute_flags(host, cpu);
        true
    }

    fn update_all_watch_enables(&mut self, host: &mut dyn DebugHost, cpu: usize) {
        let spaces: Vec<usize> = self
            .cpus
            .get(cpu)
            .map(|ctrl| ctrl.spaces().map(|(space, _)| space).collect())
            .unwrap_or_default();
        for space in spaces {
            self.update_watch_enables(host, cpu, space);
        }
    }

    /// Removes every watchpoint of `cpu`.
    pub fn watchpoint_clear_all(&mut self, host: &mut dyn DebugHost, cpu: usize) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.clear_watchpoints();
            self.update_all_watch_enables(host, cpu);
            self.compute_flags(host, cpu);
        }
    }

    /// Enables or disables every watchpoint of `cpu`.
    pub fn watchpoint_enable_all(&mut self, host: &mut dyn DebugHost, cpu: usize, enable: bool) {
        if let Some(ctrl) = self.cpus.get_mut(cpu) {
            ctrl.enable_all_watchpoints(enable);
            self.update_all_watch_enables(host, cpu);
            self.compute_flags(host, cpu);
        }
    }

    // ---- tracing, hotspots, comments ----

    /// Starts, replaces, or with `None` stops tracing `cpu`.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSuchDevice`] for an unknown device.
    pub fn trace_to(
        &mut self,
        cpu: usize,
        sink: Option<Box<dyn TraceSink>>,
        trace_over: bool,
        action: Option<&str>,
    ) -> Result<(), DebugError> {
        let ctrl = self.cpus.get_mut(cpu).ok_or(DebugError::NoSuchDevice(cpu))?;
        ctrl.tracer = sink.map(|sink| Tracer::new(sink, trace_over, action.map(str::to_string)));
        self.refresh_call_hook(cpu);
        Ok(())
    }

    /// Traces `cpu` to the file at `path`.
    ///
    /// # Errors
    ///
    /// [`DebugError::Io`] when the file cannot be opened, [`DebugError::NoSuchDevice`] for an
    /// unknown device.
    pub fn trace_to_file(
        &mut self,
        cpu: usize,
        path: &Path,
        append: bool,
        trace_over: bool,
        action: Option<&str>,
    ) -> Result<(), DebugError> {
        if cpu >= self.cpus.len() {
            return Err(DebugError::NoSuchDevice(cpu));
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        log::debug!("tracing device {cpu} to {}", path.display());
        self.trace_to(cpu, Some(Box::new(WriterSink::new(BufWriter::new(file)))), trace_over, action)
    }

    /// Flushes every trace sink.
    pub fn flush_traces(&mut self) {
        for tracer in self.cpus.iter_mut().filter_map(|ctrl| ctrl.tracer.as_mut()) {
            tracer.flush();
        }
    }

    /// Tracks up to `count` read hotspots on `cpu`; zero disables tracking.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSuchDevice`] for an unknown device.
    pub fn track_hotspots(
        &mut self,
        host: &mut dyn DebugHost,
        cpu: usize,
        count: usize,
        threshold: u32,
    ) -> Result<(), DebugError> {
        let ctrl = self.cpus.get_mut(cpu).ok_or(DebugError::NoSuchDevice(cpu))?;
        ctrl.hotspots = (count > 0).then(|| HotspotTracker::new(count, threshold));
        self.update_all_watch_enables(host, cpu);
        Ok(())
    }

    /// Attaches `text` to the instruction at `address` on `cpu`.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSuchDevice`] for an unknown device.
    pub fn comment_add(
        &mut self,
        host: &mut dyn DebugHost,
        cpu: usize,
        address: u64,
        text: &str,
    ) -> Result<(), DebugError> {
        if cpu >= self.cpus.len() {
            return Err(DebugError::NoSuchDevice(cpu));
        }
        let checksum = self.context(host).opcode_checksum(cpu, address).unwrap_or(0);
        self.cpus[cpu].comments.add(address, checksum, text);
        Ok(())
    }

    /// Removes the comment on the instruction currently at `address`.
    pub fn comment_remove(&mut self, host: &mut dyn DebugHost, cpu: usize, address: u64) -> bool {
        if cpu >= self.cpus.len() {
            return false;
        }
        let checksum = self.context(host).opcode_checksum(cpu, address).unwrap_or(0);
        self.cpus[cpu].comments.remove(address, checksum)
    }

    /// Comment on the instruction currently at `address`.
    pub fn comment_text(&mut self, host: &mut dyn DebugHost, cpu: usize, address: u64) -> Option<String> {
        self.context(host).comment_text(cpu, address).map(str::to_string)
    }

    // ---- scripts ----

    /// Queues command lines to run the next time the wait loop is idle.
    pub fn source_script(&mut self, text: &str) {
        self.state.script.extend(text.lines().map(str::to_string));
    }

    /// Queues the lines of the file at `path`.
    ///
    /// # Errors
    ///
    /// [`DebugError::Io`] when the file cannot be read.
    pub fn source_script_file(&mut self, path: &Path) -> Result<(), DebugError> {
        let text = fs::read_to_string(path).inspect_err(|err| {
            log::warn!("cannot read script {}: {err}", path.display());
        })?;
        self.source_script(&text);
        Ok(())
    }

    /// Queued script lines not yet executed.
    #[must_use]
    pub fn pending_script_lines(&self) -> usize {
        self.state.script.len()
    }

    // ---- memory service ----

    fn check_space(&self, space: SpaceRef) -> Result<(), DebugError> {
        self.cpus
            .get(space.device)
            .ok_or(DebugError::NoSuchDevice(space.device))?
            .space(space.space)
            .map(|_| ())
            .ok_or(DebugError::NoSuchSpace)
    }

    fn access_size(size: u8) -> Result<AccessSize, DebugError> {
        AccessSize::from_bytes(size).ok_or(DebugError::UnsupportedAccessSize(size))
    }

    /// Reads `size` bytes at logical byte address `address`; unmapped memory reads as all ones.
    ///
    /// # Errors
    ///
    /// [`DebugError::UnsupportedAccessSize`] unless `size` is 1, 2, 4, or 8; missing device or
    /// space errors.
    pub fn read_memory(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        address: u64,
        size: u8,
        translate: bool,
    ) -> Result<u64, DebugError> {
        let size = Self::access_size(size)?;
        self.check_space(space)?;
        Ok(self.context(host).read_space(space, address, size, translate))
    }

    /// Writes `size` bytes at logical byte address `address`; unmapped writes are dropped.
    ///
    /// # Errors
    ///
    /// As [`Self::read_memory`].
    pub fn write_memory(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        address: u64,
        size: u8,
        value: u64,
        translate: bool,
    ) -> Result<(), DebugError> {
        let size = Self::access_size(size)?;
        self.check_space(space)?;
        self.context(host).write_space(space, address, size, value, translate);
        Ok(())
    }

    /// Fetches `size` opcode (`decrypted`) or argument bytes from `cpu`'s program space.
    ///
    /// # Errors
    ///
    /// As [`Self::read_memory`].
    pub fn read_opcode(
        &mut self,
        host: &mut dyn DebugHost,
        cpu: usize,
        address: u64,
        size: u8,
        decrypted: bool,
    ) -> Result<u64, DebugError> {
        let size = Self::access_size(size)?;
        let space = SpaceRef::program(cpu);
        self.check_space(space)?;
        Ok(self.context(host).read_opcode(space, address, size, decrypted))
    }

    /// Translates a logical byte address; `None` when unmapped or the space is missing.
    pub fn translate(
        &mut self,
        host: &mut dyn DebugHost,
        space: SpaceRef,
        intent: TranslateIntent,
        address: u64,
    ) -> Option<u64> {
        self.context(host).translate(space, intent, address)
    }

    /// Reads from the blob called `name`; `None` when no such blob exists.
    ///
    /// # Errors
    ///
    /// [`DebugError::UnsupportedAccessSize`] unless `size` is 1, 2, 4, or 8.
    pub fn read_blob(
        &mut self,
        host: &mut dyn DebugHost,
        name: &str,
        offset: u64,
        size: u8,
    ) -> Result<Option<u64>, DebugError> {
        let size = Self::access_size(size)?;
        let mut ctx = self.context(host);
        Ok(ctx.blob_index(name).and_then(|index| ctx.read_blob(index, offset, size)))
    }

    /// Writes to the blob called `name`, returning whether it exists.
    ///
    /// # Errors
    ///
    /// [`DebugError::UnsupportedAccessSize`] unless `size` is 1, 2, 4, or 8.
    pub fn write_blob(
        &mut self,
        host: &mut dyn DebugHost,
        name: &str,
        offset: u64,
        size: u8,
        value: u64,
    ) -> Result<bool, DebugError> {
        let size = Self::access_size(size)?;
        let mut ctx = self.context(host);
        let Some(index) = ctx.blob_index(name) else {
            return Ok(false);
        };
        ctx.write_blob(index, offset, size, value);
        Ok(true)
    }

    /// Parses and evaluates `text` in the visible processor's scope.
    ///
    /// # Errors
    ///
    /// [`DebugError::Expression`] on parse or evaluation failure.
    pub fn evaluate(&mut self, host: &mut dyn DebugHost, text: &str) -> Result<u64, DebugError> {
        let mut ctx = self.context(host);
        let expression = ctx.parse_expression(text, None)?;
        Ok(expression.execute(&mut ctx)?)
    }

    // ---- views ----

    /// Creates a view of `kind` showing its first available source.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSources`] when nothing of that kind can be shown.
    pub fn alloc_view(&mut self, host: &mut dyn DebugHost, kind: ViewKind) -> Result<ViewId, DebugError> {
        let mut ctx = DebugContext::new(host, &mut self.state, &self.cpus);
        self.views.alloc(kind, &self.config, &mut ctx)
    }

    /// Destroys view `id`.
    pub fn free_view(&mut self, id: ViewId) -> bool {
        self.views.free(id)
    }

    /// View `id`.
    #[must_use]
    pub fn view(&self, id: ViewId) -> Option<&ViewSlot> {
        self.views.get(id)
    }

    /// View `id` together with a context for driving it.
    pub fn view_mut<'s>(
        &'s mut self,
        host: &'s mut dyn DebugHost,
        id: ViewId,
    ) -> Option<(&'s mut ViewSlot, DebugContext<'s>)> {
        let view = self.views.get_mut(id)?;
        Some((view, DebugContext::new(host, &mut self.state, &self.cpus)))
    }

    /// Forces a recompute of every view, or only those of `kind`.
    pub fn update_all_views(&mut self, host: &mut dyn DebugHost, kind: Option<ViewKind>) {
        self.refresh_views(host, kind);
    }

    /// Hands owed refreshes to the presentation callbacks.
    pub fn flush_view_updates(&mut self) {
        self.views.flush_updates();
    }
}
