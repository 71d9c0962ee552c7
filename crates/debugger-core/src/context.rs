//! Borrowed view of the host, the global state, and the controllers.
//!
//! A [`DebugContext`] is assembled from disjoint borrows of a session so that guard
//! expressions can be evaluated while the controller lists are being walked. It is the
//! single place memory, registers, and the disassembler are reached from.

use crate::api::DebugHost;
use crate::comments::opcode_checksum;
use crate::controller::DebugController;
use crate::disasm::Disassembly;
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionContext, ExpressionSpace};
use crate::memory::{AccessSize, BlobAccessor, SpaceAccessor, SpaceRef, TranslateIntent, PROGRAM_SPACE};
use crate::state::GlobalDebugState;
use crate::symbols::{SymbolBinding, SymbolScope};

/// Host, global state, and processors borrowed for the duration of one operation.
pub struct DebugContext<'a> {
    host: &'a mut dyn DebugHost,
    state: &'a mut GlobalDebugState,
    cpus: &'a [DebugController],
    scope: Option<usize>,
}

impl std::fmt::Debug for DebugContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugContext")
            .field("state", &self.state)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<'a> DebugContext<'a> {
    /// Assembles a context; expressions are scoped to the visible processor.
    pub const fn new(
        host: &'a mut dyn DebugHost,
        state: &'a mut GlobalDebugState,
        cpus: &'a [DebugController],
    ) -> Self {
        Self {
            host,
            state,
            cpus,
            scope: None,
        }
    }

    /// Scopes expressions to `cpu`'s symbol table.
    #[must_use]
    pub const fn with_scope(mut self, cpu: Option<usize>) -> Self {
        self.scope = cpu;
        self
    }

    /// Reborrow scoped to `cpu`'s symbol table; `None` keeps the current scope.
    pub fn scoped(&mut self, cpu: Option<usize>) -> DebugContext<'_> {
        DebugContext {
            host: &mut *self.host,
            state: &mut *self.state,
            cpus: self.cpus,
            scope: cpu.or(self.scope),
        }
    }

    /// The host.
    pub const fn host(&mut self) -> &mut dyn DebugHost {
        &mut *self.host
    }

    /// Global state.
    #[must_use]
    pub const fn state(&self) -> &GlobalDebugState {
        self.state
    }

    /// All controllers.
    #[must_use]
    pub const fn controllers(&self) -> &'a [DebugController] {
        self.cpus
    }

    /// Controller `cpu`.
    #[must_use]
    pub fn controller(&self, cpu: usize) -> Option<&'a DebugController> {
        self.cpus.get(cpu)
    }

    /// Processor whose symbols scope expressions: the explicit scope, else the visible one.
    #[must_use]
    pub fn scope_cpu(&self) -> Option<usize> {
        self.scope.or(self.state.visible_cpu)
    }

    /// Prints a console line.
    pub fn print(&mut self, text: &str) {
        self.host.print(text);
    }

    /// Parses `text` against `cpu`'s symbols chained to the global table.
    ///
    /// # Errors
    ///
    /// Propagates the evaluator's parse error.
    pub fn parse_expression(
        &mut self,
        text: &str,
        cpu: Option<usize>,
    ) -> Result<Box<dyn Expression>, ExpressionError> {
        let cpus = self.cpus;
        let local = cpu
            .or_else(|| self.scope_cpu())
            .and_then(|cpu| cpus.get(cpu))
            .map(DebugController::symbols);
        let scope = SymbolScope::new(local, &self.state.symbols);
        self.host.parse_expression(text, &scope)
    }

    /// Live program counter of `cpu`.
    pub fn pc(&mut self, cpu: usize) -> Option<u64> {
        self.host
            .device(cpu)
            .and_then(|device| device.execution())
            .map(|execution| execution.pc())
    }

    fn with_accessor<R>(
        &mut self,
        space: SpaceRef,
        access: impl FnOnce(&mut SpaceAccessor<'_>) -> R,
    ) -> Option<R> {
        let cpus = self.cpus;
        let info = cpus.get(space.device)?.space(space.space)?;
        let memory = self.host.device(space.device)?.memory()?;
        self.state.debugger_access = true;
        let mut accessor = SpaceAccessor::new(memory, info, space.space);
        let result = access(&mut accessor);
        self.state.debugger_access = false;
        Some(result)
    }

    /// Reads `size` bytes at byte address `address`; all ones when the space is missing or
    /// the address is unmapped.
    pub fn read_space(&mut self, space: SpaceRef, address: u64, size: AccessSize, translate: bool) -> u64 {
        let all_ones = size.mask();
        self.with_accessor(space, |accessor| accessor.read(address, size, translate))
            .unwrap_or(all_ones)
    }

    /// Reads `size` bytes, or `None` when the space is missing or the address is unmapped.
    pub fn read_space_checked(
        &mut self,
        space: SpaceRef,
        address: u64,
        size: AccessSize,
        translate: bool,
    ) -> Option<u64> {
        self.with_accessor(space, |accessor| accessor.read_checked(address, size, translate))
            .flatten()
    }

    /// Writes `size` bytes at byte address `address` and flags memory as modified.
    pub fn write_space(
        &mut self,
        space: SpaceRef,
        address: u64,
        size: AccessSize,
        value: u64,
        translate: bool,
    ) {
        if self
            .with_accessor(space, |accessor| accessor.write(address, size, value, translate))
            .is_some()
        {
            self.state.memory_modified = true;
        }
    }

    /// Fetches `size` opcode or argument bytes at byte address `address`.
    pub fn read_opcode(&mut self, space: SpaceRef, address: u64, size: AccessSize, decrypted: bool) -> u64 {
        let all_ones = size.mask();
        self.with_accessor(space, |accessor| accessor.read_opcode(address, size, decrypted))
            .unwrap_or(all_ones)
    }

    /// Logical to physical translation of a byte address.
    pub fn translate(&mut self, space: SpaceRef, intent: TranslateIntent, address: u64) -> Option<u64> {
        self.with_accessor(space, |accessor| accessor.translate(intent, address))
            .flatten()
    }

    /// Index of the blob called `name`.
    pub fn blob_index(&mut self, name: &str) -> Option<usize> {
        self.host
            .blobs()
            .iter()
            .position(|blob| blob.name.eq_ignore_ascii_case(name))
    }

    fn with_blob<R>(&mut self, index: usize, access: impl FnOnce(&mut BlobAccessor<'_>) -> R) -> Option<R> {
        let info = self.host.blobs().into_iter().nth(index)?;
        let data = self.host.blob_data(index)?;
        let mut accessor = BlobAccessor::new(data, info.width, info.endianness);
        Some(access(&mut accessor))
    }

    /// Reads from blob `index`; `None` when it does not exist.
    pub fn read_blob(&mut self, index: usize, offset: u64, size: AccessSize) -> Option<u64> {
        self.with_blob(index, |blob| blob.read(offset, size))
    }

    /// Length of blob `index` in bytes.
    pub fn blob_len(&mut self, index: usize) -> Option<usize> {
        self.with_blob(index, |blob| blob.len())
    }

    /// Writes to blob `index` and flags memory as modified.
    pub fn write_blob(&mut self, index: usize, offset: u64, size: AccessSize, value: u64) {
        if self.with_blob(index, |blob| blob.write(offset, size, value)).is_some() {
            self.state.memory_modified = true;
        }
    }

    /// Disassembles one instruction of `cpu` at logical address `pc`.
    pub fn disassemble(&mut self, cpu: usize, pc: u64) -> Option<Disassembly> {
        let cpus = self.cpus;
        let controller = cpus.get(cpu)?;
        if !controller.has_disassembly() {
            return None;
        }
        let info = controller.space(PROGRAM_SPACE)?;
        let count = u64::from(controller.max_opcode_bytes());
        let start = info.address_to_byte(pc) & info.logical_byte_mask();
        let (opcodes, arguments) = self.with_accessor(SpaceRef::program(cpu), |accessor| {
            let fetch = |accessor: &mut SpaceAccessor<'_>, decrypted: bool| -> Vec<u8> {
                (0..count)
                    .map(|offset| {
                        let byte = accessor.read_opcode(start.wrapping_add(offset), AccessSize::Byte, decrypted);
                        byte.to_le_bytes()[0]
                    })
                    .collect()
            };
            let opcodes = fetch(accessor, true);
            let arguments = fetch(accessor, false);
            (opcodes, arguments)
        })?;
        let disassembler = self.host.device(cpu)?.disassembly()?;
        Some(disassembler.disassemble(pc, &opcodes, &arguments))
    }

    /// Address just past a call-style instruction and the extra instructions it claims, or
    /// `None` when `dasm` is not call-style.
    pub fn step_over_target(&mut self, cpu: usize, pc: u64, dasm: &Disassembly) -> Option<u64> {
        let extra_skip = dasm.call_skip()?;
        let mut target = pc.wrapping_add(u64::from(dasm.length));
        for _ in 0..extra_skip {
            let next = self.disassemble(cpu, target)?;
            target = target.wrapping_add(u64::from(next.length));
        }
        Some(target)
    }

    /// Checksum of the raw bytes of the instruction at `pc`, used to key comments.
    pub fn opcode_checksum(&mut self, cpu: usize, pc: u64) -> Option<u32> {
        let dasm = self.disassemble(cpu, pc)?;
        let cpus = self.cpus;
        let info = cpus.get(cpu)?.space(PROGRAM_SPACE)?;
        let start = info.address_to_byte(pc);
        let length = info.address_to_byte(u64::from(dasm.length.max(1)));
        let bytes: Vec<u8> = (0..length)
            .map(|offset| {
                let byte = self.read_opcode(
                    SpaceRef::program(cpu),
                    start.wrapping_add(offset),
                    AccessSize::Byte,
                    false,
                );
                byte.to_le_bytes()[0]
            })
            .collect();
        Some(opcode_checksum(&bytes))
    }

    /// Comment attached to the instruction currently at `address` on `cpu`.
    pub fn comment_text(&mut self, cpu: usize, address: u64) -> Option<&'a str> {
        let checksum = self.opcode_checksum(cpu, address)?;
        let cpus = self.cpus;
        cpus.get(cpu)?.comments().text(address, checksum)
    }

    /// Token identifying the current opcode base of `space`; changes on banking or decryption.
    pub fn opcode_base_token(&mut self, space: SpaceRef) -> u64 {
        self.host
            .device(space.device)
            .and_then(|device| device.memory())
            .map_or(0, |memory| memory.opcode_base_token(space.space))
    }

    fn resolve_device(&self, name: Option<&str>) -> Result<Option<usize>, ExpressionError> {
        let Some(name) = name else {
            return Ok(self.scope_cpu());
        };
        self.cpus
            .iter()
            .position(|cpu| cpu.tag().eq_ignore_ascii_case(name))
            .map(Some)
            .ok_or_else(|| ExpressionError::InvalidMemoryName(name.to_string()))
    }

    /// Maps an expression address (in address units) to (space, byte address, translate,
    /// opcode fetch).
    fn expression_target(
        &self,
        name: Option<&str>,
        space: ExpressionSpace,
        address: u64,
    ) -> Option<(SpaceRef, u64, bool, Option<bool>)> {
        let device = self.resolve_device(name).ok()??;
        let (index, translate, opcode) = match space {
            ExpressionSpace::Logical(index) => (index, true, None),
            ExpressionSpace::Physical(index) => (index, false, None),
            ExpressionSpace::Opcode => (PROGRAM_SPACE, true, Some(true)),
            ExpressionSpace::RamWrite => (PROGRAM_SPACE, true, Some(false)),
            ExpressionSpace::Region => return None,
        };
        let info = self.cpus.get(device)?.space(index)?;
        Some((SpaceRef::new(device, index), info.address_to_byte(address), translate, opcode))
    }

    #[allow(clippy::cast_sign_loss)]
    fn binding_value(&mut self, binding: SymbolBinding) -> u64 {
        match binding {
            SymbolBinding::Constant(value) => value,
            SymbolBinding::WatchpointAddress => self.state.wp_address,
            SymbolBinding::WatchpointData => self.state.wp_data,
            SymbolBinding::CpuNumber => self.state.visible_cpu.map_or(0, |cpu| cpu as u64),
            SymbolBinding::Scratch(index) => self.state.scratch.get(index).copied().unwrap_or(0),
            SymbolBinding::Register { device, index, .. } => self
                .host
                .device(device)
                .and_then(|device| device.state())
                .map_or(0, |state| state.state_value(index)),
            SymbolBinding::ProgramCounter { device } => self.pc(device).unwrap_or(0),
            SymbolBinding::CyclesRemaining { device } => self
                .host
                .device(device)
                .and_then(|device| device.execution())
                .map_or(0, |execution| execution.cycles_remaining() as u64),
            SymbolBinding::LogUnmapped(space) => self
                .host
                .device(space.device)
                .and_then(|device| device.memory())
                .map_or(0, |memory| u64::from(memory.log_unmapped(space.space))),
        }
    }

    fn lookup(&self, name: &str) -> Option<SymbolBinding> {
        let local = self
            .scope_cpu()
            .and_then(|cpu| self.cpus.get(cpu))
            .map(DebugController::symbols);
        SymbolScope::new(local, &self.state.symbols).lookup(name)
    }
}

impl ExpressionContext for DebugContext<'_> {
    fn symbol_value(&mut self, name: &str) -> Result<u64, ExpressionError> {
        let binding = self
            .lookup(name)
            .ok_or_else(|| ExpressionError::UnknownSymbol(name.to_string()))?;
        Ok(self.binding_value(binding))
    }

    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), ExpressionError> {
        let binding = self
            .lookup(name)
            .ok_or_else(|| ExpressionError::UnknownSymbol(name.to_string()))?;
        if !binding.is_writable() {
            return Err(ExpressionError::NotLvalue(name.to_string()));
        }
        match binding {
            SymbolBinding::Scratch(index) => {
                if let Some(slot) = self.state.scratch.get_mut(index) {
                    *slot = value;
                }
            }
            SymbolBinding::Register { device, index, .. } => {
                if let Some(state) = self.host.device(device).and_then(|device| device.state()) {
                    state.set_state_value(index, value);
                }
            }
            SymbolBinding::LogUnmapped(space) => {
                if let Some(memory) = self.host.device(space.device).and_then(|device| device.memory()) {
                    memory.set_log_unmapped(space.space, value != 0);
                }
            }
            _ => return Err(ExpressionError::NotLvalue(name.to_string())),
        }
        Ok(())
    }

    fn read_memory(&mut self, name: Option<&str>, space: ExpressionSpace, address: u64, size: u8) -> u64 {
        let Some(size) = AccessSize::from_bytes(size) else {
            return u64::MAX;
        };
        let all_ones = size.mask();
        if space == ExpressionSpace::Region {
            return name
                .and_then(|name| self.blob_index(name))
                .and_then(|index| self.read_blob(index, address, size))
                .unwrap_or(all_ones);
        }
        match self.expression_target(name, space, address) {
            Some((target, byte, _, Some(decrypted))) => self.read_opcode(target, byte, size, decrypted),
            Some((target, byte, translate, None)) => self.read_space(target, byte, size, translate),
            None => all_ones,
        }
    }

    fn write_memory(
        &mut self,
        name: Option<&str>,
        space: ExpressionSpace,
        address: u64,
        size: u8,
        value: u64,
    ) {
        let Some(size) = AccessSize::from_bytes(size) else {
            return;
        };
        if space == ExpressionSpace::Region {
            if let Some(index) = name.and_then(|name| self.blob_index(name)) {
                self.write_blob(index, address, size, value);
            }
            return;
        }
        if let Some((target, byte, translate, _)) = self.expression_target(name, space, address) {
            self.write_space(target, byte, size, value, translate);
        }
    }

    fn validate_memory(&mut self, name: Option<&str>, space: ExpressionSpace) -> Result<(), ExpressionError> {
        if space == ExpressionSpace::Region {
            let name = name.ok_or(ExpressionError::MissingMemoryName)?;
            return self
                .blob_index(name)
                .map(|_| ())
                .ok_or_else(|| ExpressionError::InvalidMemoryName(name.to_string()));
        }
        let device = self
            .resolve_device(name)?
            .ok_or(ExpressionError::SpaceUnavailable)?;
        let index = match space {
            ExpressionSpace::Logical(index) | ExpressionSpace::Physical(index) => index,
            ExpressionSpace::Opcode | ExpressionSpace::RamWrite | ExpressionSpace::Region => PROGRAM_SPACE,
        };
        self.cpus
            .get(device)
            .and_then(|cpu| cpu.space(index))
            .map(|_| ())
            .ok_or(ExpressionError::SpaceUnavailable)
    }
}
