//! In-memory host fixtures for tests: a flat bus, a tiny processor, and a scripted machine.
//!
//! [`ToyMachine`] implements the whole [`DebugHost`](crate::api::DebugHost) surface. Its
//! console pops commands from a queue whenever the debugger waits, falling back to `go`, so
//! a test can script a stop, a few steps, and a resume without a real user.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::time::Duration;

use crate::api::{
    BlobInfo, BlobKind, Console, DebugDevice, DisasmInterface, ExecutionInterface, ExpressionParser,
    Machine, MemoryInterface, StateEntry, StateInterface,
};
use crate::disasm::{Disassembly, InstructionFlow};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionContext, ExpressionSpace};
use crate::memory::{
    AccessSize, AddressSpaceConfig, AddressSpaceInfo, Endianness, SpaceRef, TranslateIntent,
    PROGRAM_SPACE,
};
use crate::points::AccessKind;
use crate::session::DebugSession;
use crate::symbols::SymbolScope;

#[derive(Debug, Clone)]
struct FlatSpace {
    info: AddressSpaceInfo,
    bytes: BTreeMap<u64, u8>,
    decrypted: BTreeMap<u64, u8>,
    unmapped: Vec<Range<u64>>,
    debugger_access: bool,
    debugger_access_count: usize,
    watch: (bool, bool),
    log_unmapped: bool,
    base_token: u64,
}

impl FlatSpace {
    fn new(config: AddressSpaceConfig) -> Self {
        Self {
            info: AddressSpaceInfo::new(config),
            bytes: BTreeMap::new(),
            decrypted: BTreeMap::new(),
            unmapped: Vec::new(),
            debugger_access: false,
            debugger_access_count: 0,
            watch: (false, false),
            log_unmapped: false,
            base_token: 0,
        }
    }

    fn is_unmapped(&self, address: u64) -> bool {
        self.unmapped.iter().any(|range| range.contains(&address))
    }

    fn byte(&self, address: u64, decrypted: bool) -> u8 {
        let address = address & self.info.byte_mask();
        decrypted
            .then(|| self.decrypted.get(&address))
            .flatten()
            .or_else(|| self.bytes.get(&address))
            .copied()
            .unwrap_or(0)
    }

    fn compose(&self, address: u64, count: u64, decrypted: bool) -> u64 {
        (0..count).fold(0, |value, offset| {
            let byte = u64::from(self.byte(address.wrapping_add(offset), decrypted));
            match self.info.endianness() {
                Endianness::Little => value | (byte << (8 * offset)),
                Endianness::Big => (value << 8) | byte,
            }
        })
    }
}

/// Sparse byte-addressed memory; every location reads zero until written.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    spaces: Vec<Option<FlatSpace>>,
}

impl FlatMemory {
    /// One entry per space index; `None` leaves a hole.
    #[must_use]
    pub fn new(configs: Vec<Option<AddressSpaceConfig>>) -> Self {
        Self {
            spaces: configs.into_iter().map(|config| config.map(FlatSpace::new)).collect(),
        }
    }

    fn space(&self, space: usize) -> Option<&FlatSpace> {
        self.spaces.get(space).and_then(Option::as_ref)
    }

    fn space_mut(&mut self, space: usize) -> Option<&mut FlatSpace> {
        self.spaces.get_mut(space).and_then(Option::as_mut)
    }

    /// Copies `bytes` into `space` from byte address `address`.
    pub fn load(&mut self, space: usize, address: u64, bytes: &[u8]) {
        if let Some(flat) = self.space_mut(space) {
            for (offset, &byte) in (0u64..).zip(bytes) {
                flat.bytes.insert(address.wrapping_add(offset), byte);
            }
        }
    }

    /// Copies `bytes` into the decrypted opcode view of `space`.
    pub fn load_decrypted(&mut self, space: usize, address: u64, bytes: &[u8]) {
        if let Some(flat) = self.space_mut(space) {
            for (offset, &byte) in (0u64..).zip(bytes) {
                flat.decrypted.insert(address.wrapping_add(offset), byte);
            }
        }
    }

    /// Makes translation fail over `range`; untranslated accesses still reach the bytes.
    pub fn unmap(&mut self, space: usize, range: Range<u64>) {
        if let Some(flat) = self.space_mut(space) {
            flat.unmapped.push(range);
        }
    }

    /// Raw byte, bypassing translation.
    #[must_use]
    pub fn peek(&self, space: usize, address: u64) -> u8 {
        self.space(space).map_or(0, |flat| flat.byte(address, false))
    }

    /// Stores a raw byte, bypassing translation.
    pub fn poke(&mut self, space: usize, address: u64, value: u8) {
        self.load(space, address, &[value]);
    }

    /// Whether the debugger-access flag is currently raised.
    #[must_use]
    pub fn debugger_access(&self, space: usize) -> bool {
        self.space(space).is_some_and(|flat| flat.debugger_access)
    }

    /// How many times the debugger-access flag has been raised.
    #[must_use]
    pub fn debugger_access_count(&self, space: usize) -> usize {
        self.space(space).map_or(0, |flat| flat.debugger_access_count)
    }

    /// Read and write hook enables last pushed by the debugger.
    #[must_use]
    pub fn watch_enables(&self, space: usize) -> (bool, bool) {
        self.space(space).map_or((false, false), |flat| flat.watch)
    }

    /// Changes the opcode base token, as a bank switch would.
    pub fn set_opcode_base_token(&mut self, space: usize, token: u64) {
        if let Some(flat) = self.space_mut(space) {
            flat.base_token = token;
        }
    }
}

impl MemoryInterface for FlatMemory {
    fn space_count(&self) -> usize {
        self.spaces.len()
    }

    fn space_config(&self, space: usize) -> Option<AddressSpaceConfig> {
        self.space(space).map(|flat| flat.info.config().clone())
    }

    fn translate(&mut self, space: usize, _intent: TranslateIntent, address: u64) -> Option<u64> {
        self.space(space)
            .filter(|flat| !flat.is_unmapped(address))
            .map(|_| address)
    }

    fn read(&mut self, space: usize, address: u64, size: AccessSize) -> u64 {
        self.space(space)
            .map_or(0, |flat| flat.compose(address, u64::from(size.bytes()), false))
    }

    fn write(&mut self, space: usize, address: u64, size: AccessSize, value: u64) {
        let Some(flat) = self.space_mut(space) else {
            return;
        };
        let count = u64::from(size.bytes());
        let big = flat.info.endianness().is_big();
        let mask = flat.info.byte_mask();
        for offset in 0..count {
            let lane = if big { count - 1 - offset } else { offset };
            let byte = (value >> (8 * lane)).to_le_bytes()[0];
            flat.bytes.insert(address.wrapping_add(offset) & mask, byte);
        }
    }

    fn opcode_word(&mut self, space: usize, address: u64, decrypted: bool) -> Option<u64> {
        let flat = self.space(space)?;
        let bus = u64::from(flat.info.bus_bytes().max(1));
        let base = address & !(bus - 1);
        if flat.is_unmapped(base) {
            return None;
        }
        // Lane 0 is the least significant byte regardless of bus order.
        let word = (0..bus).fold(0, |word, lane| {
            let offset = if flat.info.endianness().is_big() { bus - 1 - lane } else { lane };
            word | (u64::from(flat.byte(base + offset, decrypted)) << (8 * lane))
        });
        Some(word)
    }

    fn opcode_base_token(&self, space: usize) -> u64 {
        self.space(space).map_or(0, |flat| flat.base_token)
    }

    fn set_debugger_access(&mut self, space: usize, active: bool) {
        if let Some(flat) = self.space_mut(space) {
            flat.debugger_access = active;
            if active {
                flat.debugger_access_count += 1;
            }
        }
    }

    fn set_watch_enables(&mut self, space: usize, read: bool, write: bool) {
        if let Some(flat) = self.space_mut(space) {
            flat.watch = (read, write);
        }
    }

    fn log_unmapped(&self, space: usize) -> bool {
        self.space(space).is_some_and(|flat| flat.log_unmapped)
    }

    fn set_log_unmapped(&mut self, space: usize, enabled: bool) {
        if let Some(flat) = self.space_mut(space) {
            flat.log_unmapped = enabled;
        }
    }
}

/// `nop`, two bytes.
pub const OP_NOP: u8 = 0x00;
/// `ret`, two bytes: jumps to `r1`.
pub const OP_RET: u8 = 0x01;
/// `call t16`, four bytes: links into `r1`.
pub const OP_CALL: u8 = 0x02;
/// `store [a16],r0`, four bytes: writes the low word of `r0`.
pub const OP_STORE: u8 = 0x03;
/// `jmp t16`, four bytes.
pub const OP_JMP: u8 = 0x04;

const ADDRESS_MASK: u64 = 0xFFFF;

/// A 16-bit little-endian processor with two registers and five instructions.
///
/// Instructions are an opcode byte, a pad byte, and for the long forms a 16-bit
/// little-endian operand.
#[derive(Debug, Clone)]
pub struct ToyCpu {
    tag: String,
    /// Program counter.
    pub pc: u64,
    /// `r0` and `r1`; `r1` is the link register.
    pub regs: [u64; 2],
    /// Cycles left in the slice.
    pub cycles: i64,
    /// The program space.
    pub memory: FlatMemory,
    disassembler: bool,
}

impl ToyCpu {
    /// A processor with an empty 64 KiB program space.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            pc: 0,
            regs: [0; 2],
            cycles: 0,
            memory: FlatMemory::new(vec![Some(AddressSpaceConfig::new("program", 16, 16))]),
            disassembler: true,
        }
    }

    /// Hides the disassembler, as for a processor core that cannot decode its own code.
    #[must_use]
    pub const fn without_disassembler(mut self) -> Self {
        self.disassembler = false;
        self
    }

    /// Loads `program` at `address`.
    #[must_use]
    pub fn with_program(mut self, address: u64, program: &[u8]) -> Self {
        self.memory.load(PROGRAM_SPACE, address, program);
        self
    }

    fn operand(&self) -> u64 {
        let low = u64::from(self.memory.peek(PROGRAM_SPACE, self.pc + 2));
        let high = u64::from(self.memory.peek(PROGRAM_SPACE, self.pc + 3));
        low | (high << 8)
    }

    /// Executes the instruction at `pc` without moving `pc`. Returns the next `pc` and the
    /// `(address, data)` of a store, if any.
    pub fn execute(&mut self) -> (u64, Option<(u64, u64)>) {
        let pc = self.pc;
        let (next, store) = match self.memory.peek(PROGRAM_SPACE, pc) {
            OP_RET => (self.regs[1], None),
            OP_CALL => {
                self.regs[1] = (pc + 4) & ADDRESS_MASK;
                (self.operand(), None)
            }
            OP_STORE => {
                let address = self.operand();
                let data = self.regs[0] & 0xFFFF;
                self.memory.write(PROGRAM_SPACE, address, AccessSize::Word, data);
                (pc + 4, Some((address, data)))
            }
            OP_JMP => (self.operand(), None),
            _ => (pc + 2, None),
        };
        (next & ADDRESS_MASK, store)
    }
}

impl ExecutionInterface for ToyCpu {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn cycles_remaining(&self) -> i64 {
        self.cycles
    }
}

impl StateInterface for ToyCpu {
    fn state_entries(&self) -> Vec<StateEntry> {
        ["r0", "r1"]
            .iter()
            .enumerate()
            .map(|(index, symbol)| StateEntry {
                index,
                symbol: (*symbol).to_string(),
                writable: true,
            })
            .collect()
    }

    fn state_value(&self, index: usize) -> u64 {
        self.regs.get(index).copied().unwrap_or(0)
    }

    fn set_state_value(&mut self, index: usize, value: u64) {
        if let Some(reg) = self.regs.get_mut(index) {
            *reg = value & 0xFFFF;
        }
    }
}

impl DisasmInterface for ToyCpu {
    fn min_opcode_bytes(&self) -> u32 {
        2
    }

    fn max_opcode_bytes(&self) -> u32 {
        4
    }

    fn disassemble(&mut self, _pc: u64, opcodes: &[u8], arguments: &[u8]) -> Disassembly {
        let byte = |index: usize| arguments.get(index).copied().unwrap_or(0);
        let operand = u16::from_le_bytes([byte(2), byte(3)]);
        match opcodes.first().copied().unwrap_or(OP_NOP) {
            OP_NOP => Disassembly::new("nop", 2, InstructionFlow::Normal),
            OP_RET => Disassembly::new("ret", 2, InstructionFlow::Return),
            OP_CALL => Disassembly::new(
                format!("call {operand:04X}"),
                4,
                InstructionFlow::Call { extra_skip: 0 },
            ),
            OP_STORE => Disassembly::new(format!("store [{operand:04X}],r0"), 4, InstructionFlow::Normal),
            OP_JMP => Disassembly::new(format!("jmp {operand:04X}"), 4, InstructionFlow::Normal),
            op => Disassembly::new(format!("db {op:02X}"), 2, InstructionFlow::Normal),
        }
    }
}

impl DebugDevice for ToyCpu {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn name(&self) -> &str {
        "Toy CPU"
    }

    fn execution(&mut self) -> Option<&mut dyn ExecutionInterface> {
        Some(self)
    }

    fn memory(&mut self) -> Option<&mut dyn MemoryInterface> {
        Some(&mut self.memory)
    }

    fn state(&mut self) -> Option<&mut dyn StateInterface> {
        Some(self)
    }

    fn disassembly(&mut self) -> Option<&mut dyn DisasmInterface> {
        if self.disassembler {
            Some(self)
        } else {
            None
        }
    }
}

/// Emulated time one toy instruction takes.
pub const INSTRUCTION_TIME: Duration = Duration::from_micros(1);

/// A machine of [`ToyCpu`]s with a scripted console and a whitespace-token evaluator.
#[derive(Debug, Default)]
pub struct ToyMachine {
    /// Devices, indexed by position.
    pub cpus: Vec<ToyCpu>,
    /// Regions and shared blocks.
    pub blobs: Vec<(BlobInfo, Vec<u8>)>,
    /// Emulated time.
    pub time: Duration,
    /// Everything printed to the console.
    pub output: Vec<String>,
    /// Commands handed out while the debugger waits; `go` once empty.
    pub script: VecDeque<String>,
    /// Every command executed, actions included.
    pub executed: Vec<String>,
    /// Visible processor's `pc` at each fresh stop.
    pub stops: Vec<u64>,
    /// Reported as a pending scheduler event.
    pub event_pending: bool,
    /// Last value passed to `set_sound_muted`.
    pub muted: bool,
    /// Consumed by the next `break_requested`.
    pub break_request: bool,
}

impl ToyMachine {
    /// A machine made of `cpus`.
    #[must_use]
    pub fn new(cpus: Vec<ToyCpu>) -> Self {
        Self {
            cpus,
            ..Self::default()
        }
    }

    /// Adds a blob called `name`.
    #[must_use]
    pub fn with_blob(mut self, name: &str, kind: BlobKind, width: u8, data: Vec<u8>) -> Self {
        let info = BlobInfo {
            name: name.to_string(),
            kind,
            width,
            endianness: Endianness::Little,
        };
        self.blobs.push((info, data));
        self
    }

    /// Queues console commands for the wait loop.
    pub fn queue(&mut self, commands: &[&str]) {
        self.script.extend(commands.iter().map(|command| (*command).to_string()));
    }

    /// Whether any printed line contains `needle`.
    #[must_use]
    pub fn printed(&self, needle: &str) -> bool {
        self.output.iter().any(|line| line.contains(needle))
    }

    /// Runs one timeslice of `instructions` on `cpu`, driving every hook a scheduler would.
    pub fn run_slice(&mut self, session: &mut DebugSession, cpu: usize, instructions: u32) {
        if cpu >= self.cpus.len() {
            return;
        }
        let slice_end = self.time + INSTRUCTION_TIME * instructions;
        session.slice_start_hook(self, cpu, slice_end);
        for _ in 0..instructions {
            if session.should_call_instruction_hook(cpu) {
                let pc = self.cpus[cpu].pc;
                session.instruction_hook(self, cpu, pc);
            }
            let (next, store) = self.cpus[cpu].execute();
            if let Some((address, data)) = store {
                let space = SpaceRef::program(cpu);
                if session.watch_enabled(space, AccessKind::Write) {
                    session.memory_write_hook(self, space, address & !1, data, 0xFFFF);
                }
            }
            self.cpus[cpu].pc = next;
            self.time += INSTRUCTION_TIME;
        }
        session.slice_end_hook(self, cpu);
    }
}

impl Machine for ToyMachine {
    fn device_count(&self) -> usize {
        self.cpus.len()
    }

    fn device(&mut self, index: usize) -> Option<&mut dyn DebugDevice> {
        self.cpus.get_mut(index).map(|cpu| cpu as &mut dyn DebugDevice)
    }

    fn blobs(&self) -> Vec<BlobInfo> {
        self.blobs.iter().map(|(info, _)| info.clone()).collect()
    }

    fn blob_data(&mut self, index: usize) -> Option<&mut [u8]> {
        self.blobs.get_mut(index).map(|(_, data)| data.as_mut_slice())
    }

    fn machine_time(&self) -> Duration {
        self.time
    }

    fn scheduled_event_pending(&self) -> bool {
        self.event_pending
    }

    fn set_sound_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn break_requested(&mut self) -> bool {
        std::mem::take(&mut self.break_request)
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

impl Console for ToyMachine {
    fn execute_command(&mut self, session: &mut DebugSession, command: &str, _echo: bool) {
        self.executed.push(command.to_string());
        let mut words = command.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let argument = words.next();
        let count = argument.and_then(|arg| arg.parse().ok()).unwrap_or(1);
        match verb {
            "go" | "g" => session.go(argument.and_then(parse_hex)),
            "step" | "s" => session.single_step(count),
            "over" | "o" => session.step_over(count),
            "out" => session.step_out(),
            "gvblank" | "gv" => session.go_vblank(),
            "gint" | "gi" => session.go_interrupt(argument.and_then(|arg| arg.parse().ok())),
            "gex" | "ge" => session.go_exception(argument.and_then(|arg| arg.parse().ok()).unwrap_or(0)),
            "gtime" | "gt" => {
                let milliseconds = argument.and_then(|arg| arg.parse().ok()).unwrap_or(0);
                session.go_milliseconds(&*self, milliseconds);
            }
            "next" | "n" => session.go_next_device(),
            "ignore" | "observe" => {
                if let Some(cpu) = argument.and_then(|arg| arg.parse().ok()) {
                    session.ignore_cpu(self, cpu, verb == "ignore");
                }
            }
            "print" => {
                let text = command.trim_start().strip_prefix("print").unwrap_or_default().trim();
                self.print(text);
            }
            "eval" => {
                let text = command.trim_start().strip_prefix("eval").unwrap_or_default().trim();
                let line = match session.evaluate(self, text) {
                    Ok(value) => format!("{value:X}"),
                    Err(err) => format!("Error: {err}"),
                };
                self.print(&line);
            }
            _ => self.print(&format!("Unknown command '{command}'")),
        }
    }

    fn print(&mut self, text: &str) {
        self.output.push(text.to_string());
    }

    fn wait_for_debugger(&mut self, session: &mut DebugSession, first_stop: bool) {
        if first_stop {
            if let Some(cpu) = session.visible_cpu().and_then(|cpu| self.cpus.get(cpu)) {
                self.stops.push(cpu.pc);
            }
        }
        let command = self.script.pop_front().unwrap_or_else(|| String::from("go"));
        self.execute_command(session, &command, true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Add,
    Sub,
    And,
    Assign,
}

impl BinaryOp {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "+" => Self::Add,
            "-" => Self::Sub,
            "&" => Self::And,
            "=" => Self::Assign,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Literal(u64),
    Symbol(String),
    Memory { size: u8, address: Box<Operand> },
}

impl Operand {
    fn parse(token: &str, scope: &SymbolScope<'_>) -> Result<Self, ExpressionError> {
        for (prefix, size) in [("b@", 1), ("w@", 2), ("d@", 4), ("q@", 8)] {
            if let Some(rest) = token.strip_prefix(prefix) {
                let address = Box::new(Self::parse(rest, scope)?);
                return Ok(Self::Memory { size, address });
            }
        }
        if let Some(value) = parse_hex(token) {
            return Ok(Self::Literal(value));
        }
        let identifier = token.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !identifier {
            return Err(ExpressionError::Syntax);
        }
        if scope.contains(token) {
            Ok(Self::Symbol(token.to_string()))
        } else {
            Err(ExpressionError::UnknownSymbol(token.to_string()))
        }
    }

    fn value(&self, ctx: &mut dyn ExpressionContext) -> Result<u64, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(*value),
            Self::Symbol(name) => ctx.symbol_value(name),
            Self::Memory { size, address } => {
                let address = address.value(ctx)?;
                Ok(ctx.read_memory(None, ExpressionSpace::Logical(PROGRAM_SPACE), address, *size))
            }
        }
    }
}

/// Expression produced by [`ToyMachine`]: `operand` or `operand op operand`, space-separated.
///
/// Operands are hex literals, symbols, or `b@`/`w@`/`d@`/`q@` memory reads. Bare words made
/// only of hex digits are literals.
#[derive(Debug)]
struct ToyExpression {
    text: String,
    lhs: Operand,
    rhs: Option<(BinaryOp, Operand)>,
}

impl Expression for ToyExpression {
    fn original_text(&self) -> &str {
        &self.text
    }

    fn execute(&self, ctx: &mut dyn ExpressionContext) -> Result<u64, ExpressionError> {
        let Some((op, rhs)) = &self.rhs else {
            return self.lhs.value(ctx);
        };
        let right = rhs.value(ctx)?;
        if *op == BinaryOp::Assign {
            return match &self.lhs {
                Operand::Symbol(name) => ctx.set_symbol_value(name, right).map(|()| right),
                Operand::Memory { size, address } => {
                    let address = address.value(ctx)?;
                    let space = ExpressionSpace::Logical(PROGRAM_SPACE);
                    ctx.write_memory(None, space, address, *size, right);
                    Ok(right)
                }
                Operand::Literal(_) => Err(ExpressionError::NotLvalue(self.text.clone())),
            };
        }
        let left = self.lhs.value(ctx)?;
        Ok(match op {
            BinaryOp::Eq => u64::from(left == right),
            BinaryOp::Ne => u64::from(left != right),
            BinaryOp::Lt => u64::from(left < right),
            BinaryOp::Gt => u64::from(left > right),
            BinaryOp::Add => left.wrapping_add(right),
            BinaryOp::Sub => left.wrapping_sub(right),
            BinaryOp::And | BinaryOp::Assign => left & right,
        })
    }
}

impl ExpressionParser for ToyMachine {
    fn parse_expression(
        &mut self,
        text: &str,
        scope: &SymbolScope<'_>,
    ) -> Result<Box<dyn Expression>, ExpressionError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (lhs, rhs) = match tokens.as_slice() {
            [single] => (Operand::parse(single, scope)?, None),
            [left, op, right] => {
                let op = BinaryOp::parse(op).ok_or(ExpressionError::Syntax)?;
                (Operand::parse(left, scope)?, Some((op, Operand::parse(right, scope)?)))
            }
            _ => return Err(ExpressionError::Syntax),
        };
        Ok(Box::new(ToyExpression {
            text: text.to_string(),
            lhs,
            rhs,
        }))
    }
}

/// An expression with a fixed outcome.
#[derive(Debug, Clone)]
pub struct ConstExpression {
    text: String,
    result: Result<u64, ExpressionError>,
}

impl ConstExpression {
    /// Boxed expression reporting `text` and always evaluating to `result`.
    #[must_use]
    pub fn boxed(text: &str, result: Result<u64, ExpressionError>) -> Box<dyn Expression> {
        Box::new(Self {
            text: text.to_string(),
            result,
        })
    }
}

impl Expression for ConstExpression {
    fn original_text(&self) -> &str {
        &self.text
    }

    fn execute(&self, _ctx: &mut dyn ExpressionContext) -> Result<u64, ExpressionError> {
        self.result.clone()
    }
}

/// A context with no symbols and no memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContext;

impl ExpressionContext for NullContext {
    fn symbol_value(&mut self, name: &str) -> Result<u64, ExpressionError> {
        Err(ExpressionError::UnknownSymbol(name.to_string()))
    }

    fn set_symbol_value(&mut self, name: &str, _value: u64) -> Result<(), ExpressionError> {
        Err(ExpressionError::UnknownSymbol(name.to_string()))
    }

    fn read_memory(&mut self, _name: Option<&str>, _space: ExpressionSpace, _address: u64, _size: u8) -> u64 {
        u64::MAX
    }

    fn write_memory(
        &mut self,
        _name: Option<&str>,
        _space: ExpressionSpace,
        _address: u64,
        _size: u8,
        _value: u64,
    ) {
    }

    fn validate_memory(&mut self, _name: Option<&str>, _space: ExpressionSpace) -> Result<(), ExpressionError> {
        Err(ExpressionError::SpaceUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::{ToyCpu, OP_CALL, OP_RET, OP_STORE};
    use crate::api::DisasmInterface;

    #[test]
    fn toy_cpu_links_calls_and_returns() {
        let mut cpu = ToyCpu::new("maincpu").with_program(0, &[OP_CALL, 0, 0x00, 0x01]);
        cpu.memory.load(0, 0x100, &[OP_RET, 0]);
        let (next, store) = cpu.execute();
        assert_eq!((next, store), (0x100, None));
        assert_eq!(cpu.regs[1], 4);
        cpu.pc = next;
        assert_eq!(cpu.execute().0, 4);
    }

    #[test]
    fn toy_cpu_stores_r0_little_endian() {
        let mut cpu = ToyCpu::new("maincpu").with_program(0, &[OP_STORE, 0, 0x02, 0x01]);
        cpu.regs[0] = 0xBEEF;
        assert_eq!(cpu.execute(), (4, Some((0x102, 0xBEEF))));
        assert_eq!(cpu.memory.peek(0, 0x102), 0xEF);
        assert_eq!(cpu.memory.peek(0, 0x103), 0xBE);
    }

    #[test]
    fn toy_disassembler_classifies_flow() {
        let mut cpu = ToyCpu::new("maincpu");
        let call = cpu.disassemble(0, &[OP_CALL, 0, 0x34, 0x12], &[OP_CALL, 0, 0x34, 0x12]);
        assert_eq!(call.text, "call 1234");
        assert!(call.flow.is_call());
        assert!(cpu.disassemble(0, &[OP_RET, 0], &[OP_RET, 0]).flow.is_return());
        assert_eq!(cpu.disassemble(0, &[0x7F, 0], &[0x7F, 0]).text, "db 7F");
    }
}
