//! Host-facing contracts: the machine, its devices, the console, and runtime configuration.
//!
//! The debugger never owns the emulated machine. Every entry point takes the host as a
//! `&mut dyn DebugHost`, and the host in turn hands the [`DebugSession`] back to the console
//! when it executes commands or blocks in the wait loop.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::disasm::Disassembly;
use crate::error::ExpressionError;
use crate::expression::Expression;
use crate::memory::{AccessSize, AddressSpaceConfig, Endianness, TranslateIntent};
use crate::session::DebugSession;
use crate::symbols::SymbolScope;

/// Default interval between periodic view refreshes while running (about 4 Hz).
pub const DEFAULT_VIEW_REFRESH_INTERVAL: Duration = Duration::from_millis(250);
/// Default instruction budget for a step-out before the return is located.
pub const DEFAULT_STEP_OUT_BUDGET: u32 = 100;

/// Runtime configuration for a debugger session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DebugConfig {
    /// Stop before the first observed instruction.
    pub start_stopped: bool,
    /// Minimum interval between periodic view refreshes on the visible processor.
    pub view_refresh_interval: Duration,
    /// Remaining-step budget used while a step-out searches for its return.
    pub step_out_budget: u32,
    /// Row count of a disassembly view.
    pub disasm_default_lines: u32,
    /// Width of the mnemonic column of a disassembly view.
    pub disasm_mnemonic_width: u32,
    /// Instructions a disassembly view scans back from its home address.
    pub disasm_backward_steps: u32,
    /// Default hotspot table size.
    pub hotspot_default_count: usize,
    /// Default hotspot eviction report threshold.
    pub hotspot_default_threshold: u32,
    /// Default memory view row width in chunks.
    pub memory_default_chunks_per_row: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            start_stopped: true,
            view_refresh_interval: DEFAULT_VIEW_REFRESH_INTERVAL,
            step_out_budget: DEFAULT_STEP_OUT_BUDGET,
            disasm_default_lines: 1000,
            disasm_mnemonic_width: 50,
            disasm_backward_steps: 3,
            hotspot_default_count: 64,
            hotspot_default_threshold: 250,
            memory_default_chunks_per_row: 16,
        }
    }
}

/// Execution capability: the processor's live program counter and cycle budget.
pub trait ExecutionInterface {
    /// Current program counter (logical address).
    fn pc(&self) -> u64;
    /// Cycles left in the current timeslice.
    fn cycles_remaining(&self) -> i64;
}

/// One register published by a device's state capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateEntry {
    /// Device-defined register index.
    pub index: usize,
    /// Symbol name exposed to expressions, e.g. `a` or `sp`.
    pub symbol: String,
    /// Whether expressions may assign to it.
    pub writable: bool,
}

/// State capability: register enumeration and access.
pub trait StateInterface {
    /// Registers exposed as symbols.
    fn state_entries(&self) -> Vec<StateEntry>;
    /// Reads register `index`.
    fn state_value(&self, index: usize) -> u64;
    /// Writes register `index`.
    fn set_state_value(&mut self, index: usize, value: u64);
}

/// Memory capability: space descriptions plus raw bus access for the debugger.
///
/// Addresses handed to the bus methods are byte addresses already masked and, when requested,
/// translated. Multi-byte bus accesses are always naturally aligned.
pub trait MemoryInterface {
    /// Number of space slots, including empty ones.
    fn space_count(&self) -> usize;
    /// Description of space `space`, or `None` for an empty slot.
    fn space_config(&self, space: usize) -> Option<AddressSpaceConfig>;
    /// Logical to physical translation; `None` when unmapped.
    fn translate(&mut self, _space: usize, _intent: TranslateIntent, address: u64) -> Option<u64> {
        Some(address)
    }
    /// Device-specific read handler that bypasses the bus when it returns a value.
    fn read_override(&mut self, _space: usize, _address: u64, _size: AccessSize) -> Option<u64> {
        None
    }
    /// Device-specific write handler; returns `true` when it consumed the write.
    fn write_override(
        &mut self,
        _space: usize,
        _address: u64,
        _size: AccessSize,
        _value: u64,
    ) -> bool {
        false
    }
    /// Device-specific opcode fetch handler.
    fn read_opcode_override(
        &mut self,
        _space: usize,
        _address: u64,
        _size: AccessSize,
    ) -> Option<u64> {
        None
    }
    /// Aligned bus read.
    fn read(&mut self, space: usize, address: u64, size: AccessSize) -> u64;
    /// Aligned bus write.
    fn write(&mut self, space: usize, address: u64, size: AccessSize, value: u64);
    /// Bus-width word containing `address` from the opcode (`decrypted`) or argument view;
    /// `None` when nothing is mapped there.
    fn opcode_word(&mut self, space: usize, address: u64, decrypted: bool) -> Option<u64>;
    /// Token that changes whenever the opcode base pointers change (banking, decryption).
    fn opcode_base_token(&self, _space: usize) -> u64 {
        0
    }
    /// Marks the following bus traffic as debugger peeks.
    fn set_debugger_access(&mut self, _space: usize, _active: bool) {}
    /// Tells the bus whether read/write hooks must be delivered for this space.
    fn set_watch_enables(&mut self, _space: usize, _read: bool, _write: bool) {}
    /// Whether unmapped accesses are logged.
    fn log_unmapped(&self, _space: usize) -> bool {
        false
    }
    /// Enables or disables unmapped-access logging.
    fn set_log_unmapped(&mut self, _space: usize, _enabled: bool) {}
}

/// Disassembly capability.
pub trait DisasmInterface {
    /// Shortest instruction in bytes.
    fn min_opcode_bytes(&self) -> u32;
    /// Longest instruction in bytes.
    fn max_opcode_bytes(&self) -> u32;
    /// Disassembles one instruction from the opcode and argument byte windows.
    fn disassemble(&mut self, pc: u64, opcodes: &[u8], arguments: &[u8]) -> Disassembly;
}

/// A device as seen by the debugger: identity plus optional capabilities.
pub trait DebugDevice {
    /// Instance tag, e.g. `maincpu`.
    fn tag(&self) -> &str;
    /// Device type name, e.g. `Z80`.
    fn name(&self) -> &str;
    /// Execution capability, if this device runs code.
    fn execution(&mut self) -> Option<&mut dyn ExecutionInterface> {
        None
    }
    /// Memory capability, if this device owns address spaces.
    fn memory(&mut self) -> Option<&mut dyn MemoryInterface> {
        None
    }
    /// State capability, if this device exposes registers.
    fn state(&mut self) -> Option<&mut dyn StateInterface> {
        None
    }
    /// Disassembly capability.
    fn disassembly(&mut self) -> Option<&mut dyn DisasmInterface> {
        None
    }
}

/// Classification of a flat memory blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// A named ROM/RAM region.
    Region,
    /// A raw host array shared with a driver.
    SharedBlock,
}

/// Description of a flat memory blob independent of any processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobInfo {
    /// Blob name.
    pub name: String,
    /// Region or shared block.
    pub kind: BlobKind,
    /// Storage word width in bytes.
    pub width: u8,
    /// Storage word byte order.
    pub endianness: Endianness,
}

/// Machine-level services the debugger consumes.
pub trait Machine {
    /// Number of devices.
    fn device_count(&self) -> usize;
    /// Device `index`.
    fn device(&mut self, index: usize) -> Option<&mut dyn DebugDevice>;
    /// Regions and shared blocks, indexed by position.
    fn blobs(&self) -> Vec<BlobInfo>;
    /// Backing storage of blob `index`, stored as little-endian host words.
    fn blob_data(&mut self, index: usize) -> Option<&mut [u8]>;
    /// Emulated virtual time.
    fn machine_time(&self) -> Duration;
    /// A save, load, or exit is waiting on the scheduler.
    fn scheduled_event_pending(&self) -> bool {
        false
    }
    /// Mutes or unmutes audio output while stopped.
    fn set_sound_muted(&mut self, _muted: bool) {}
    /// Consumes a pending user break request.
    fn break_requested(&mut self) -> bool {
        false
    }
}

/// The command console and its blocking interaction primitive.
pub trait Console {
    /// Executes one console command; actions of breakpoints, watchpoints, and traces come here.
    fn execute_command(&mut self, session: &mut DebugSession, command: &str, echo: bool);
    /// Prints one line to the console output.
    fn print(&mut self, text: &str);
    /// Blocks until the user has interacted with the debugger at least once.
    fn wait_for_debugger(&mut self, session: &mut DebugSession, first_stop: bool);
}

/// Parser half of the external expression evaluator.
pub trait ExpressionParser {
    /// Parses `text` against the symbols visible in `scope`.
    ///
    /// # Errors
    ///
    /// Returns the evaluator's error code when `text` is malformed or names unknown symbols.
    fn parse_expression(
        &mut self,
        text: &str,
        scope: &SymbolScope<'_>,
    ) -> Result<Box<dyn Expression>, ExpressionError>;
}

/// Everything the debugger needs from its host.
pub trait DebugHost: Machine + Console + ExpressionParser {}

impl<T: Machine + Console + ExpressionParser + ?Sized> DebugHost for T {}

/// Destination for tracer output.
pub trait TraceSink {
    /// Appends `text` verbatim.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures from the underlying writer.
    fn write_text(&mut self, text: &str) -> io::Result<()>;
    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures from the underlying writer.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Trace sink over any [`io::Write`], typically a buffered file.
#[derive(Debug)]
pub struct WriterSink<W: io::Write> {
    writer: W,
}

impl<W: io::Write> WriterSink<W> {
    /// Wraps `writer`.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwraps the writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> TraceSink for WriterSink<W> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// In-memory trace sink whose clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedTraceBuffer {
    text: Rc<RefCell<String>>,
}

impl SharedTraceBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.text.borrow().clone()
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.text.borrow().lines().map(str::to_string).collect()
    }
}

impl TraceSink for SharedTraceBuffer {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.text.borrow_mut().push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DebugConfig, SharedTraceBuffer, TraceSink, WriterSink, DEFAULT_VIEW_REFRESH_INTERVAL};

    #[test]
    fn default_config_matches_documented_values() {
        let config = DebugConfig::default();
        assert!(config.start_stopped);
        assert_eq!(config.view_refresh_interval, DEFAULT_VIEW_REFRESH_INTERVAL);
        assert_eq!(config.step_out_budget, 100);
        assert_eq!(config.disasm_default_lines, 1000);
        assert_eq!(config.disasm_backward_steps, 3);
    }

    #[test]
    fn shared_trace_buffer_clones_see_the_same_text() {
        let buffer = SharedTraceBuffer::new();
        let mut writer = buffer.clone();
        writer.write_text("0100: nop\n").unwrap();
        writer.write_text("0102: nop\n").unwrap();
        assert_eq!(buffer.lines(), vec!["0100: nop", "0102: nop"]);
    }

    #[test]
    fn writer_sink_forwards_bytes() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write_text("abc").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.into_inner(), b"abc");
    }
}
