//! Interactive debugger core for multi-processor machine emulation.

/// Host-facing contracts: machine, devices, console, and runtime configuration.
pub mod api;
pub use api::{
    BlobInfo, BlobKind, Console, DebugConfig, DebugDevice, DebugHost, DisasmInterface,
    ExecutionInterface, ExpressionParser, Machine, MemoryInterface, SharedTraceBuffer, StateEntry,
    StateInterface, TraceSink, WriterSink, DEFAULT_STEP_OUT_BUDGET, DEFAULT_VIEW_REFRESH_INTERVAL,
};

/// Error taxonomy for the session and the expression bridge.
pub mod error;
pub use error::{DebugError, ExpressionError};

/// Address-space geometry and the side-effect-free memory accessors.
pub mod memory;
pub use memory::{
    AccessSize, AddressSpaceConfig, AddressSpaceInfo, BlobAccessor, Endianness, SpaceAccessor,
    SpaceRef, TranslateIntent, DATA_SPACE, IO_SPACE, PROGRAM_SPACE,
};

/// Disassembler result model.
pub mod disasm;
pub use disasm::{Disassembly, InstructionFlow};

/// Symbol tables and name resolution.
pub mod symbols;
pub use symbols::{SymbolBinding, SymbolScope, SymbolTable, SCRATCH_VARIABLE_COUNT};

/// Expression bridge to the external evaluator.
pub mod expression;
pub use expression::{Expression, ExpressionBinding, ExpressionContext, ExpressionSpace};

/// Breakpoints and watchpoints.
pub mod points;
pub use points::{AccessKind, Breakpoint, WatchKind, Watchpoint};

/// Memory read hotspot tracking.
pub mod hotspot;
pub use hotspot::{HotspotEntry, HotspotTracker};

/// Per-processor execution tracing.
pub mod trace;
pub use trace::{Tracer, TRACE_LOOP_WINDOW};

/// Per-instruction comments keyed by opcode checksum.
pub mod comments;
pub use comments::{opcode_checksum, CommentStore};

/// Global execution state shared by every processor.
pub mod state;
pub use state::{ExecutionState, GlobalDebugState};

/// Per-processor debug controller.
pub mod controller;
pub use controller::{DebugController, InstructionHook, StepMode, StopConditions, HISTORY_SIZE};

/// Borrowed host, state, and controllers for one operation.
pub mod context;
pub use context::DebugContext;

/// Debugger session: hooks, wait loop, and commands.
pub mod session;
pub use session::DebugSession;

/// View framework with disassembly and memory views.
pub mod view;
pub use view::{
    DebugView, DisassemblyView, MemoryCursor, MemoryTarget, MemoryView, RightColumn, ViewBehavior,
    ViewChange, ViewChar, ViewCore, ViewId, ViewKey, ViewKind, ViewManager, ViewSlot, ViewSource,
    ViewXY,
};

/// In-memory host fixtures for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
use debugger_core as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
