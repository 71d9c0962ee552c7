//! Error taxonomy for debugger operations and the expression bridge.

use thiserror::Error;

use crate::view::ViewKind;

/// Error codes surfaced by the external expression evaluator and the symbol bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ExpressionError {
    /// Text could not be parsed.
    #[error("syntax error")]
    Syntax,
    /// A symbol name did not resolve in the evaluation scope.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    /// Attempted to assign to a read-only symbol.
    #[error("symbol '{0}' is not an lvalue")]
    NotLvalue(String),
    /// Division or modulo by zero during evaluation.
    #[error("divide by zero")]
    DivideByZero,
    /// The requested memory space does not exist on the addressed device.
    #[error("memory space unavailable")]
    SpaceUnavailable,
    /// A device or region name did not resolve.
    #[error("invalid memory name '{0}'")]
    InvalidMemoryName(String),
    /// A region access was requested without a region name.
    #[error("missing memory name")]
    MissingMemoryName,
    /// A memory access size outside {1,2,4,8}.
    #[error("invalid memory size {0}")]
    InvalidMemorySize(u8),
}

/// Failures reported by debugger session, tracer, and view operations.
#[derive(Debug, Error)]
pub enum DebugError {
    /// A view was requested but no source of that kind exists.
    #[error("no sources available for {0:?} view")]
    NoSources(ViewKind),
    /// Memory view chunk sizes are limited to 1, 2, 4, or 8 bytes.
    #[error("unsupported chunk size {0}")]
    UnsupportedChunkSize(u8),
    /// Accessor sizes are limited to 1, 2, 4, or 8 bytes.
    #[error("unsupported access size {0}")]
    UnsupportedAccessSize(u8),
    /// The addressed device does not expose the requested space.
    #[error("no such address space")]
    NoSuchSpace,
    /// The device index is out of range.
    #[error("no such device {0}")]
    NoSuchDevice(usize),
    /// Trace or script file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A guard or view expression failed to parse.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}
