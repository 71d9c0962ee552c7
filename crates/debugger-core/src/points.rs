//! Breakpoints and watchpoints with optional guard expressions and action commands.

use std::fmt;

use crate::expression::{Expression, ExpressionContext};
use crate::memory::SpaceRef;

/// Evaluates an optional guard. A missing guard passes; an erroring guard fails.
fn guard_passes(condition: Option<&dyn Expression>, ctx: &mut dyn ExpressionContext) -> bool {
    condition.is_none_or(|expression| {
        matches!(expression.execute(ctx), Ok(value) if value != 0)
    })
}

/// A stop condition keyed to a program-counter value.
pub struct Breakpoint {
    index: u32,
    address: u64,
    enabled: bool,
    condition: Option<Box<dyn Expression>>,
    action: Option<String>,
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("index", &self.index)
            .field("address", &format_args!("{:X}", self.address))
            .field("enabled", &self.enabled)
            .field("condition", &self.condition_text())
            .field("action", &self.action)
            .finish()
    }
}

impl Breakpoint {
    /// Enabled breakpoint at `address`.
    #[must_use]
    pub const fn new(
        index: u32,
        address: u64,
        condition: Option<Box<dyn Expression>>,
        action: Option<String>,
    ) -> Self {
        Self {
            index,
            address,
            enabled: true,
            condition,
            action,
        }
    }

    /// Session-unique index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Program-counter value that triggers it.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Whether it participates in hit tests.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Source text of the guard.
    #[must_use]
    pub fn condition_text(&self) -> Option<&str> {
        self.condition.as_deref().map(Expression::original_text)
    }

    /// Console command run on a hit.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub(crate) const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns `true` when enabled, at `pc`, and the guard is absent or non-zero.
    pub fn hit(&self, pc: u64, ctx: &mut dyn ExpressionContext) -> bool {
        self.enabled && self.address == pc && guard_passes(self.condition.as_deref(), ctx)
    }
}

/// A single memory access direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Bus read.
    Read,
    /// Bus write.
    Write,
}

/// Access directions a watchpoint reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum WatchKind {
    /// Reads only.
    Read,
    /// Writes only.
    Write,
    /// Reads and writes.
    ReadWrite,
}

impl WatchKind {
    /// Returns `true` when `access` is in the mask.
    #[must_use]
    pub const fn covers(self, access: AccessKind) -> bool {
        matches!(
            (self, access),
            (Self::ReadWrite, _) | (Self::Read, AccessKind::Read) | (Self::Write, AccessKind::Write)
        )
    }

    /// Console label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read/write",
        }
    }
}

/// A stop condition keyed to a byte range of one address space and an access type.
pub struct Watchpoint {
    index: u32,
    space: SpaceRef,
    kind: WatchKind,
    enabled: bool,
    address: u64,
    length: u64,
    condition: Option<Box<dyn Expression>>,
    action: Option<String>,
}

impl fmt::Debug for Watchpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchpoint")
            .field("index", &self.index)
            .field("space", &self.space)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("address", &format_args!("{:X}", self.address))
            .field("length", &self.length)
            .field("condition", &self.condition_text())
            .field("action", &self.action)
            .finish()
    }
}

impl Watchpoint {
    /// Enabled watchpoint over `[address, address + length)`, both in bytes.
    #[must_use]
    pub const fn new(
        index: u32,
        space: SpaceRef,
        kind: WatchKind,
        address: u64,
        length: u64,
        condition: Option<Box<dyn Expression>>,
        action: Option<String>,
    ) -> Self {
        Self {
            index,
            space,
            kind,
            enabled: true,
            address,
            length,
            condition,
            action,
        }
    }

    /// Session-unique index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Watched space.
    #[must_use]
    pub const fn space(&self) -> SpaceRef {
        self.space
    }

    /// Access directions.
    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }

    /// Whether it participates in hit tests.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// First watched byte address.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Watched length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Source text of the guard.
    #[must_use]
    pub fn condition_text(&self) -> Option<&str> {
        self.condition.as_deref().map(Expression::original_text)
    }

    /// Console command run on a hit.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub(crate) const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns `true` when `[address, address + size)` overlaps the watched range.
    #[must_use]
    pub const fn overlaps(&self, address: u64, size: u64) -> bool {
        address.saturating_add(size) > self.address
            && address < self.address.saturating_add(self.length)
    }

    /// Full hit test for an access of `size` bytes at byte address `address`.
    pub fn hit(
        &self,
        access: AccessKind,
        address: u64,
        size: u64,
        ctx: &mut dyn ExpressionContext,
    ) -> bool {
        self.enabled
            && self.kind.covers(access)
            && self.overlaps(address, size)
            && guard_passes(self.condition.as_deref(), ctx)
    }
}
