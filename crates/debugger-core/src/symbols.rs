//! Named-value registries exposed to the expression evaluator.
//!
//! A [`SymbolTable`] maps names to [`SymbolBinding`]s. Bindings describe where a value lives;
//! they are resolved against the live machine by the debug context, never cached. Each
//! processor owns a table that is chained to the session-global one through a
//! [`SymbolScope`].

use std::collections::BTreeMap;

use crate::memory::SpaceRef;

/// Number of numbered scratch variables (`temp0`..`temp9`).
pub const SCRATCH_VARIABLE_COUNT: usize = 10;

/// Where a symbol's value comes from and whether it can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolBinding {
    /// Fixed value.
    Constant(u64),
    /// Byte address of the last watchpoint hit.
    WatchpointAddress,
    /// Value stored by the last write watchpoint hit.
    WatchpointData,
    /// Index of the visible processor.
    CpuNumber,
    /// Scratch variable `tempN`.
    Scratch(usize),
    /// Device register published by its state capability.
    Register {
        /// Owning device.
        device: usize,
        /// Device-defined register index.
        index: usize,
        /// Whether assignments are forwarded to the device.
        writable: bool,
    },
    /// Live program counter.
    ProgramCounter {
        /// Owning device.
        device: usize,
    },
    /// Cycles left in the device's timeslice.
    CyclesRemaining {
        /// Owning device.
        device: usize,
    },
    /// Unmapped-access logging toggle of one space.
    LogUnmapped(SpaceRef),
}

impl SymbolBinding {
    /// Whether an expression may assign to this binding.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        match self {
            Self::Scratch(_) | Self::LogUnmapped(_) => true,
            Self::Register { writable, .. } => *writable,
            Self::Constant(_)
            | Self::WatchpointAddress
            | Self::WatchpointData
            | Self::CpuNumber
            | Self::ProgramCounter { .. }
            | Self::CyclesRemaining { .. } => false,
        }
    }
}

/// Case-insensitive name to binding map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: BTreeMap<String, SymbolBinding>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session-global table: watchpoint results, processor number, and scratch variables.
    #[must_use]
    pub fn global() -> Self {
        let mut table = Self::new();
        table.add("wpaddr", SymbolBinding::WatchpointAddress);
        table.add("wpdata", SymbolBinding::WatchpointData);
        table.add("cpunum", SymbolBinding::CpuNumber);
        for index in 0..SCRATCH_VARIABLE_COUNT {
            table.add(&format!("temp{index}"), SymbolBinding::Scratch(index));
        }
        table
    }

    /// Adds or replaces `name`.
    pub fn add(&mut self, name: &str, binding: SymbolBinding) {
        self.symbols.insert(name.to_ascii_lowercase(), binding);
    }

    /// Removes `name`, returning whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.symbols.remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Looks up `name` in this table only.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SymbolBinding> {
        self.symbols.get(&name.to_ascii_lowercase()).copied()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolBinding)> + '_ {
        self.symbols.iter().map(|(name, binding)| (name.as_str(), *binding))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// A processor table chained in front of the global table.
#[derive(Debug, Clone, Copy)]
pub struct SymbolScope<'a> {
    local: Option<&'a SymbolTable>,
    global: &'a SymbolTable,
}

impl<'a> SymbolScope<'a> {
    /// Scope with an optional processor table in front of `global`.
    #[must_use]
    pub const fn new(local: Option<&'a SymbolTable>, global: &'a SymbolTable) -> Self {
        Self { local, global }
    }

    /// Resolves `name`, preferring the processor table.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SymbolBinding> {
        self.local
            .and_then(|table| table.get(name))
            .or_else(|| self.global.get(name))
    }

    /// Returns `true` when `name` resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}
