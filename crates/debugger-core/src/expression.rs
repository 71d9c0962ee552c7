//! Bridge between the debugger and the external expression evaluator.
//!
//! The evaluator itself is a black box supplied by the host through
//! [`ExpressionParser`](crate::api::ExpressionParser). Parsed expressions call back into an
//! [`ExpressionContext`] for symbol values and memory; the debugger's
//! [`DebugContext`](crate::context::DebugContext) is that context.

use crate::context::DebugContext;
use crate::error::ExpressionError;

/// Address space selector used by memory references inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionSpace {
    /// Logical (translated) access to space `n` of the named or current device.
    Logical(usize),
    /// Physical access to space `n`.
    Physical(usize),
    /// Decrypted opcode fetch from the program space.
    Opcode,
    /// Raw argument fetch from the program space.
    RamWrite,
    /// Flat named region; requires a name.
    Region,
}

/// Callbacks a parsed expression uses while executing.
pub trait ExpressionContext {
    /// Current value of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::UnknownSymbol`] when the name does not resolve.
    fn symbol_value(&mut self, name: &str) -> Result<u64, ExpressionError>;

    /// Assigns `value` to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::UnknownSymbol`] or [`ExpressionError::NotLvalue`].
    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), ExpressionError>;

    /// Reads `size` bytes; unmapped or unresolved locations read as all ones.
    fn read_memory(
        &mut self,
        name: Option<&str>,
        space: ExpressionSpace,
        address: u64,
        size: u8,
    ) -> u64;

    /// Writes `size` bytes; unmapped or unresolved locations are ignored.
    fn write_memory(
        &mut self,
        name: Option<&str>,
        space: ExpressionSpace,
        address: u64,
        size: u8,
        value: u64,
    );

    /// Checks that a memory reference can be resolved, without touching memory.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::SpaceUnavailable`], [`ExpressionError::InvalidMemoryName`], or
    /// [`ExpressionError::MissingMemoryName`].
    fn validate_memory(
        &mut self,
        name: Option<&str>,
        space: ExpressionSpace,
    ) -> Result<(), ExpressionError>;
}

/// A parsed expression owned by its user; dropping it frees it.
pub trait Expression {
    /// The text it was parsed from.
    fn original_text(&self) -> &str;

    /// Evaluates against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the evaluator's error code on failure.
    fn execute(&self, ctx: &mut dyn ExpressionContext) -> Result<u64, ExpressionError>;
}

impl std::fmt::Debug for dyn Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Expression").field(&self.original_text()).finish()
    }
}

/// A lazily re-parsed and re-evaluated expression, used for a view's home address.
#[derive(Debug)]
pub struct ExpressionBinding {
    text: String,
    parsed: Option<Box<dyn Expression>>,
    result: u64,
    dirty: bool,
    context_cpu: Option<usize>,
}

impl ExpressionBinding {
    /// Binding for `text`, parsed on first recompute.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            parsed: None,
            result: 0,
            dirty: true,
            context_cpu: None,
        }
    }

    /// Current text; reverts to the last good text when a new one fails to parse.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Last evaluated value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.result
    }

    /// Whether the next recompute must re-parse.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Processor whose symbol table scopes evaluation.
    #[must_use]
    pub const fn context_cpu(&self) -> Option<usize> {
        self.context_cpu
    }

    /// Replaces the text.
    pub fn set_text(&mut self, text: &str) {
        if self.text != text {
            text.clone_into(&mut self.text);
            self.dirty = true;
        }
    }

    /// Changes the evaluation scope.
    pub fn set_context(&mut self, cpu: Option<usize>) {
        if self.context_cpu != cpu {
            self.context_cpu = cpu;
            self.dirty = true;
        }
    }

    /// Forces a re-parse on the next recompute.
    pub const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Re-parses if dirty, then re-evaluates. Returns `true` when the value or text changed.
    pub fn recompute(&mut self, ctx: &mut DebugContext<'_>) -> bool {
        let mut changed = self.dirty;
        if self.dirty {
            match ctx.parse_expression(&self.text, self.context_cpu) {
                Ok(expression) => self.parsed = Some(expression),
                Err(err) => {
                    log::debug!("expression '{}' rejected: {err}", self.text);
                    if let Some(previous) = &self.parsed {
                        self.text = previous.original_text().to_string();
                    }
                }
            }
        }
        if let Some(expression) = &self.parsed {
            let mut scoped = ctx.scoped(self.context_cpu);
            if let Ok(value) = expression.execute(&mut scoped) {
                if value != self.result {
                    self.result = value;
                    changed = true;
                }
            }
        }
        self.dirty = false;
        changed
    }
}
