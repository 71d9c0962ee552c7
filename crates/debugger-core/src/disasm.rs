//! Disassembler result model shared by stepping, tracing, and the disassembly view.

/// Control-flow classification reported by a disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InstructionFlow {
    /// Falls through to the next instruction.
    #[default]
    Normal,
    /// Call-style: step-over treats it as atomic. `extra_skip` further instructions after it
    /// belong to the call sequence (delay slots, inline arguments decoded as instructions).
    Call {
        /// Instructions to skip past the call before arming the return target.
        extra_skip: u8,
    },
    /// Return-style: ends a step-out search.
    Return,
}

impl InstructionFlow {
    /// Returns `true` for call-style instructions.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` for return-style instructions.
    #[must_use]
    pub const fn is_return(self) -> bool {
        matches!(self, Self::Return)
    }
}

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Disassembly {
    /// Formatted mnemonic and operands.
    pub text: String,
    /// Consumed length in address units.
    pub length: u32,
    /// Whether the disassembler filled in `flow`.
    pub supported: bool,
    /// Call/return classification.
    pub flow: InstructionFlow,
}

impl Disassembly {
    /// A supported instruction of `length` address units.
    #[must_use]
    pub fn new(text: impl Into<String>, length: u32, flow: InstructionFlow) -> Self {
        Self {
            text: text.into(),
            length,
            supported: true,
            flow,
        }
    }

    /// Call-style instruction if the disassembler supports flow classification.
    #[must_use]
    pub const fn call_skip(&self) -> Option<u8> {
        match self.flow {
            InstructionFlow::Call { extra_skip } if self.supported => Some(extra_skip),
            _ => None,
        }
    }

    /// Length clamped to at least one unit, so scans always make progress.
    #[must_use]
    pub fn advance(&self) -> u64 {
        u64::from(self.length.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::{Disassembly, InstructionFlow};

    #[test]
    fn call_skip_requires_supported_flow() {
        let mut call = Disassembly::new("call 1234", 3, InstructionFlow::Call { extra_skip: 1 });
        assert_eq!(call.call_skip(), Some(1));
        call.supported = false;
        assert_eq!(call.call_skip(), None);
        assert!(InstructionFlow::Return.is_return());
        assert!(!InstructionFlow::Normal.is_call());
    }

    #[test]
    fn zero_length_still_advances() {
        let bogus = Disassembly::new("???", 0, InstructionFlow::Normal);
        assert_eq!(bogus.advance(), 1);
    }
}
