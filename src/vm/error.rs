//! Faults raised by the execution engine.

use thiserror::Error;

use super::Word;

/// A condition that halts the dispatch loop.
///
/// `UnknownInstruction` is the engine-detected fault and always maps to
/// status -1. Every other variant is a VM trap for an operation that has no
/// defined result (bad memory access, division by zero, stack exhaustion).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("unknown instruction: {word} at pc={pc}")]
    UnknownInstruction { pc: usize, word: Word },

    #[error("division by zero at pc={pc}")]
    DivisionByZero { pc: usize },

    #[error("invalid memory access at pc={pc}: address {address:#x} ({len} bytes)")]
    InvalidAddress { pc: usize, address: Word, len: usize },

    #[error("stack overflow at pc={pc}")]
    StackOverflow { pc: usize },

    #[error("stack underflow at pc={pc}")]
    StackUnderflow { pc: usize },

    #[error("program counter out of range: {target}")]
    PcOutOfBounds { target: Word },

    #[error("PRTF at pc={pc} is not followed by ADJ")]
    MissingArgumentCount { pc: usize },

    #[error("cycle limit of {limit} exceeded")]
    CycleLimit { limit: u64 },
}

impl Trap {
    /// The integer status the engine reports for this fault.
    pub fn status(&self) -> Word {
        match self {
            Trap::UnknownInstruction { .. } => -1,
            Trap::DivisionByZero { .. } => -2,
            Trap::InvalidAddress { .. } => -3,
            Trap::StackOverflow { .. } => -4,
            Trap::StackUnderflow { .. } => -5,
            Trap::PcOutOfBounds { .. } => -6,
            Trap::MissingArgumentCount { .. } => -7,
            Trap::CycleLimit { .. } => -8,
        }
    }
}

/// Errors raised while placing a program into a fresh memory image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("program has {len} words but the text region holds {capacity}")]
    TextTooLarge { len: usize, capacity: usize },

    #[error("program has {len} data bytes but the data region holds {capacity}")]
    DataTooLarge { len: usize, capacity: usize },

    #[error("entry point {entry} is outside the program ({len} words)")]
    EntryOutOfRange { entry: usize, len: usize },

    #[error("{region} region of {bytes} bytes exceeds the {limit} byte limit", limit = super::MAX_REGION_BYTES)]
    RegionTooLarge { region: &'static str, bytes: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_are_distinct() {
        let traps = [
            Trap::UnknownInstruction { pc: 0, word: 99 },
            Trap::DivisionByZero { pc: 0 },
            Trap::InvalidAddress { pc: 0, address: 0, len: 1 },
            Trap::StackOverflow { pc: 0 },
            Trap::StackUnderflow { pc: 0 },
            Trap::PcOutOfBounds { target: -1 },
            Trap::MissingArgumentCount { pc: 0 },
            Trap::CycleLimit { limit: 1 },
        ];
        let mut statuses: Vec<Word> = traps.iter().map(Trap::status).collect();
        statuses.sort();
        statuses.dedup();
        assert_eq!(statuses.len(), traps.len());
        assert_eq!(traps[0].status(), -1);
    }

    #[test]
    fn test_unknown_instruction_message() {
        let trap = Trap::UnknownInstruction { pc: 3, word: 99 };
        assert_eq!(trap.to_string(), "unknown instruction: 99 at pc=3");
    }
}
