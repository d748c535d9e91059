use std::fmt;

use super::Word;

/// The register file.
///
/// `pc` is an instruction index into the text region. `sp` and `bp` hold
/// encoded stack addresses. `ax` is the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub pc: Word,
    pub sp: Word,
    pub bp: Word,
    pub ax: Word,
}

impl Registers {
    /// Registers for a fresh run: both stack registers at the top of the
    /// stack, accumulator cleared.
    pub fn new(entry: Word, stack_top: Word) -> Self {
        Self {
            pc: entry,
            sp: stack_top,
            bp: stack_top,
            ax: 0,
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pc={} sp={:#x} bp={:#x} ax={}",
            self.pc, self.sp, self.bp, self.ax
        )
    }
}
