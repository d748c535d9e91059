mod bridge;
mod error;
mod host;
mod memory;
mod ops;
mod printf;
mod registers;
mod vm;
pub mod bytecode;
pub mod verifier;

pub use error::{LoadError, Trap};
pub use host::{Host, StdHost};
pub use memory::{Address, MAX_REGION_BYTES, Memory, WORD_BYTES};
pub use ops::Op;
pub use registers::Registers;
pub use vm::{ControlFlow, VM};

/// The machine word: every register, stack slot and instruction cell.
pub type Word = isize;

/// A loaded program: the instruction stream, the initial static data and
/// the index of the first instruction to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub text: Vec<Word>,
    pub data: Vec<u8>,
    pub entry: usize,
}
