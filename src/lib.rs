//! yvm - A minimal register-based virtual machine
//!
//! This library provides the yvm execution engine, its assembler and
//! disassembler, the binary image format and the host call bridge.

pub mod asm;
pub mod config;
pub mod package;
pub mod runner;
pub mod vm;

// Re-export commonly used types
pub use asm::{AsmError, assemble};
pub use config::RuntimeConfig;
pub use vm::{Host, Op, Program, StdHost, Trap, VM, Word};
