//! Loading and running programs from files.
//!
//! A program file is either an assembly listing or a binary image; images
//! are recognised by their magic bytes, anything else is assembled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::asm::{self, AsmError};
use crate::config::RuntimeConfig;
use crate::vm::bytecode::{self, ImageError};
use crate::vm::verifier::{VerifyError, Verifier};
use crate::vm::{Host, LoadError, Program, Trap, VM, Word};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{source}", .path.display())]
    Asm {
        path: PathBuf,
        #[source]
        source: AsmError,
    },
    #[error("{}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("{} is neither a yvm image nor UTF-8 assembly", .0.display())]
    NotText(PathBuf),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("failed to load program: {0}")]
    Load(#[from] LoadError),
}

/// How a run ended.
#[derive(Debug)]
pub struct Outcome {
    /// Process status: the EXIT argument, 0 at end of stream, or the trap's
    /// status.
    pub status: Word,
    pub trap: Option<Trap>,
    pub stats: RunStats,
}

/// Execution counters reported by `yvm run --stats`.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub status: Word,
    pub cycles: u64,
    pub text_words: usize,
    pub data_bytes: usize,
    pub heap_bytes_used: usize,
    pub elapsed_ms: f64,
}

impl RunStats {
    pub fn to_human(&self) -> String {
        format!(
            "status: {}\ncycles: {}\ntext: {} words\ndata: {} bytes\nheap used: {} bytes\nelapsed: {:.3} ms\n",
            self.status,
            self.cycles,
            self.text_words,
            self.data_bytes,
            self.heap_bytes_used,
            self.elapsed_ms
        )
    }
}

/// Read a program from `path`, assembling it if it is not an image.
pub fn load_file(path: &Path) -> Result<Program, RunError> {
    let bytes = fs::read(path).map_err(|source| RunError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if bytecode::is_image(&bytes) {
        return bytecode::deserialize(&bytes).map_err(|source| RunError::Image {
            path: path.to_path_buf(),
            source,
        });
    }

    let source = String::from_utf8(bytes).map_err(|_| RunError::NotText(path.to_path_buf()))?;
    asm::assemble(&source).map_err(|source| RunError::Asm {
        path: path.to_path_buf(),
        source,
    })
}

/// Verify (when enabled) and execute `program` on `host`.
///
/// Traps are part of the outcome, not errors: they still produce a status.
pub fn run_program<H: Host>(
    program: &Program,
    config: &RuntimeConfig,
    host: H,
) -> Result<Outcome, RunError> {
    if config.verify {
        Verifier::new().verify(program)?;
    }

    let mut vm = VM::with_host(program, config, host)?;
    let start = Instant::now();
    let result = vm.run();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let (status, trap) = match result {
        Ok(status) => (status, None),
        Err(trap) => (trap.status(), Some(trap)),
    };
    let stats = RunStats {
        status,
        cycles: vm.cycles(),
        text_words: program.text.len(),
        data_bytes: program.data.len(),
        heap_bytes_used: vm.memory().heap_used(),
        elapsed_ms,
    };
    info!(status, cycles = stats.cycles, elapsed_ms, "run finished");

    Ok(Outcome {
        status,
        trap,
        stats,
    })
}

/// Map a VM status onto a process exit code the way a C `exit()` would:
/// only the low byte survives.
pub fn exit_code(status: Word) -> u8 {
    status as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::StdHost;
    use std::io::Write;

    fn run_source(source: &str) -> (Outcome, String) {
        let program = asm::assemble(source).unwrap();
        let mut out = Vec::new();
        let outcome = run_program(&program, &RuntimeConfig::default(), StdHost::with_output(&mut out)).unwrap();
        (outcome, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_run_hello() {
        let (outcome, stdout) = run_source(
            ".data\nmsg: .asciz \"hi %d\\n\"\n.text\nmain: IMM msg\nPUSH\nIMM 7\nPUSH\nPRTF\nADJ 2\nIMM 3\nPUSH\nEXIT\n",
        );
        assert_eq!(stdout, "hi 7\n");
        assert_eq!(outcome.status, 3);
        assert!(outcome.trap.is_none());
        assert_eq!(outcome.stats.cycles, 9);
    }

    #[test]
    fn test_trap_is_an_outcome() {
        let (outcome, _) = run_source("IMM 1\nPUSH\nIMM 0\nDIV\n");
        assert_eq!(outcome.status, -2);
        assert_eq!(outcome.trap, Some(Trap::DivisionByZero { pc: 5 }));
        assert_eq!(exit_code(outcome.status), 254);
    }

    #[test]
    fn test_verification_runs_before_execution() {
        let program = Program {
            text: vec![crate::vm::Op::Jmp.to_word(), 1],
            ..Default::default()
        };
        let host = StdHost::with_output(Vec::new());
        let err = run_program(&program, &RuntimeConfig::default(), host).unwrap_err();
        assert!(matches!(err, RunError::Verify(VerifyError::InvalidJumpTarget { .. })));

        let config = RuntimeConfig {
            verify: false,
            ..Default::default()
        };
        // Unverified, the jump lands on the operand word (IMM), whose own
        // operand would sit past the end of text.
        let outcome = run_program(&program, &config, StdHost::with_output(Vec::new())).unwrap();
        assert_eq!(outcome.trap, Some(Trap::PcOutOfBounds { target: 2 }));
        assert_eq!(outcome.status, -6);
    }

    #[test]
    fn test_load_file_detects_format() {
        let program = asm::assemble("IMM 5\nPUSH\nEXIT\n").unwrap();

        let mut listing = tempfile::NamedTempFile::new().unwrap();
        listing.write_all(b"IMM 5\nPUSH\nEXIT\n").unwrap();
        assert_eq!(load_file(listing.path()).unwrap(), program);

        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&bytecode::serialize(&program).unwrap()).unwrap();
        assert_eq!(load_file(image.path()).unwrap(), program);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"JMP nowhere\n").unwrap();
        let err = load_file(bad.path()).unwrap_err();
        assert!(err.to_string().ends_with(":1:1: undefined label 'nowhere'"));

        let mut binary = tempfile::NamedTempFile::new().unwrap();
        binary.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(load_file(binary.path()), Err(RunError::NotText(_))));
    }

    #[test]
    fn test_exit_code_truncation() {
        assert_eq!(exit_code(0), 0);
        assert_eq!(exit_code(30), 30);
        assert_eq!(exit_code(-1), 255);
        assert_eq!(exit_code(256 + 7), 7);
    }
}
