//! Static checks over an instruction stream.
//!
//! A linear sweep decodes the text from index 0 and checks:
//! - Every opcode word is known and its operand is present
//! - Branch targets land on an instruction boundary (or exactly at the end)
//! - The entry point is an instruction boundary
//! - PRTF is immediately followed by an `ADJ n` with n >= 1
//! - ENT and ADJ operands are not negative
//!
//! Passing the verifier does not make a program safe to run; the engine
//! still checks every memory access and stack move.

use std::collections::HashSet;

use thiserror::Error;

use super::ops::Op;
use super::{Program, Word};

/// Verification error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("unknown opcode {word} at pc={pc}")]
    UnknownOpcode { pc: usize, word: Word },

    #[error("{op} at pc={pc} is missing its operand")]
    MissingOperand { pc: usize, op: Op },

    #[error("invalid jump target at pc={pc}: {target} is not an instruction")]
    InvalidJumpTarget { pc: usize, target: Word },

    #[error("entry point {entry} is not an instruction")]
    InvalidEntry { entry: usize },

    #[error("PRTF at pc={pc} must be followed by ADJ with a positive count")]
    PrintfWithoutCount { pc: usize },

    #[error("{op} at pc={pc} has negative operand {operand}")]
    NegativeOperand { pc: usize, op: Op, operand: Word },
}

/// A decoded instruction with its position in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub pc: usize,
    pub op: Op,
    pub operand: Option<Word>,
}

/// Decode `text` front to back.
///
/// Stops at the first word that is not an opcode or at an operand-bearing
/// opcode whose operand runs past the end.
pub fn decode(text: &[Word]) -> Result<Vec<Instruction>, VerifyError> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < text.len() {
        let word = text[pc];
        let op = Op::from_word(word).ok_or(VerifyError::UnknownOpcode { pc, word })?;
        let operand = if op.has_operand() {
            Some(*text.get(pc + 1).ok_or(VerifyError::MissingOperand { pc, op })?)
        } else {
            None
        };
        out.push(Instruction { pc, op, operand });
        pc += op.width();
    }
    Ok(out)
}

/// Bytecode verifier
#[derive(Debug, Default)]
pub struct Verifier {}

impl Verifier {
    pub fn new() -> Self {
        Self {}
    }

    /// Verify a program, stopping at the first problem.
    pub fn verify(&self, program: &Program) -> Result<(), VerifyError> {
        match self.verify_all(program).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collect every problem found in the program, in stream order.
    pub fn verify_all(&self, program: &Program) -> Vec<VerifyError> {
        let instructions = match decode(&program.text) {
            Ok(instructions) => instructions,
            Err(err) => return vec![err],
        };

        let end = program.text.len();
        let mut boundaries: HashSet<usize> = instructions.iter().map(|i| i.pc).collect();
        boundaries.insert(end);

        let mut errors = Vec::new();
        if !boundaries.contains(&program.entry) {
            errors.push(VerifyError::InvalidEntry {
                entry: program.entry,
            });
        }

        for (index, inst) in instructions.iter().enumerate() {
            let pc = inst.pc;
            let operand = inst.operand.unwrap_or(0);

            if inst.op.is_branch() {
                let valid = usize::try_from(operand)
                    .map(|target| boundaries.contains(&target))
                    .unwrap_or(false);
                if !valid {
                    errors.push(VerifyError::InvalidJumpTarget { pc, target: operand });
                }
            }

            match inst.op {
                Op::Ent | Op::Adj if operand < 0 => {
                    errors.push(VerifyError::NegativeOperand {
                        pc,
                        op: inst.op,
                        operand,
                    });
                }
                Op::Prtf => {
                    let counted = matches!(
                        instructions.get(index + 1),
                        Some(Instruction {
                            op: Op::Adj,
                            operand: Some(n),
                            ..
                        }) if *n >= 1
                    );
                    if !counted {
                        errors.push(VerifyError::PrintfWithoutCount { pc });
                    }
                }
                _ => {}
            }
        }

        errors
    }
}
