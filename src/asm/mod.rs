//! Assembler for `.yasm` listings.
//!
//! Two passes over the parsed statements: the first lays out both sections
//! and records label positions, the second emits words and bytes with every
//! label resolved. Text labels resolve to instruction indices; data labels
//! resolve to encoded data addresses, so `IMM msg` loads a pointer the
//! engine can dereference directly.

pub mod dump;
pub mod lexer;
pub mod parser;

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::vm::{Address, MAX_REGION_BYTES, Op, Program, WORD_BYTES, Word};
use lexer::{Lexer, Span};
use parser::{Operand, Parser, Section, Statement, StatementKind};

pub use dump::{Disassembler, format_program};

/// Label used as the entry point when no `.entry` directive is given.
pub const DEFAULT_ENTRY: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}:{}: {}", .span.line, .span.column, .message)]
pub struct AsmError {
    pub message: String,
    pub span: Span,
}

impl AsmError {
    pub fn new(message: &str, span: Span) -> Self {
        Self {
            message: message.to_string(),
            span,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    section: Section,
    position: usize,
}

/// Assemble a listing into a loadable program.
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    let tokens = Lexer::new(source).scan_tokens()?;
    let statements = Parser::new(tokens).parse()?;
    let symbols = layout(&statements)?;
    emit(&statements, &symbols)
}

/// First pass: assign every label its section and position.
fn layout(statements: &[Statement]) -> Result<HashMap<String, Symbol>, AsmError> {
    let mut symbols = HashMap::new();
    let mut section = Section::Text;
    let mut text_len = 0;
    let mut data_len = 0;

    for stmt in statements {
        match &stmt.kind {
            StatementKind::Label(name) => {
                let position = match section {
                    Section::Text => text_len,
                    Section::Data => data_len,
                };
                if symbols
                    .insert(name.clone(), Symbol { section, position })
                    .is_some()
                {
                    return Err(AsmError::new(&format!("duplicate label '{}'", name), stmt.span));
                }
            }
            StatementKind::Section(s) => section = *s,
            StatementKind::Entry(_) => {}
            StatementKind::Instruction { op, .. } => {
                require_section(section, Section::Text, stmt)?;
                text_len += op.width();
            }
            StatementKind::Bytes(bytes) => {
                require_section(section, Section::Data, stmt)?;
                data_len = grow_data(data_len, bytes.len(), stmt)?;
            }
            StatementKind::Words(words) => {
                require_section(section, Section::Data, stmt)?;
                data_len = grow_data(data_len, words.len() * WORD_BYTES, stmt)?;
            }
            StatementKind::Zero(n) => {
                require_section(section, Section::Data, stmt)?;
                data_len = grow_data(data_len, *n, stmt)?;
            }
            StatementKind::Align(n) => {
                require_section(section, Section::Data, stmt)?;
                let aligned = data_len
                    .checked_next_multiple_of(*n)
                    .filter(|&len| *n <= MAX_REGION_BYTES && len <= MAX_REGION_BYTES)
                    .ok_or_else(|| data_too_large(stmt))?;
                data_len = aligned;
            }
        }
    }

    Ok(symbols)
}

/// Second pass: emit text and data with labels resolved.
fn emit(statements: &[Statement], symbols: &HashMap<String, Symbol>) -> Result<Program, AsmError> {
    let mut text = Vec::new();
    let mut data = Vec::new();
    let mut entry = None;

    for stmt in statements {
        match &stmt.kind {
            StatementKind::Label(_) | StatementKind::Section(_) => {}
            StatementKind::Entry(name) => {
                let symbol = lookup(symbols, name, stmt.span)?;
                if symbol.section != Section::Text {
                    return Err(AsmError::new(
                        &format!("entry label '{}' is not in .text", name),
                        stmt.span,
                    ));
                }
                entry = Some(symbol.position);
            }
            StatementKind::Instruction { op, operand } => {
                text.push(op.to_word());
                if let Some(operand) = operand {
                    text.push(resolve(symbols, operand, stmt.span)?);
                }
            }
            StatementKind::Bytes(bytes) => data.extend_from_slice(bytes),
            StatementKind::Words(words) => {
                for word in words {
                    let value = resolve(symbols, word, stmt.span)?;
                    data.extend_from_slice(&value.to_le_bytes());
                }
            }
            StatementKind::Zero(n) => data.resize(data.len() + n, 0),
            StatementKind::Align(n) => data.resize(data.len().next_multiple_of(*n), 0),
        }
    }

    let entry = match entry {
        Some(entry) => entry,
        None => match symbols.get(DEFAULT_ENTRY) {
            Some(symbol) if symbol.section == Section::Text => symbol.position,
            _ => 0,
        },
    };

    debug!(
        text_words = text.len(),
        data_bytes = data.len(),
        labels = symbols.len(),
        entry,
        "assembled"
    );
    Ok(Program { text, data, entry })
}

fn require_section(current: Section, wanted: Section, stmt: &Statement) -> Result<(), AsmError> {
    if current == wanted {
        return Ok(());
    }
    let what = match &stmt.kind {
        StatementKind::Instruction { op, .. } => format!("instruction {}", op),
        _ => "data directive".to_string(),
    };
    let section = match wanted {
        Section::Text => ".text",
        Section::Data => ".data",
    };
    Err(AsmError::new(&format!("{} outside {}", what, section), stmt.span))
}

/// Data length after `extra` more bytes, within what the loader accepts.
fn grow_data(len: usize, extra: usize, stmt: &Statement) -> Result<usize, AsmError> {
    len.checked_add(extra)
        .filter(|&len| len <= MAX_REGION_BYTES)
        .ok_or_else(|| data_too_large(stmt))
}

fn data_too_large(stmt: &Statement) -> AsmError {
    AsmError::new(
        &format!("data section exceeds {} bytes", MAX_REGION_BYTES),
        stmt.span,
    )
}

fn lookup(symbols: &HashMap<String, Symbol>, name: &str, span: Span) -> Result<Symbol, AsmError> {
    symbols
        .get(name)
        .copied()
        .ok_or_else(|| AsmError::new(&format!("undefined label '{}'", name), span))
}

fn resolve(symbols: &HashMap<String, Symbol>, operand: &Operand, span: Span) -> Result<Word, AsmError> {
    match operand {
        Operand::Int(value) => Ok(*value),
        Operand::Label { name, offset } => {
            let symbol = lookup(symbols, name, span)?;
            let base = match symbol.section {
                Section::Text => symbol.position as Word,
                Section::Data => Address::Data(symbol.position).encode(),
            };
            Ok(base.wrapping_add(*offset))
        }
    }
}
