//! Disassembler for loaded programs.
//!
//! The listing is valid assembly: for any program whose text decodes
//! cleanly, assembling the output reproduces the program word for word.

use std::collections::BTreeSet;

use crate::vm::{Address, Op, Program, Word};

const BYTES_PER_LINE: usize = 16;

/// Disassembler for programs.
pub struct Disassembler<'a> {
    program: &'a Program,
    output: String,
}

impl<'a> Disassembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> &str {
        let program = self.program;
        let text = &program.text;
        let labels = self.branch_targets();

        self.output.push_str(&format!(
            "; {} words of text, {} bytes of data\n",
            text.len(),
            program.data.len()
        ));
        if program.entry != 0 {
            self.output
                .push_str(&format!(".entry {}\n", label(program.entry)));
        }

        self.output.push_str(".text\n");
        let mut pc = 0;
        while pc < text.len() {
            if labels.contains(&pc) {
                self.output.push_str(&format!("{}:\n", label(pc)));
            }
            match instruction_at(text, pc) {
                Some((op, operand)) => {
                    let (line, note) = self.format_instruction(op, operand, &labels);
                    self.output
                        .push_str(&format!("    {:<32}; {:04}{}\n", line, pc, note));
                    pc += op.width();
                }
                None => {
                    self.output
                        .push_str(&format!("    ; {:04}: invalid word {}\n", pc, text[pc]));
                    pc += 1;
                }
            }
        }
        if labels.contains(&text.len()) {
            self.output.push_str(&format!("{}:\n", label(text.len())));
        }

        if !program.data.is_empty() {
            self.output.push_str("\n.data\n");
            self.disassemble_data();
        }

        &self.output
    }

    /// Instruction indices that need a label: valid branch targets and the
    /// entry point.
    fn branch_targets(&self) -> BTreeSet<usize> {
        let text = &self.program.text;
        let mut boundaries = BTreeSet::new();
        let mut targets = Vec::new();
        let mut pc = 0;
        while pc < text.len() {
            boundaries.insert(pc);
            match instruction_at(text, pc) {
                Some((op, operand)) => {
                    if op.is_branch()
                        && let Some(target) = operand.and_then(|t| usize::try_from(t).ok())
                    {
                        targets.push(target);
                    }
                    pc += op.width();
                }
                None => pc += 1,
            }
        }
        boundaries.insert(text.len());

        targets.push(self.program.entry);
        targets
            .into_iter()
            .filter(|t| boundaries.contains(t))
            .collect()
    }

    /// Mnemonic and operand, plus a note for operands that point into data.
    fn format_instruction(
        &self,
        op: Op,
        operand: Option<Word>,
        labels: &BTreeSet<usize>,
    ) -> (String, String) {
        let Some(value) = operand else {
            return (op.mnemonic().to_string(), String::new());
        };

        if op.is_branch()
            && let Ok(target) = usize::try_from(value)
            && labels.contains(&target)
        {
            return (format!("{:<5} {}", op.mnemonic(), label(target)), String::new());
        }

        match Address::decode(value) {
            Some(Address::Data(offset)) if offset < self.program.data.len() => (
                format!("{:<5} {:#x}", op.mnemonic(), value),
                format!(" data+{}{}", offset, self.string_preview(offset)),
            ),
            _ => (format!("{:<5} {}", op.mnemonic(), value), String::new()),
        }
    }

    /// A quoted preview when the data at `offset` looks like a C string.
    fn string_preview(&self, offset: usize) -> String {
        let tail = &self.program.data[offset..];
        let Some(nul) = tail.iter().position(|&b| b == 0) else {
            return String::new();
        };
        let s = &tail[..nul];
        if s.is_empty() || !s.iter().all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()) {
            return String::new();
        }
        format!(" {:?}", String::from_utf8_lossy(s))
    }

    fn disassemble_data(&mut self) {
        for (i, chunk) in self.program.data.chunks(BYTES_PER_LINE).enumerate() {
            let bytes = chunk
                .iter()
                .map(|b| format!("{:#04x}", b))
                .collect::<Vec<_>>()
                .join(", ");
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            self.output.push_str(&format!(
                "    .byte {:<94}; {:04x} {}\n",
                bytes,
                i * BYTES_PER_LINE,
                ascii
            ));
        }
    }
}

fn label(pc: usize) -> String {
    format!("L{:04}", pc)
}

/// The instruction at `pc`, if one decodes there.
fn instruction_at(text: &[Word], pc: usize) -> Option<(Op, Option<Word>)> {
    let op = Op::from_word(*text.get(pc)?)?;
    if op.has_operand() {
        Some((op, Some(*text.get(pc + 1)?)))
    } else {
        Some((op, None))
    }
}

pub fn format_program(program: &Program) -> String {
    let mut disassembler = Disassembler::new(program);
    disassembler.disassemble().to_string()
}
