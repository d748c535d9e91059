use std::fmt;
use std::str::FromStr;

use super::Word;

/// Instruction opcodes for the yvm engine.
///
/// The discriminants are the encoding contract: a producer of bytecode emits
/// exactly these word values, and operand-bearing opcodes are followed by one
/// operand word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // ========================================
    // Load / address
    // ========================================
    Lea = 0,
    Imm = 1,

    // ========================================
    // Control flow
    // ========================================
    Jmp = 2,
    Call = 3,
    Jz = 4,
    Jnz = 5,

    // ========================================
    // Frames
    // ========================================
    Ent = 6,
    Adj = 7,
    Lev = 8,

    // ========================================
    // Memory
    // ========================================
    Li = 9,
    Lc = 10,
    Si = 11,
    Sc = 12,
    Push = 13,

    // ========================================
    // Binary operators: ax = pop() OP ax
    // ========================================
    Or = 14,
    Xor = 15,
    And = 16,
    Eq = 17,
    Ne = 18,
    Lt = 19,
    Gt = 20,
    Le = 21,
    Ge = 22,
    Shl = 23,
    Shr = 24,
    Add = 25,
    Sub = 26,
    Mul = 27,
    Div = 28,
    Mod = 29,

    // ========================================
    // Host calls
    // ========================================
    Open = 30,
    Read = 31,
    Clos = 32,
    Prtf = 33,
    Malc = 34,
    Mset = 35,
    Mcmp = 36,
    Exit = 37,
}

impl Op {
    /// Every opcode in encoding order.
    pub const ALL: [Op; 38] = [
        Op::Lea,
        Op::Imm,
        Op::Jmp,
        Op::Call,
        Op::Jz,
        Op::Jnz,
        Op::Ent,
        Op::Adj,
        Op::Lev,
        Op::Li,
        Op::Lc,
        Op::Si,
        Op::Sc,
        Op::Push,
        Op::Or,
        Op::Xor,
        Op::And,
        Op::Eq,
        Op::Ne,
        Op::Lt,
        Op::Gt,
        Op::Le,
        Op::Ge,
        Op::Shl,
        Op::Shr,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Open,
        Op::Read,
        Op::Clos,
        Op::Prtf,
        Op::Malc,
        Op::Mset,
        Op::Mcmp,
        Op::Exit,
    ];

    /// Decode an instruction word. Returns `None` for unknown opcodes.
    pub fn from_word(word: Word) -> Option<Op> {
        usize::try_from(word)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// The word this opcode is encoded as.
    pub fn to_word(self) -> Word {
        self as Word
    }

    /// Whether the opcode is followed by an inline operand word.
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Op::Lea | Op::Imm | Op::Jmp | Op::Call | Op::Jz | Op::Jnz | Op::Ent | Op::Adj
        )
    }

    /// Whether the operand is an instruction index.
    pub fn is_branch(self) -> bool {
        matches!(self, Op::Jmp | Op::Call | Op::Jz | Op::Jnz)
    }

    /// Width of the encoded instruction in words.
    pub fn width(self) -> usize {
        if self.has_operand() { 2 } else { 1 }
    }

    /// Upper-case assembler mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Lea => "LEA",
            Op::Imm => "IMM",
            Op::Jmp => "JMP",
            Op::Call => "CALL",
            Op::Jz => "JZ",
            Op::Jnz => "JNZ",
            Op::Ent => "ENT",
            Op::Adj => "ADJ",
            Op::Lev => "LEV",
            Op::Li => "LI",
            Op::Lc => "LC",
            Op::Si => "SI",
            Op::Sc => "SC",
            Op::Push => "PUSH",
            Op::Or => "OR",
            Op::Xor => "XOR",
            Op::And => "AND",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Lt => "LT",
            Op::Gt => "GT",
            Op::Le => "LE",
            Op::Ge => "GE",
            Op::Shl => "SHL",
            Op::Shr => "SHR",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Open => "OPEN",
            Op::Read => "READ",
            Op::Clos => "CLOS",
            Op::Prtf => "PRTF",
            Op::Malc => "MALC",
            Op::Mset => "MSET",
            Op::Mcmp => "MCMP",
            Op::Exit => "EXIT",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Op {
    type Err = ();

    /// Case-insensitive mnemonic lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}
