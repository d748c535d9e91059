use tracing::{debug, info, trace};

use crate::config::RuntimeConfig;
use crate::vm::error::{LoadError, Trap};
use crate::vm::host::{Host, StdHost};
use crate::vm::memory::{Address, Memory, WORD_BYTES};
use crate::vm::{Op, Program, Registers, Word};

/// Outcome of a single dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    /// An EXIT instruction ran with this status.
    Exit(Word),
    /// The program counter reached the end of the loaded stream.
    End,
}

/// The yvm virtual machine.
///
/// Owns its register file, memory image and host; nothing is shared between
/// instances.
pub struct VM<H: Host = StdHost> {
    pub(super) regs: Registers,
    pub(super) memory: Memory,
    pub(super) host: H,
    cycles: u64,
    max_cycles: Option<u64>,
    trace: bool,
}

impl VM {
    /// Create a VM that prints to standard output.
    pub fn new(program: &Program, config: &RuntimeConfig) -> Result<Self, LoadError> {
        Self::with_host(program, config, StdHost::new())
    }
}

impl<H: Host> VM<H> {
    /// Create a VM with a custom host.
    pub fn with_host(program: &Program, config: &RuntimeConfig, host: H) -> Result<Self, LoadError> {
        let memory = Memory::load(program, config)?;
        let regs = Registers::new(program.entry as Word, memory.stack_top());
        info!(
            text_words = program.text.len(),
            data_bytes = program.data.len(),
            entry = program.entry,
            "program loaded"
        );
        Ok(Self {
            regs,
            memory,
            host,
            cycles: 0,
            max_cycles: config.max_cycles,
            trace: config.trace,
        })
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Number of instructions dispatched so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run to completion and return the status: the EXIT argument, 0 if the
    /// stream ran out, or the trap's status.
    pub fn execute(&mut self) -> Word {
        match self.run() {
            Ok(status) => status,
            Err(trap) => trap.status(),
        }
    }

    /// Run until EXIT, the end of the stream, or a fault.
    pub fn run(&mut self) -> Result<Word, Trap> {
        loop {
            match self.step() {
                Ok(ControlFlow::Continue) => {}
                Ok(ControlFlow::Exit(status)) => {
                    info!(status, cycles = self.cycles, "exit");
                    return Ok(status);
                }
                Ok(ControlFlow::End) => {
                    info!(cycles = self.cycles, "end of program");
                    return Ok(0);
                }
                Err(trap) => {
                    debug!(%trap, status = trap.status(), cycles = self.cycles, "halted");
                    return Err(trap);
                }
            }
        }
    }

    /// Fetch, decode and execute one instruction.
    pub fn step(&mut self) -> Result<ControlFlow, Trap> {
        let pc = self.pc_index()?;
        let Some(word) = self.memory.fetch(pc) else {
            return Ok(ControlFlow::End);
        };

        if let Some(limit) = self.max_cycles
            && self.cycles >= limit
        {
            return Err(Trap::CycleLimit { limit });
        }
        self.cycles += 1;

        let op = Op::from_word(word).ok_or(Trap::UnknownInstruction { pc, word })?;
        self.regs.pc += 1;

        let operand = if op.has_operand() {
            let operand = self
                .memory
                .fetch(pc + 1)
                .ok_or(Trap::PcOutOfBounds { target: pc as Word + 1 })?;
            self.regs.pc += 1;
            operand
        } else {
            0
        };

        if self.trace {
            trace!(
                cycle = self.cycles,
                pc,
                op = op.mnemonic(),
                operand,
                regs = %self.regs,
                "dispatch"
            );
        }

        self.execute_op(op, operand, pc)
    }

    fn pc_index(&self) -> Result<usize, Trap> {
        usize::try_from(self.regs.pc)
            .ok()
            .filter(|&pc| pc <= self.memory.text_len())
            .ok_or(Trap::PcOutOfBounds { target: self.regs.pc })
    }

    fn execute_op(&mut self, op: Op, operand: Word, pc: usize) -> Result<ControlFlow, Trap> {
        match op {
            Op::Imm => self.regs.ax = operand,
            Op::Lea => {
                self.regs.ax = self
                    .regs
                    .bp
                    .wrapping_add(operand.wrapping_mul(WORD_BYTES as Word));
            }
            Op::Lc => {
                let addr = self.regs.ax;
                let byte = self
                    .memory
                    .read_byte(addr)
                    .ok_or(Trap::InvalidAddress { pc, address: addr, len: 1 })?;
                self.regs.ax = byte as Word;
            }
            Op::Li => {
                let addr = self.regs.ax;
                self.regs.ax = self.memory.read_word(addr).ok_or(Trap::InvalidAddress {
                    pc,
                    address: addr,
                    len: WORD_BYTES,
                })?;
            }
            Op::Sc => {
                let addr = self.pop(pc)?;
                self.memory
                    .write_byte(addr, self.regs.ax as u8)
                    .ok_or(Trap::InvalidAddress { pc, address: addr, len: 1 })?;
            }
            Op::Si => {
                let addr = self.pop(pc)?;
                self.memory
                    .write_word(addr, self.regs.ax)
                    .ok_or(Trap::InvalidAddress {
                        pc,
                        address: addr,
                        len: WORD_BYTES,
                    })?;
            }
            Op::Push => self.push(pc, self.regs.ax)?,

            Op::Jmp => self.regs.pc = operand,
            Op::Jz => {
                if self.regs.ax == 0 {
                    self.regs.pc = operand;
                }
            }
            Op::Jnz => {
                if self.regs.ax != 0 {
                    self.regs.pc = operand;
                }
            }

            Op::Call => {
                self.push(pc, self.regs.pc)?;
                self.regs.pc = operand;
            }
            Op::Ent => {
                self.push(pc, self.regs.bp)?;
                self.regs.bp = self.regs.sp;
                self.regs.sp = self.offset_sp(pc, operand.wrapping_neg())?;
            }
            Op::Adj => self.regs.sp = self.offset_sp(pc, operand)?,
            Op::Lev => {
                if self.memory.stack_offset(self.regs.bp).is_none() {
                    return Err(Trap::InvalidAddress {
                        pc,
                        address: self.regs.bp,
                        len: WORD_BYTES,
                    });
                }
                self.regs.sp = self.regs.bp;
                self.regs.bp = self.pop(pc)?;
                self.regs.pc = self.pop(pc)?;
            }

            Op::Or
            | Op::Xor
            | Op::And
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Gt
            | Op::Le
            | Op::Ge
            | Op::Shl
            | Op::Shr
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod => {
                let left = self.pop(pc)?;
                self.regs.ax = binary(op, left, self.regs.ax).ok_or(Trap::DivisionByZero { pc })?;
            }

            Op::Exit => return Ok(ControlFlow::Exit(self.arg(pc, 0)?)),
            Op::Open | Op::Read | Op::Clos | Op::Prtf | Op::Malc | Op::Mset | Op::Mcmp => {
                self.host_call(op, pc)?;
            }
        }
        Ok(ControlFlow::Continue)
    }

    /// Current stack offset, trapping if `sp` no longer points into the stack.
    fn sp_offset(&self, pc: usize) -> Result<usize, Trap> {
        self.memory
            .stack_offset(self.regs.sp)
            .ok_or(Trap::InvalidAddress {
                pc,
                address: self.regs.sp,
                len: WORD_BYTES,
            })
    }

    pub(super) fn push(&mut self, pc: usize, value: Word) -> Result<(), Trap> {
        let offset = self.sp_offset(pc)?;
        let new_offset = offset
            .checked_sub(WORD_BYTES)
            .ok_or(Trap::StackOverflow { pc })?;
        let addr = Address::Stack(new_offset).encode();
        self.memory
            .write_word(addr, value)
            .ok_or(Trap::StackOverflow { pc })?;
        self.regs.sp = addr;
        Ok(())
    }

    pub(super) fn pop(&mut self, pc: usize) -> Result<Word, Trap> {
        let offset = self.sp_offset(pc)?;
        let value = self
            .memory
            .read_word(self.regs.sp)
            .ok_or(Trap::StackUnderflow { pc })?;
        self.regs.sp = Address::Stack(offset + WORD_BYTES).encode();
        Ok(value)
    }

    /// The word `index` slots above the stack pointer.
    pub(super) fn arg(&self, pc: usize, index: usize) -> Result<Word, Trap> {
        let offset = self.sp_offset(pc)?;
        let addr = Address::Stack(offset + index * WORD_BYTES).encode();
        self.memory
            .read_word(addr)
            .ok_or(Trap::StackUnderflow { pc })
    }

    /// Move the stack pointer by `words` (negative grows the stack).
    fn offset_sp(&self, pc: usize, words: Word) -> Result<Word, Trap> {
        let offset = self.sp_offset(pc)? as Word;
        let target = words
            .checked_mul(WORD_BYTES as Word)
            .and_then(|delta| offset.checked_add(delta));
        match target {
            Some(t) if t < 0 => Err(Trap::StackOverflow { pc }),
            Some(t) if t as usize <= self.memory.stack_len() => Ok(Address::Stack(t as usize).encode()),
            Some(_) => Err(Trap::StackUnderflow { pc }),
            None if words < 0 => Err(Trap::StackOverflow { pc }),
            None => Err(Trap::StackUnderflow { pc }),
        }
    }
}

/// `left OP right` with two's-complement wrapping. `None` on division or
/// remainder by zero.
fn binary(op: Op, left: Word, right: Word) -> Option<Word> {
    let value = match op {
        Op::Or => left | right,
        Op::Xor => left ^ right,
        Op::And => left & right,
        Op::Eq => (left == right) as Word,
        Op::Ne => (left != right) as Word,
        Op::Lt => (left < right) as Word,
        Op::Gt => (left > right) as Word,
        Op::Le => (left <= right) as Word,
        Op::Ge => (left >= right) as Word,
        Op::Shl => left.wrapping_shl(right as u32),
        Op::Shr => left.wrapping_shr(right as u32),
        Op::Add => left.wrapping_add(right),
        Op::Sub => left.wrapping_sub(right),
        Op::Mul => left.wrapping_mul(right),
        Op::Div | Op::Mod if right == 0 => return None,
        Op::Div => left.wrapping_div(right),
        Op::Mod => left.wrapping_rem(right),
        _ => unreachable!("{op} is not a binary operator"),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Op::*;

    /// Encode a flat list of opcodes and operands.
    fn assemble(code: &[Word]) -> Program {
        Program {
            text: code.to_vec(),
            ..Default::default()
        }
    }

    fn vm_for(code: &[Word]) -> VM<StdHost<Vec<u8>>> {
        let config = RuntimeConfig::default();
        VM::with_host(&assemble(code), &config, StdHost::with_output(Vec::new())).unwrap()
    }

    fn run_code(code: &[Word]) -> Result<Word, Trap> {
        vm_for(code).run()
    }

    fn op(o: Op) -> Word {
        o.to_word()
    }

    #[test]
    fn test_straight_line_add() {
        let code = [op(Imm), 10, op(Push), op(Imm), 20, op(Add), op(Push), op(Exit)];
        assert_eq!(run_code(&code), Ok(30));
    }

    #[test]
    fn test_end_of_stream_returns_zero() {
        assert_eq!(run_code(&[op(Imm), 7]), Ok(0));
        assert_eq!(run_code(&[]), Ok(0));
    }

    #[test]
    fn test_binary_operators() {
        let cases: &[(Op, Word, Word, Word)] = &[
            (Or, 0b1100, 0b1010, 0b1110),
            (Xor, 0b1100, 0b1010, 0b0110),
            (And, 0b1100, 0b1010, 0b1000),
            (Eq, 3, 3, 1),
            (Ne, 3, 3, 0),
            (Lt, 2, 3, 1),
            (Gt, 2, 3, 0),
            (Le, 3, 3, 1),
            (Ge, 2, 3, 0),
            (Shl, 1, 4, 16),
            (Shr, -16, 2, -4),
            (Add, Word::MAX, 1, Word::MIN),
            (Sub, 5, 8, -3),
            (Mul, -4, 6, -24),
            (Div, -7, 2, -3),
            (Mod, -7, 2, -1),
            (Div, Word::MIN, -1, Word::MIN),
            (Mod, Word::MIN, -1, 0),
        ];
        for &(o, left, right, expected) in cases {
            let code = [op(Imm), left, op(Push), op(Imm), right, op(o)];
            let mut vm = vm_for(&code);
            assert_eq!(vm.run(), Ok(0));
            assert_eq!(vm.registers().ax, expected, "{} {} {}", left, o, right);
            assert_eq!(vm.registers().sp, vm.memory().stack_top());
        }
    }

    #[test]
    fn test_division_by_zero_traps() {
        for o in [Div, Mod] {
            let code = [op(Imm), 1, op(Push), op(Imm), 0, op(o)];
            let trap = run_code(&code).unwrap_err();
            assert_eq!(trap, Trap::DivisionByZero { pc: 5 });
            assert_eq!(trap.status(), -2);
        }
    }

    #[test]
    fn test_conditional_jumps() {
        // JZ taken: skips IMM 1.
        let code = [op(Imm), 0, op(Jz), 6, op(Imm), 1, op(Push), op(Exit)];
        assert_eq!(run_code(&code), Ok(0));

        // JZ not taken: operand skipped, falls through to IMM 5.
        let code = [op(Imm), 9, op(Jz), 7, op(Imm), 5, op(Push), op(Exit)];
        assert_eq!(run_code(&code), Ok(5));

        // JNZ taken.
        let code = [op(Imm), 3, op(Jnz), 6, op(Imm), 1, op(Push), op(Exit)];
        assert_eq!(run_code(&code), Ok(3));

        // JNZ not taken.
        let code = [op(Imm), 0, op(Jnz), 7, op(Imm), 4, op(Push), op(Exit)];
        assert_eq!(run_code(&code), Ok(4));
    }

    #[test]
    fn test_non_taken_branch_skips_operand() {
        let mut vm = vm_for(&[op(Imm), 1, op(Jz), 100, op(Push)]);
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.registers().pc, 4);
    }

    #[test]
    fn test_call_frame_symmetry() {
        // 0: IMM 11     2: PUSH       3: CALL 9     5: ADJ 1
        // 7: PUSH       8: EXIT
        // 9: ENT 2      11: LEA 2     13: LI        14: PUSH
        // 15: IMM 1     17: ADD       18: LEV
        let code = [
            op(Imm), 11, op(Push), op(Call), 9, op(Adj), 1, op(Push), op(Exit),
            op(Ent), 2, op(Lea), 2, op(Li), op(Push), op(Imm), 1, op(Add), op(Lev),
        ];
        let mut vm = vm_for(&code);
        for _ in 0..2 {
            vm.step().unwrap();
        }
        let before = *vm.registers();
        assert_eq!(before.pc, 3);

        // CALL, ENT, LEA, LI, PUSH, IMM, ADD, LEV
        for _ in 0..8 {
            vm.step().unwrap();
        }
        let after = *vm.registers();
        assert_eq!(after.pc, 5);
        assert_eq!(after.sp, before.sp);
        assert_eq!(after.bp, before.bp);
        assert_eq!(after.ax, 12);

        assert_eq!(vm.run(), Ok(12));
        let top = vm.memory().stack_len();
        assert_eq!(vm.memory().stack_offset(vm.registers().sp), Some(top - WORD_BYTES));
    }

    #[test]
    fn test_recursive_factorial() {
        // fact(n) = n <= 1 ? 1 : n * fact(n - 1)
        //  0: IMM 5   2: PUSH   3: CALL 9   5: ADJ 1   7: PUSH   8: EXIT
        //  9: ENT 0  11: LEA 2  13: LI  14: PUSH  15: IMM 1  17: LE  18: JZ 23
        // 20: IMM 1  22: LEV
        // 23: LEA 2  25: LI  26: PUSH
        // 27: LEA 2  29: LI  30: PUSH  31: IMM 1  33: SUB  34: PUSH
        // 35: CALL 9  37: ADJ 1  39: MUL  40: LEV
        let code = [
            op(Imm), 5, op(Push), op(Call), 9, op(Adj), 1, op(Push), op(Exit),
            op(Ent), 0, op(Lea), 2, op(Li), op(Push), op(Imm), 1, op(Le), op(Jz), 23,
            op(Imm), 1, op(Lev),
            op(Lea), 2, op(Li), op(Push),
            op(Lea), 2, op(Li), op(Push), op(Imm), 1, op(Sub), op(Push),
            op(Call), 9, op(Adj), 1, op(Mul), op(Lev),
        ];
        assert_eq!(run_code(&code), Ok(120));
    }

    #[test]
    fn test_local_store_and_load() {
        // ENT 1; LEA -1; PUSH; IMM 77; SI; LEA -1; LI; PUSH; EXIT
        let code = [
            op(Ent), 1, op(Lea), -1, op(Push), op(Imm), 77, op(Si),
            op(Lea), -1, op(Li), op(Push), op(Exit),
        ];
        assert_eq!(run_code(&code), Ok(77));

        // Same round trip through SC/LC keeps only the low byte.
        let code = [
            op(Ent), 1, op(Lea), -1, op(Push), op(Imm), 0x1241, op(Sc),
            op(Lea), -1, op(Lc), op(Push), op(Exit),
        ];
        assert_eq!(run_code(&code), Ok(0x41));
    }

    #[test]
    fn test_stores_leave_accumulator_unchanged() {
        for store in [Si, Sc] {
            let code = [op(Ent), 1, op(Lea), -1, op(Push), op(Imm), 0x1234, op(store)];
            let mut vm = vm_for(&code);
            vm.run().unwrap();
            assert_eq!(vm.registers().ax, 0x1234);
        }
    }

    #[test]
    fn test_unknown_instruction() {
        let code = [op(Imm), 5, op(Push), 99, op(Imm), 6, op(Push)];
        let mut vm = vm_for(&code);
        let trap = vm.run().unwrap_err();
        assert_eq!(trap, Trap::UnknownInstruction { pc: 3, word: 99 });
        assert_eq!(trap.status(), -1);

        // Nothing after the bad word ran.
        assert_eq!(vm.registers().ax, 5);
        let top = vm.memory().stack_len();
        assert_eq!(vm.memory().stack_offset(vm.registers().sp), Some(top - WORD_BYTES));
        assert_eq!(vm.memory().read_word(vm.registers().sp), Some(5));
        assert_eq!(vm_for(&[-3]).execute(), -1);
    }

    #[test]
    fn test_invalid_memory_access() {
        let trap = run_code(&[op(Imm), 12345, op(Li)]).unwrap_err();
        assert_eq!(trap, Trap::InvalidAddress { pc: 2, address: 12345, len: WORD_BYTES });
        assert_eq!(trap.status(), -3);

        let trap = run_code(&[op(Imm), 0, op(Push), op(Imm), 1, op(Sc)]).unwrap_err();
        assert!(matches!(trap, Trap::InvalidAddress { address: 0, .. }));
    }

    #[test]
    fn test_stack_underflow_and_overflow() {
        assert_eq!(run_code(&[op(Add)]), Err(Trap::StackUnderflow { pc: 0 }));
        assert_eq!(run_code(&[op(Adj), 1]), Err(Trap::StackUnderflow { pc: 0 }));
        assert_eq!(run_code(&[op(Exit)]), Err(Trap::StackUnderflow { pc: 0 }));

        let config = RuntimeConfig {
            stack_bytes: 4 * WORD_BYTES,
            ..Default::default()
        };
        let program = assemble(&[op(Push), op(Jmp), 0]);
        let mut vm = VM::with_host(&program, &config, StdHost::with_output(Vec::new())).unwrap();
        assert_eq!(vm.run(), Err(Trap::StackOverflow { pc: 0 }));

        let program = assemble(&[op(Ent), 5]);
        let mut vm = VM::with_host(&program, &config, StdHost::with_output(Vec::new())).unwrap();
        assert_eq!(vm.run(), Err(Trap::StackOverflow { pc: 0 }));
    }

    #[test]
    fn test_pc_out_of_bounds() {
        assert_eq!(run_code(&[op(Jmp), 50]), Err(Trap::PcOutOfBounds { target: 50 }));
        assert_eq!(run_code(&[op(Jmp), -1]), Err(Trap::PcOutOfBounds { target: -1 }));
        assert_eq!(run_code(&[op(Imm)]), Err(Trap::PcOutOfBounds { target: 1 }));
        // Jumping exactly to the end is a normal halt.
        assert_eq!(run_code(&[op(Jmp), 2]), Ok(0));
    }

    #[test]
    fn test_cycle_limit() {
        let config = RuntimeConfig {
            max_cycles: Some(100),
            ..Default::default()
        };
        let program = assemble(&[op(Jmp), 0]);
        let mut vm = VM::with_host(&program, &config, StdHost::with_output(Vec::new())).unwrap();
        assert_eq!(vm.run(), Err(Trap::CycleLimit { limit: 100 }));
        assert_eq!(vm.cycles(), 100);
    }

    #[test]
    fn test_entry_point() {
        let program = Program {
            text: vec![op(Imm), 1, op(Push), op(Exit), op(Imm), 2, op(Push), op(Exit)],
            data: Vec::new(),
            entry: 4,
        };
        let config = RuntimeConfig::default();
        let mut vm = VM::with_host(&program, &config, StdHost::with_output(Vec::new())).unwrap();
        assert_eq!(vm.run(), Ok(2));
    }

    #[test]
    fn test_independent_instances_on_threads() {
        let handles: Vec<_> = (1..=4)
            .map(|n| {
                std::thread::spawn(move || {
                    let code = [op(Imm), n, op(Push), op(Imm), n, op(Mul), op(Push), op(Exit)];
                    run_code(&code)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![Ok(1), Ok(4), Ok(9), Ok(16)]);
    }
}
