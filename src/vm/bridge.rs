//! Dispatch of the host-call opcodes.
//!
//! Each call reads its arguments at fixed word offsets from the stack
//! pointer, last pushed at offset 0, and leaves its result in `ax`. Bad
//! pointers trap like any other memory access; everything the host itself
//! reports as a failure comes back as a negative value.

use tracing::{debug, warn};

use super::error::Trap;
use super::host::Host;
use super::printf::{self, FormatError};
use super::vm::VM;
use super::{Op, Word};

/// Values PRTF passes to the formatter after the format string.
const MAX_PRINTF_VALUES: usize = 5;

impl<H: Host> VM<H> {
    pub(super) fn host_call(&mut self, op: Op, pc: usize) -> Result<(), Trap> {
        let result = match op {
            Op::Open => {
                let path = self.arg(pc, 1)?;
                let flags = self.arg(pc, 0)?;
                let name = self
                    .memory
                    .c_string(path)
                    .ok_or(Trap::InvalidAddress { pc, address: path, len: 1 })?;
                self.host.open(name, flags)
            }
            Op::Read => {
                let fd = self.arg(pc, 2)?;
                let buf = self.arg(pc, 1)?;
                let count = self.arg(pc, 0)?;
                let len = byte_count(pc, buf, count)?;
                let dest = self
                    .memory
                    .bytes_mut(buf, len)
                    .ok_or(Trap::InvalidAddress { pc, address: buf, len })?;
                self.host.read(fd, dest)
            }
            Op::Clos => {
                let fd = self.arg(pc, 0)?;
                self.host.close(fd)
            }
            Op::Prtf => self.printf(pc)?,
            Op::Malc => {
                let size = self.arg(pc, 0)?;
                let addr = usize::try_from(size)
                    .ok()
                    .and_then(|size| self.memory.alloc(size));
                match addr {
                    Some(addr) => {
                        debug!(size, addr, "malloc");
                        addr
                    }
                    None => {
                        warn!(size, used = self.memory.heap_used(), "malloc failed");
                        0
                    }
                }
            }
            Op::Mset => {
                let dest = self.arg(pc, 2)?;
                let value = self.arg(pc, 1)?;
                let count = self.arg(pc, 0)?;
                let len = byte_count(pc, dest, count)?;
                self.memory
                    .bytes_mut(dest, len)
                    .ok_or(Trap::InvalidAddress { pc, address: dest, len })?
                    .fill(value as u8);
                dest
            }
            Op::Mcmp => {
                let a = self.arg(pc, 2)?;
                let b = self.arg(pc, 1)?;
                let count = self.arg(pc, 0)?;
                let len = byte_count(pc, a, count)?;
                let left = self
                    .memory
                    .bytes(a, len)
                    .ok_or(Trap::InvalidAddress { pc, address: a, len })?;
                let right = self
                    .memory
                    .bytes(b, len)
                    .ok_or(Trap::InvalidAddress { pc, address: b, len })?;
                left.iter()
                    .zip(right)
                    .find(|(x, y)| x != y)
                    .map_or(0, |(&x, &y)| x as Word - y as Word)
            }
            _ => unreachable!("{op} is not a host call"),
        };
        self.regs.ax = result;
        Ok(())
    }

    /// PRTF takes its argument count from the ADJ that the caller emits right
    /// after it to drop the arguments.
    fn printf(&mut self, pc: usize) -> Result<Word, Trap> {
        let next = self.regs.pc as usize;
        if self.memory.fetch(next) != Some(Op::Adj.to_word()) {
            return Err(Trap::MissingArgumentCount { pc });
        }
        let argc = self
            .memory
            .fetch(next + 1)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n >= 1)
            .ok_or(Trap::MissingArgumentCount { pc })?;

        let format_addr = self.arg(pc, argc - 1)?;
        let values = (1..argc.min(MAX_PRINTF_VALUES + 1))
            .map(|k| self.arg(pc, argc - 1 - k))
            .collect::<Result<Vec<_>, _>>()?;

        let format = self
            .memory
            .c_string(format_addr)
            .ok_or(Trap::InvalidAddress { pc, address: format_addr, len: 1 })?;
        let out = match printf::format(format, &values, &self.memory) {
            Ok(out) => out,
            Err(FormatError::BadString(address)) => {
                return Err(Trap::InvalidAddress { pc, address, len: 1 });
            }
            Err(FormatError::FieldTooWide(field)) => {
                warn!(field, max = printf::MAX_FIELD, "printf field too wide");
                return Ok(-1);
            }
        };

        match self.host.write_output(&out) {
            Ok(()) => Ok(out.len() as Word),
            Err(e) => {
                warn!(error = %e, "printf output failed");
                Ok(-1)
            }
        }
    }
}

/// A byte count argument. Negative counts describe no valid range.
fn byte_count(pc: usize, address: Word, count: Word) -> Result<usize, Trap> {
    usize::try_from(count).map_err(|_| Trap::InvalidAddress {
        pc,
        address,
        len: count as usize,
    })
}
