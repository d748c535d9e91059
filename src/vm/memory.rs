//! The memory image: text, static data, stack and heap regions.
//!
//! Data addresses are tagged byte offsets packed into a single [`Word`]: the
//! top byte holds the region tag and the remaining bits hold the offset. The
//! zero word is null and never decodes, so a stray integer used as a pointer
//! lands outside every region and traps instead of aliasing host memory.
//!
//! The text region is not data-addressable; instructions are reached only
//! through the program counter.

use super::error::LoadError;
use super::{Program, Word};
use crate::config::RuntimeConfig;

/// Size of a machine word in bytes.
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();

const TAG_SHIFT: u32 = Word::BITS - 8;
const OFFSET_MASK: usize = (1usize << TAG_SHIFT) - 1;

/// Largest region the loader will allocate: 1 GiB, or the whole offset
/// range on targets where that is smaller.
pub const MAX_REGION_BYTES: usize = if OFFSET_MASK < 1 << 30 {
    OFFSET_MASK
} else {
    1 << 30
};

const TAG_DATA: usize = 1;
const TAG_STACK: usize = 2;
const TAG_HEAP: usize = 3;

/// A validated data address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Data(usize),
    Stack(usize),
    Heap(usize),
}

impl Address {
    /// Pack the address into a word.
    pub fn encode(self) -> Word {
        let (tag, offset) = match self {
            Address::Data(off) => (TAG_DATA, off),
            Address::Stack(off) => (TAG_STACK, off),
            Address::Heap(off) => (TAG_HEAP, off),
        };
        ((tag << TAG_SHIFT) | (offset & OFFSET_MASK)) as Word
    }

    /// Unpack a word. Null, negative and untagged words do not decode.
    pub fn decode(word: Word) -> Option<Address> {
        if word <= 0 {
            return None;
        }
        let raw = word as usize;
        let offset = raw & OFFSET_MASK;
        match raw >> TAG_SHIFT {
            TAG_DATA => Some(Address::Data(offset)),
            TAG_STACK => Some(Address::Stack(offset)),
            TAG_HEAP => Some(Address::Heap(offset)),
            _ => None,
        }
    }

    pub fn offset(self) -> usize {
        match self {
            Address::Data(off) | Address::Stack(off) | Address::Heap(off) => off,
        }
    }
}

/// The four regions of a running machine.
///
/// Every region is allocated once, zero-filled, and never resized.
#[derive(Debug, Clone)]
pub struct Memory {
    text: Vec<Word>,
    text_len: usize,
    data: Vec<u8>,
    stack: Vec<u8>,
    heap: Vec<u8>,
    heap_top: usize,
}

impl Memory {
    /// Allocate regions sized by `config` and copy the program in.
    pub fn load(program: &Program, config: &RuntimeConfig) -> Result<Self, LoadError> {
        let stack_bytes = config.stack_bytes - config.stack_bytes % WORD_BYTES;
        let text_bytes = config.text_words.saturating_mul(WORD_BYTES);
        for (region, bytes) in [
            ("text", text_bytes),
            ("data", config.data_bytes),
            ("stack", stack_bytes),
            ("heap", config.heap_bytes),
        ] {
            if bytes > MAX_REGION_BYTES {
                return Err(LoadError::RegionTooLarge { region, bytes });
            }
        }

        if program.text.len() > config.text_words {
            return Err(LoadError::TextTooLarge {
                len: program.text.len(),
                capacity: config.text_words,
            });
        }
        if program.data.len() > config.data_bytes {
            return Err(LoadError::DataTooLarge {
                len: program.data.len(),
                capacity: config.data_bytes,
            });
        }
        if program.entry > program.text.len() {
            return Err(LoadError::EntryOutOfRange {
                entry: program.entry,
                len: program.text.len(),
            });
        }

        let mut text = vec![0; config.text_words];
        text[..program.text.len()].copy_from_slice(&program.text);
        let mut data = vec![0; config.data_bytes];
        data[..program.data.len()].copy_from_slice(&program.data);

        Ok(Self {
            text,
            text_len: program.text.len(),
            data,
            stack: vec![0; stack_bytes],
            heap: vec![0; config.heap_bytes],
            heap_top: 0,
        })
    }

    /// Number of loaded instruction words.
    pub fn text_len(&self) -> usize {
        self.text_len
    }

    /// Instruction word at `index`, if it lies within the loaded stream.
    pub fn fetch(&self, index: usize) -> Option<Word> {
        if index < self.text_len {
            self.text.get(index).copied()
        } else {
            None
        }
    }

    /// Encoded address one past the highest stack byte.
    pub fn stack_top(&self) -> Word {
        Address::Stack(self.stack.len()).encode()
    }

    /// Size of the stack region in bytes.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Stack offset of an encoded stack pointer. Accepts the one-past-the-end
    /// position.
    pub fn stack_offset(&self, sp: Word) -> Option<usize> {
        match Address::decode(sp)? {
            Address::Stack(off) if off <= self.stack.len() => Some(off),
            _ => None,
        }
    }

    fn region(&self, addr: Address) -> &[u8] {
        match addr {
            Address::Data(_) => &self.data,
            Address::Stack(_) => &self.stack,
            Address::Heap(_) => &self.heap,
        }
    }

    fn region_mut(&mut self, addr: Address) -> &mut [u8] {
        match addr {
            Address::Data(_) => &mut self.data,
            Address::Stack(_) => &mut self.stack,
            Address::Heap(_) => &mut self.heap,
        }
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn bytes(&self, addr: Word, len: usize) -> Option<&[u8]> {
        let addr = Address::decode(addr)?;
        let start = addr.offset();
        let end = start.checked_add(len)?;
        self.region(addr).get(start..end)
    }

    /// Mutably borrow `len` bytes starting at `addr`.
    pub fn bytes_mut(&mut self, addr: Word, len: usize) -> Option<&mut [u8]> {
        let addr = Address::decode(addr)?;
        let start = addr.offset();
        let end = start.checked_add(len)?;
        self.region_mut(addr).get_mut(start..end)
    }

    pub fn read_byte(&self, addr: Word) -> Option<u8> {
        self.bytes(addr, 1).map(|b| b[0])
    }

    pub fn write_byte(&mut self, addr: Word, value: u8) -> Option<()> {
        self.bytes_mut(addr, 1).map(|b| b[0] = value)
    }

    pub fn read_word(&self, addr: Word) -> Option<Word> {
        let bytes = self.bytes(addr, WORD_BYTES)?;
        let mut buf = [0u8; WORD_BYTES];
        buf.copy_from_slice(bytes);
        Some(Word::from_le_bytes(buf))
    }

    pub fn write_word(&mut self, addr: Word, value: Word) -> Option<()> {
        self.bytes_mut(addr, WORD_BYTES)
            .map(|b| b.copy_from_slice(&value.to_le_bytes()))
    }

    /// The NUL-terminated byte string at `addr`, without its terminator.
    /// Fails if no terminator occurs before the end of the region.
    pub fn c_string(&self, addr: Word) -> Option<&[u8]> {
        let decoded = Address::decode(addr)?;
        let tail = self.region(decoded).get(decoded.offset()..)?;
        let nul = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..nul])
    }

    /// Carve a fresh, word-aligned block out of the heap arena.
    ///
    /// Blocks are never reused, so every successful call returns a distinct
    /// address. Returns `None` once the arena is exhausted.
    pub fn alloc(&mut self, size: usize) -> Option<Word> {
        let rounded = size.max(1).checked_add(WORD_BYTES - 1)? / WORD_BYTES * WORD_BYTES;
        let start = self.heap_top;
        let end = start.checked_add(rounded)?;
        if end > self.heap.len() {
            return None;
        }
        self.heap_top = end;
        Some(Address::Heap(start).encode())
    }

    /// Bytes of heap handed out so far.
    pub fn heap_used(&self) -> usize {
        self.heap_top
    }
}
