//! Binary image serialization/deserialization for yvm.
//!
//! Binary format (all integers little-endian):
//! - Magic: "YVM\0" (4 bytes)
//! - Version: u32
//! - Word width: u8, must match the running host
//! - Entry: u64 instruction index
//! - Text: u32 word count + i64 words
//! - Data: u32 byte count + bytes

use std::io::{self, Read, Write};

use thiserror::Error;

use super::{Program, WORD_BYTES, Word};

/// Magic bytes for yvm image files
pub const MAGIC: &[u8; 4] = b"YVM\0";

/// Current image format version
pub const VERSION: u32 = 1;

/// Error type for image operations
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("image was built for {found}-byte words, this host uses {expected}")]
    WordWidthMismatch { found: u8, expected: usize },
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("{0} trailing bytes after image")]
    TrailingBytes(usize),
    #[error("text word {value} does not fit in a machine word")]
    WordOverflow { value: i64 },
    #[error("entry point {entry} is outside the text ({len} words)")]
    EntryOutOfRange { entry: u64, len: usize },
    #[error("{what} is too large for the image format")]
    TooLarge { what: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Does `bytes` start with the image magic?
pub fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// Serialize a Program to bytes
pub fn serialize(program: &Program) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::with_capacity(21 + program.text.len() * 8 + program.data.len());
    write_program(&mut buf, program)?;
    Ok(buf)
}

/// Deserialize a Program from bytes. The whole buffer must be consumed.
pub fn deserialize(data: &[u8]) -> Result<Program, ImageError> {
    let mut cursor = io::Cursor::new(data);
    let program = read_program(&mut cursor)?;
    let rest = data.len() - cursor.position() as usize;
    if rest != 0 {
        return Err(ImageError::TrailingBytes(rest));
    }
    Ok(program)
}

/// Write a Program to a writer
pub fn write_program<W: Write>(w: &mut W, program: &Program) -> Result<(), ImageError> {
    w.write_all(MAGIC)?;
    write_u32(w, VERSION)?;
    w.write_all(&[WORD_BYTES as u8])?;
    write_u64(w, program.entry as u64)?;

    write_len(w, program.text.len(), "text")?;
    for &word in &program.text {
        write_i64(w, word as i64)?;
    }

    write_len(w, program.data.len(), "data")?;
    w.write_all(&program.data)?;
    Ok(())
}

/// Read a Program from a reader
pub fn read_program<R: Read>(r: &mut R) -> Result<Program, ImageError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| ImageError::UnexpectedEof)?;
    if &magic != MAGIC {
        return Err(ImageError::InvalidMagic);
    }

    let version = read_u32(r)?;
    if version != VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    let width = read_u8(r)?;
    if width as usize != WORD_BYTES {
        return Err(ImageError::WordWidthMismatch {
            found: width,
            expected: WORD_BYTES,
        });
    }

    let entry = read_u64(r)?;

    let text_len = read_u32(r)? as usize;
    let mut text = Vec::with_capacity(text_len.min(1 << 16));
    for _ in 0..text_len {
        let value = read_i64(r)?;
        let word = Word::try_from(value).map_err(|_| ImageError::WordOverflow { value })?;
        text.push(word);
    }

    let data_len = read_u32(r)? as usize;
    let mut data = Vec::with_capacity(data_len.min(1 << 16));
    r.by_ref().take(data_len as u64).read_to_end(&mut data)?;
    if data.len() != data_len {
        return Err(ImageError::UnexpectedEof);
    }

    let entry = usize::try_from(entry)
        .ok()
        .filter(|&e| e <= text.len())
        .ok_or(ImageError::EntryOutOfRange {
            entry,
            len: text.len(),
        })?;

    Ok(Program { text, data, entry })
}

// Helper functions for reading/writing primitives

fn write_len<W: Write>(w: &mut W, len: usize, what: &'static str) -> Result<(), ImageError> {
    let len = u32::try_from(len).map_err(|_| ImageError::TooLarge { what })?;
    write_u32(w, len)?;
    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, ImageError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::UnexpectedEof)?;
    Ok(buf[0])
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, ImageError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::UnexpectedEof)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, ImageError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::UnexpectedEof)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, ImageError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::UnexpectedEof)?;
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Op;

    fn sample() -> Program {
        Program {
            text: vec![
                Op::Imm.to_word(),
                -42,
                Op::Push.to_word(),
                Op::Exit.to_word(),
            ],
            data: b"hello\0".to_vec(),
            entry: 0,
        }
    }

    #[test]
    fn test_roundtrip() {
        let program = sample();
        let bytes = serialize(&program).unwrap();
        assert!(is_image(&bytes));
        assert_eq!(deserialize(&bytes).unwrap(), program);
    }

    #[test]
    fn test_layout() {
        let bytes = serialize(&sample()).unwrap();
        assert_eq!(&bytes[..4], b"YVM\0");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(bytes[8] as usize, WORD_BYTES);
        assert_eq!(&bytes[9..17], &0u64.to_le_bytes());
        assert_eq!(&bytes[17..21], &4u32.to_le_bytes());
        assert_eq!(&bytes[21..29], &1i64.to_le_bytes());
        assert_eq!(bytes.len(), 21 + 4 * 8 + 4 + 6);
    }

    #[test]
    fn test_invalid_magic() {
        let data = b"BADM\x01\x00\x00\x00";
        assert!(matches!(deserialize(data), Err(ImageError::InvalidMagic)));
        assert!(!is_image(data));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = serialize(&sample()).unwrap();
        bytes[4] = 9;
        assert!(matches!(
            deserialize(&bytes),
            Err(ImageError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_word_width_mismatch() {
        let mut bytes = serialize(&sample()).unwrap();
        bytes[8] = 2;
        assert!(matches!(
            deserialize(&bytes),
            Err(ImageError::WordWidthMismatch { found: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = serialize(&sample()).unwrap();
        assert!(matches!(
            deserialize(&bytes[..bytes.len() - 2]),
            Err(ImageError::UnexpectedEof)
        ));
        assert!(matches!(
            deserialize(&bytes[..20]),
            Err(ImageError::UnexpectedEof)
        ));

        let mut longer = bytes.clone();
        longer.extend_from_slice(b"xx");
        assert!(matches!(deserialize(&longer), Err(ImageError::TrailingBytes(2))));
    }

    #[test]
    fn test_entry_out_of_range() {
        let program = Program {
            entry: 9,
            ..sample()
        };
        let bytes = serialize(&program).unwrap();
        assert!(matches!(
            deserialize(&bytes),
            Err(ImageError::EntryOutOfRange { entry: 9, len: 4 })
        ));
    }
}
