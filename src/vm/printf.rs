//! `printf`-style formatting over VM words.
//!
//! Supports `%d %i %u %x %X %o %c %s %p %%` with the flags `- 0 + space #`,
//! a field width, a precision (either may be `*`), and skips C length
//! modifiers. `%s` arguments are NUL-terminated strings in VM memory.
//! Widths and precisions above [`MAX_FIELD`] fail the whole call, the way C
//! reports `EOVERFLOW`.

use super::memory::Memory;
use super::Word;

/// Largest field width or precision a conversion may ask for.
pub const MAX_FIELD: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// A `%s` argument that does not point at a terminated string.
    BadString(Word),
    /// A width or precision above [`MAX_FIELD`].
    FieldTooWide(usize),
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

/// Format `fmt` against `args`.
///
/// Missing arguments read as zero.
pub fn format(fmt: &[u8], args: &[Word], memory: &Memory) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(fmt.len());
    let mut args = args.iter().copied();
    let mut next_arg = move || args.next().unwrap_or(0);
    let mut i = 0;

    while i < fmt.len() {
        let b = fmt[i];
        i += 1;
        if b != b'%' {
            out.push(b);
            continue;
        }

        let start = i - 1;
        let mut spec = Spec::default();

        while let Some(&flag) = fmt.get(i) {
            match flag {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alt = true,
                _ => break,
            }
            i += 1;
        }

        if fmt.get(i) == Some(&b'*') {
            i += 1;
            let w = next_arg();
            if w < 0 {
                spec.left = true;
            }
            spec.width = w.unsigned_abs();
        } else {
            spec.width = parse_number(fmt, &mut i);
        }

        if fmt.get(i) == Some(&b'.') {
            i += 1;
            if fmt.get(i) == Some(&b'*') {
                i += 1;
                let p = next_arg();
                spec.precision = (p >= 0).then_some(p as usize);
            } else {
                spec.precision = Some(parse_number(fmt, &mut i));
            }
        }

        let field = spec.width.max(spec.precision.unwrap_or(0));
        if field > MAX_FIELD {
            return Err(FormatError::FieldTooWide(field));
        }

        while matches!(fmt.get(i), Some(b'h' | b'l' | b'z' | b'j' | b't' | b'L')) {
            i += 1;
        }

        let Some(&conv) = fmt.get(i) else {
            out.extend_from_slice(&fmt[start..]);
            break;
        };
        i += 1;

        match conv {
            b'd' | b'i' => {
                let value = next_arg();
                let sign = if value < 0 {
                    "-"
                } else if spec.plus {
                    "+"
                } else if spec.space {
                    " "
                } else {
                    ""
                };
                let digits = value.unsigned_abs().to_string();
                pad_number(&mut out, &spec, sign, &digits);
            }
            b'u' => {
                let digits = (next_arg() as usize).to_string();
                pad_number(&mut out, &spec, "", &digits);
            }
            b'x' | b'X' => {
                let value = next_arg() as usize;
                let (digits, prefix) = if conv == b'x' {
                    (format!("{:x}", value), "0x")
                } else {
                    (format!("{:X}", value), "0X")
                };
                let prefix = if spec.alt && value != 0 { prefix } else { "" };
                pad_number(&mut out, &spec, prefix, &digits);
            }
            b'o' => {
                let value = next_arg() as usize;
                let prefix = if spec.alt && value != 0 { "0" } else { "" };
                pad_number(&mut out, &spec, prefix, &format!("{:o}", value));
            }
            b'p' => {
                let digits = format!("{:x}", next_arg() as usize);
                pad_number(&mut out, &spec, "0x", &digits);
            }
            b'c' => {
                let byte = [next_arg() as u8];
                pad_bytes(&mut out, &spec, &byte);
            }
            b's' => {
                let addr = next_arg();
                let s = memory.c_string(addr).ok_or(FormatError::BadString(addr))?;
                let s = match spec.precision {
                    Some(p) if p < s.len() => &s[..p],
                    _ => s,
                };
                pad_bytes(&mut out, &spec, s);
            }
            b'%' => out.push(b'%'),
            _ => out.extend_from_slice(&fmt[start..i]),
        }
    }

    Ok(out)
}

fn parse_number(fmt: &[u8], i: &mut usize) -> usize {
    let mut n: usize = 0;
    while let Some(d) = fmt.get(*i).filter(|b| b.is_ascii_digit()) {
        n = n.saturating_mul(10).saturating_add((d - b'0') as usize);
        *i += 1;
    }
    n
}

/// Emit a numeric conversion: prefix (sign or radix marker), precision
/// zero-extension, then width padding.
fn pad_number(out: &mut Vec<u8>, spec: &Spec, prefix: &str, digits: &str) {
    let digits = match spec.precision {
        Some(0) if digits == "0" => "",
        _ => digits,
    };
    let min_digits = spec.precision.unwrap_or(0);
    let zeros = min_digits.saturating_sub(digits.len());
    let body_len = prefix.len() + zeros + digits.len();
    let fill = spec.width.saturating_sub(body_len);

    if spec.left {
        out.extend_from_slice(prefix.as_bytes());
        out.resize(out.len() + zeros, b'0');
        out.extend_from_slice(digits.as_bytes());
        out.resize(out.len() + fill, b' ');
    } else if spec.zero && spec.precision.is_none() {
        out.extend_from_slice(prefix.as_bytes());
        out.resize(out.len() + fill + zeros, b'0');
        out.extend_from_slice(digits.as_bytes());
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(prefix.as_bytes());
        out.resize(out.len() + zeros, b'0');
        out.extend_from_slice(digits.as_bytes());
    }
}

fn pad_bytes(out: &mut Vec<u8>, spec: &Spec, bytes: &[u8]) {
    let fill = spec.width.saturating_sub(bytes.len());
    if spec.left {
        out.extend_from_slice(bytes);
        out.resize(out.len() + fill, b' ');
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(bytes);
    }
}
