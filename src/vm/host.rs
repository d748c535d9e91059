//! Host operations reachable from running code.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};

use tracing::{debug, warn};

use super::Word;

/// First descriptor handed out by [`StdHost::open`]; 0-2 are the standard
/// streams.
const FIRST_FILE_FD: Word = 3;

/// The services behind the host-call opcodes.
///
/// Failures are reported the way POSIX does: a negative return value, never
/// a panic or a trap.
pub trait Host {
    /// Open `path` with POSIX-style `flags`. Returns a descriptor or -1.
    fn open(&mut self, path: &[u8], flags: Word) -> Word;

    /// Read up to `buf.len()` bytes from `fd`. Returns the count or -1.
    fn read(&mut self, fd: Word, buf: &mut [u8]) -> Word;

    /// Close `fd`. Returns 0 or -1.
    fn close(&mut self, fd: Word) -> Word;

    /// Sink for formatted output.
    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Host backed by the real file system and a caller-chosen output stream.
pub struct StdHost<W = io::Stdout> {
    output: W,
    files: HashMap<Word, File>,
    next_fd: Word,
}

impl StdHost {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> StdHost<W> {
    /// Create a host that writes formatted output to `output`.
    pub fn with_output(output: W) -> Self {
        Self {
            output,
            files: HashMap::new(),
            next_fd: FIRST_FILE_FD,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Number of descriptors currently open.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}

fn open_options(flags: Word) -> OpenOptions {
    let flags = flags as libc::c_int;
    let mut options = OpenOptions::new();
    match flags & (libc::O_RDONLY | libc::O_WRONLY | libc::O_RDWR) {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    if flags & libc::O_APPEND != 0 {
        options.append(true);
    }
    if flags & libc::O_CREAT != 0 {
        options.create(true);
    }
    if flags & libc::O_TRUNC != 0 {
        options.truncate(true);
    }
    options
}

impl<W: Write> Host for StdHost<W> {
    fn open(&mut self, path: &[u8], flags: Word) -> Word {
        let Ok(path) = std::str::from_utf8(path) else {
            warn!("open: path is not valid UTF-8");
            return -1;
        };
        match open_options(flags).open(path) {
            Ok(file) => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, file);
                debug!(path, flags, fd, "open");
                fd
            }
            Err(e) => {
                warn!(path, flags, error = %e, "open failed");
                -1
            }
        }
    }

    fn read(&mut self, fd: Word, buf: &mut [u8]) -> Word {
        let result = match fd {
            0 => io::stdin().read(buf),
            _ => match self.files.get_mut(&fd) {
                Some(file) => file.read(buf),
                None => {
                    warn!(fd, "read from unknown descriptor");
                    return -1;
                }
            },
        };
        match result {
            Ok(n) => n as Word,
            Err(e) => {
                warn!(fd, error = %e, "read failed");
                -1
            }
        }
    }

    fn close(&mut self, fd: Word) -> Word {
        if (0..FIRST_FILE_FD).contains(&fd) {
            return 0;
        }
        match self.files.remove(&fd) {
            Some(_) => 0,
            None => {
                warn!(fd, "close of unknown descriptor");
                -1
            }
        }
    }

    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.write_all(bytes)?;
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_captured() {
        let mut host = StdHost::with_output(Vec::new());
        host.write_output(b"hello").unwrap();
        assert_eq!(host.output(), b"hello");
    }

    #[test]
    fn test_open_read_close() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"contents").unwrap();
        let path = file.path().to_str().unwrap().as_bytes().to_vec();

        let mut host = StdHost::with_output(Vec::new());
        let fd = host.open(&path, libc::O_RDONLY as Word);
        assert_eq!(fd, FIRST_FILE_FD);

        let mut buf = [0u8; 4];
        assert_eq!(host.read(fd, &mut buf), 4);
        assert_eq!(&buf, b"cont");
        assert_eq!(host.close(fd), 0);
        assert_eq!(host.open_files(), 0);
    }

    #[test]
    fn test_failures_are_negative() {
        let mut host = StdHost::with_output(Vec::new());
        assert_eq!(host.open(b"/nonexistent/yvm/file", 0), -1);
        assert_eq!(host.read(42, &mut [0u8; 1]), -1);
        assert_eq!(host.close(42), -1);
        assert_eq!(host.open(&[0xff, 0xfe], 0), -1);
    }

    #[test]
    fn test_create_and_write_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.txt");
        let mut host = StdHost::with_output(Vec::new());
        let flags = (libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC) as Word;
        let fd = host.open(path.to_str().unwrap().as_bytes(), flags);
        assert!(fd >= FIRST_FILE_FD);
        assert!(path.exists());
        assert_eq!(host.close(fd), 0);
    }
}
