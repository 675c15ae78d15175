//! Line-oriented serial endpoints
//!
//! Both operations open the endpoint, do their work and close it again, so a
//! port that disappears between cycles only costs that cycle.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::PortKind;

/// Read timeout for one drain of a serial device
const TTY_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Upper bound on bytes taken from a device in one receive cycle
const TTY_MAX_READ: usize = 64 * 1024;

/// Longest unterminated line kept between receive cycles
const TTY_MAX_PARTIAL: usize = TTY_MAX_READ;

/// A line-oriented endpoint
pub trait LinePort: Send + Sync {
    /// Open, write `line` plus a terminator, close
    fn send_line(&self, line: &str) -> io::Result<()>;

    /// Open, take every complete line that arrived since the last call, close
    fn receive_lines(&self) -> io::Result<Vec<String>>;

    /// Human-readable endpoint name for logs
    fn name(&self) -> String;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Split `buf` into complete lines, returning them and the byte count consumed.
///
/// Bytes after the last `\n` are a partial line and are not consumed.
fn split_complete_lines(buf: &[u8]) -> (Vec<String>, usize) {
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return (Vec::new(), 0);
    };
    let lines = buf[..last_newline]
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.trim().is_empty())
        .collect();
    (lines, last_newline + 1)
}

/// Take the complete lines out of `partial`, keeping any trailing fragment.
///
/// A fragment longer than `limit` is discarded. That is an error when it
/// was the only thing received, otherwise it is logged and the complete
/// lines are still returned.
fn drain_lines(partial: &mut Vec<u8>, limit: usize) -> io::Result<Vec<String>> {
    let (lines, consumed) = split_complete_lines(partial);
    partial.drain(..consumed);

    if partial.len() > limit {
        let dropped = partial.len();
        partial.clear();
        if lines.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("discarded {} bytes without a line terminator", dropped),
            ));
        }
        log::warn!("[RS232 RX] discarded {} bytes without a line terminator", dropped);
    }
    Ok(lines)
}

/// Build the endpoint for `path` according to `kind`
pub fn open_port(kind: PortKind, path: &str) -> Arc<dyn LinePort> {
    match kind {
        PortKind::File => Arc::new(FilePort::new(path)),
        PortKind::Tty { baud_rate } => Arc::new(TtyPort::new(path, baud_rate)),
    }
}

// ============================================================================
// Regular file
// ============================================================================

/// Endpoint backed by a regular file.
///
/// Sends append. Receives remember how far they have read, so each call
/// returns only lines that are new; a trailing line without its terminator
/// waits for the next call. If the file shrinks below the remembered offset
/// it was truncated and reading restarts from the top.
#[derive(Debug)]
pub struct FilePort {
    path: PathBuf,
    offset: Mutex<u64>,
}

impl FilePort {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LinePort for FilePort {
    fn send_line(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per line keeps concurrent appenders from interleaving
        file.write_all(format!("{}\n", line).as_bytes())
    }

    fn receive_lines(&self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            // Nothing has been written yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} is not a regular file; configure it as a tty port",
                    self.path.display()
                ),
            ));
        }

        let mut offset = lock(&self.offset);
        if metadata.len() < *offset {
            log::info!("[RS232] {} was truncated, reading from start", self.path.display());
            *offset = 0;
        }

        file.seek(SeekFrom::Start(*offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let (lines, consumed) = split_complete_lines(&buf);
        *offset += consumed as u64;
        Ok(lines)
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// Serial device
// ============================================================================

/// Endpoint backed by a serial device (real UART, USB adapter or pty)
#[derive(Debug)]
pub struct TtyPort {
    path: String,
    baud_rate: u32,
    partial: Mutex<Vec<u8>>,
}

impl TtyPort {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            partial: Mutex::new(Vec::new()),
        }
    }

    fn open(&self) -> io::Result<Box<dyn serialport::SerialPort>> {
        serialport::new(&self.path, self.baud_rate)
            .timeout(TTY_READ_TIMEOUT)
            .open()
            .map_err(io::Error::from)
    }
}

impl LinePort for TtyPort {
    fn send_line(&self, line: &str) -> io::Result<()> {
        let mut port = self.open()?;
        port.write_all(format!("{}\r\n", line).as_bytes())?;
        port.flush()
    }

    fn receive_lines(&self) -> io::Result<Vec<String>> {
        let mut port = self.open()?;
        let mut partial = lock(&self.partial);
        let mut chunk = [0u8; 1024];
        let mut taken = 0;

        while taken < TTY_MAX_READ {
            match port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    partial.extend_from_slice(&chunk[..n]);
                    taken += n;
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        drain_lines(&mut partial, TTY_MAX_PARTIAL)
    }

    fn name(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_holds_back_partial_line() {
        let (lines, consumed) = split_complete_lines(b"one\r\ntwo\nthr");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(consumed, 9);

        let (lines, consumed) = split_complete_lines(b"no newline");
        assert!(lines.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_unterminated_stream_is_bounded() {
        let mut partial = vec![b'x'; 40];
        let err = drain_lines(&mut partial, 32).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(partial.is_empty());

        let mut partial = b"$GPHDT,045.0,T*34\n".to_vec();
        partial.extend_from_slice(&[b'x'; 40]);
        assert_eq!(drain_lines(&mut partial, 32).unwrap(), vec!["$GPHDT,045.0,T*34"]);
        assert!(partial.is_empty());

        let mut partial = b"one\ntw".to_vec();
        assert_eq!(drain_lines(&mut partial, 32).unwrap(), vec!["one"]);
        assert_eq!(partial, b"tw");
    }

    #[test]
    fn test_file_port_returns_only_new_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.log");
        let writer = FilePort::new(&path);
        let reader = FilePort::new(&path);

        assert!(reader.receive_lines().unwrap().is_empty());

        writer.send_line("first").unwrap();
        writer.send_line("second").unwrap();
        assert_eq!(reader.receive_lines().unwrap(), vec!["first", "second"]);

        writer.send_line("third").unwrap();
        assert_eq!(reader.receive_lines().unwrap(), vec!["third"]);
        assert!(reader.receive_lines().unwrap().is_empty());
    }

    #[test]
    fn test_file_port_waits_for_line_terminator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.log");
        let reader = FilePort::new(&path);

        std::fs::write(&path, "$GPHDT,1").unwrap();
        assert!(reader.receive_lines().unwrap().is_empty());

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"0.0,T*00\n").unwrap();
        assert_eq!(reader.receive_lines().unwrap(), vec!["$GPHDT,10.0,T*00"]);
    }

    #[test]
    fn test_file_port_rewinds_after_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial.log");
        let reader = FilePort::new(&path);

        std::fs::write(&path, "a long first line\n").unwrap();
        assert_eq!(reader.receive_lines().unwrap().len(), 1);

        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(reader.receive_lines().unwrap(), vec!["short"]);
    }

    #[test]
    fn test_open_port_selects_implementation() {
        let port = open_port(PortKind::File, "/tmp/x.log");
        assert_eq!(port.name(), "/tmp/x.log");

        let port = open_port(PortKind::Tty { baud_rate: 4800 }, "/dev/ttyS9");
        assert_eq!(port.name(), "/dev/ttyS9 @ 4800 baud");
    }
}
