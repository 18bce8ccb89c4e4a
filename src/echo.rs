//! Console echo of received and keyed characters.
//!
//! The echo stream is what an operator watches while the keyer is sending:
//! each character is printed as it starts keying, unencodable characters
//! show up as `?`, and control messages are shown as `ESC <body>`.
//! Writes are best-effort; a broken console never stops keying.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Shown in place of a character with no Morse code.
pub const UNENCODABLE_MARK: u8 = b'?';

/// Best-effort writer for the echo stream.
pub struct Diagnostics {
    out: Box<dyn Write + Send>,
}

impl Diagnostics {
    /// Echo to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Echo to an arbitrary writer.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Write bytes and flush, ignoring errors.
    pub fn echo(&mut self, bytes: &[u8]) {
        let _ = self.out.write_all(bytes);
        let _ = self.out.flush();
    }

    /// Echo a control message as `ESC <body>`.
    pub fn control(&mut self, body: &[u8]) {
        let mut line = Vec::with_capacity(body.len() + 5);
        line.extend_from_slice(b"ESC ");
        line.extend_from_slice(body);
        line.push(b'\n');
        self.echo(&line);
    }

    /// Mark a character that could not be encoded.
    pub fn unencodable(&mut self) {
        self.echo(&[UNENCODABLE_MARK]);
    }

    /// Terminate the current line.
    pub fn end_line(&mut self) {
        self.echo(b"\n");
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}

/// A cloneable in-memory writer.
///
/// Handy for capturing the echo stream or the keyed units.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Everything written so far, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::other("buffer lock poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
