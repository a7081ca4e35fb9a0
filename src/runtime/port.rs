use core::fmt;
use std::{
    io::{self, BufRead, BufReader, Write},
    sync::{Arc, Mutex},
};

// I/O ports that provide a threadsafe way to exchange text with the machine
pub trait Writeable: Write + Send {}
impl<T: Write + Send> Writeable for T {}

pub trait Readable: BufRead + Send {}
impl<T: BufRead + Send> Readable for T {}

fn closed(which: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{which} port was closed"))
}

fn poisoned(which: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{which} port was poisoned"))
}

/// Where `PRINT` writes to.
///
/// The inner writer is shared, so a caller can keep a handle to it (a
/// `Vec<u8>` in tests, for instance) and inspect what was written.
#[derive(Clone)]
pub struct OutputPort {
    pub port: Option<Arc<Mutex<dyn Writeable>>>,
}

impl OutputPort {
    pub fn new(writer: impl Writeable + 'static) -> Self {
        Self {
            port: Some(Arc::new(Mutex::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// A port that discards everything
    pub fn sink() -> Self {
        Self::new(io::sink())
    }

    pub fn close(&mut self) -> Option<Arc<Mutex<dyn Writeable>>> {
        self.port.take()
    }
}

impl<T: Writeable + 'static> From<Arc<Mutex<T>>> for OutputPort {
    fn from(port: Arc<Mutex<T>>) -> Self {
        Self { port: Some(port) }
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "#<output port {:p}>", Arc::as_ptr(port)),
            None => write!(f, "#<output port (closed)>"),
        }
    }
}

impl Write for OutputPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let port = self.port.as_ref().ok_or_else(|| closed("output"))?;
        let mut writer = port.lock().map_err(|_| poisoned("output"))?;
        writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let port = self.port.as_ref().ok_or_else(|| closed("output"))?;
        let mut writer = port.lock().map_err(|_| poisoned("output"))?;
        writer.flush()
    }
}

/// Where `INPUT` reads lines from.
#[derive(Clone)]
pub struct InputPort {
    pub port: Option<Arc<Mutex<dyn Readable>>>,
}

impl InputPort {
    pub fn new(reader: impl Readable + 'static) -> Self {
        Self {
            port: Some(Arc::new(Mutex::new(reader))),
        }
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }

    /// A port that is always at end of input
    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    /// Input read from a fixed text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(io::Cursor::new(text.into().into_bytes()))
    }

    pub fn close(&mut self) -> Option<Arc<Mutex<dyn Readable>>> {
        self.port.take()
    }

    /// Reads one line without its terminator (`\n` or `\r\n`).
    ///
    /// Returns `None` once the input is exhausted.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let port = self.port.as_ref().ok_or_else(|| closed("input"))?;
        let mut reader = port.lock().map_err(|_| poisoned("input"))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl<T: Readable + 'static> From<Arc<Mutex<T>>> for InputPort {
    fn from(port: Arc<Mutex<T>>) -> Self {
        Self { port: Some(port) }
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "#<input port {:p}>", Arc::as_ptr(port)),
            None => write!(f, "#<input port (closed)>"),
        }
    }
}
