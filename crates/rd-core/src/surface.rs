//! Render targets for shell output.

use std::io::{self, Write};

use crate::style::Style;

/// Where shell output lands and where terminal geometry comes from.
pub trait Surface: Send {
    /// Measure the current size as `(cols, rows)`.
    fn fit(&mut self) -> (u16, u16);

    /// Write terminal bytes verbatim.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Show a transient notice outside the shell's screen, or clear it.
    fn banner(&mut self, text: Option<&str>) -> io::Result<()>;
}

const TITLE: &str = "relaydeck";

/// The local terminal. Notices go to the window title so the remote
/// screen is never overdrawn.
pub struct HostTerminal<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> HostTerminal<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Surface for HostTerminal<W> {
    fn fit(&mut self) -> (u16, u16) {
        crossterm::terminal::size().unwrap_or((80, 24))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn banner(&mut self, text: Option<&str>) -> io::Result<()> {
        let title = match text {
            Some(text) => format!("{TITLE} ! {text}"),
            None => TITLE.to_string(),
        };
        crossterm::execute!(self.out, crossterm::terminal::SetTitle(title))
    }
}

/// In-memory surface with a settable size.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    pub output: Vec<u8>,
    pub size: (u16, u16),
    pub fits: usize,
    pub banner: Option<String>,
}

impl MemorySurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            output: Vec::new(),
            size: (cols, rows),
            fits: 0,
            banner: None,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Surface for MemorySurface {
    fn fit(&mut self) -> (u16, u16) {
        self.fits += 1;
        self.size
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn banner(&mut self, text: Option<&str>) -> io::Result<()> {
        self.banner = text.map(str::to_string);
        Ok(())
    }
}

/// A red marker line for the shell output buffer.
pub fn failure_line(style: &Style, message: &str) -> String {
    format!(
        "\r\n{}✗ {}{}\r\n",
        style.red_start(),
        message.replace('\n', " "),
        style.reset()
    )
}

/// Convert bare `\n` to `\r\n` for a raw-mode terminal.
pub fn raw_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}
