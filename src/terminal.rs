//! Local operator terminal
//!
//! The dispatcher only talks to the terminal through [`Console`] and a byte
//! channel fed by [`spawn_stdin_reader`]. Everything about how the chat pane
//! and the input line look lives here.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

const CLEAR_LINE: &[u8] = b"\x1B[2K\r";
const INPUT_PROMPT: &[u8] = b"> ";

/// Rendering side of the local operator's terminal
pub trait Console: Send {
    /// Show a chat message above the input line
    fn render_line(&mut self, message: &[u8]);

    /// Echo one typed byte on the input line
    fn render_char(&mut self, byte: u8);

    /// Erase the last typed byte from the input line
    fn render_backspace(&mut self);

    /// Start a fresh, empty input line
    fn clear_input(&mut self);
}

/// Console writing to the process's stdout
pub struct StdioConsole {
    out: io::Stdout,
    input: Vec<u8>,
    raw: bool,
}

impl StdioConsole {
    /// `raw` must match the terminal mode: in raw mode line feeds need an
    /// explicit carriage return
    pub fn new(raw: bool) -> Self {
        let mut console = Self {
            out: io::stdout(),
            input: Vec::new(),
            raw,
        };
        console.write(INPUT_PROMPT);
        console
    }

    fn write(&mut self, bytes: &[u8]) {
        let result = self
            .out
            .write_all(bytes)
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            debug!("stdout write failed: {}", e);
        }
    }

    fn write_message(&mut self, message: &[u8]) {
        if !self.raw {
            self.write(message);
            return;
        }
        let mut translated = Vec::with_capacity(message.len() + 8);
        for &b in message {
            if b == b'\n' {
                translated.push(b'\r');
            }
            translated.push(b);
        }
        self.write(&translated);
    }
}

impl Console for StdioConsole {
    fn render_line(&mut self, message: &[u8]) {
        self.write(CLEAR_LINE);
        self.write_message(message);
        self.write(CLEAR_LINE);
        self.write(INPUT_PROMPT);
        let pending = self.input.clone();
        self.write(&pending);
    }

    fn render_char(&mut self, byte: u8) {
        self.input.push(byte);
        self.write(&[byte]);
    }

    fn render_backspace(&mut self) {
        if self.input.pop().is_some() {
            self.write(b"\x08 \x08");
        }
    }

    fn clear_input(&mut self) {
        self.input.clear();
        self.write(CLEAR_LINE);
        self.write(INPUT_PROMPT);
    }
}

/// Console that records chat output in memory; clones share the record
#[derive(Debug, Clone, Default)]
pub struct CaptureConsole {
    output: Arc<Mutex<Vec<u8>>>,
    input: Arc<Mutex<Vec<u8>>>,
}

impl CaptureConsole {
    /// Everything rendered through `render_line` so far
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().map(|out| out.clone()).unwrap_or_default()
    }

    /// Current contents of the input line
    pub fn input_line(&self) -> Vec<u8> {
        self.input.lock().map(|line| line.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        let output = self.output();
        needle.is_empty() || output.windows(needle.len()).any(|w| w == needle)
    }
}

impl Console for CaptureConsole {
    fn render_line(&mut self, message: &[u8]) {
        if let Ok(mut out) = self.output.lock() {
            out.extend_from_slice(message);
        }
    }

    fn render_char(&mut self, byte: u8) {
        if let Ok(mut line) = self.input.lock() {
            line.push(byte);
        }
    }

    fn render_backspace(&mut self) {
        if let Ok(mut line) = self.input.lock() {
            line.pop();
        }
    }

    fn clear_input(&mut self) {
        if let Ok(mut line) = self.input.lock() {
            line.clear();
        }
    }
}

/// Puts the terminal in raw mode for as long as it lives
pub struct RawModeGuard(());

impl RawModeGuard {
    /// Enable raw mode when stdin is an interactive terminal; `None` otherwise
    pub fn enable() -> io::Result<Option<Self>> {
        if !io::stdin().is_terminal() {
            return Ok(None);
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Some(Self(())))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Forward stdin one byte at a time. Runs on a plain thread because a
/// blocking terminal read must not hold up runtime shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<u8>> {
    let (tx, rx) = mpsc::channel(256);

    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 64];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if tx.blocking_send(Ok(byte)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
        debug!("stdin reader finished");
    });

    rx
}
