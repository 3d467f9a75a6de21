//! Line editing for keystrokes typed at the server's terminal

use bytes::{BufMut, Bytes, BytesMut};

/// Longest line the operator can type
pub const MAX_LOCAL_LINE: usize = 254;

const INTERRUPT: u8 = 3;
const BACKSPACE: u8 = 8;
const DELETE: u8 = 127;
const LINE_FEED: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// What the dispatcher should do after one keystroke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Ctrl-C: stop the server
    Interrupt,
    /// A complete line, newline included, ready to broadcast
    Submit(Bytes),
    /// Enter on a blank line; nothing to send
    Discard,
    /// Last character removed
    Erase,
    /// Character appended
    Echo(u8),
    /// Nothing changed
    Ignore,
}

/// Accumulates one line of local input
#[derive(Debug)]
pub struct LineEditor {
    buf: BytesMut,
    cap: usize,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOCAL_LINE)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap + 1),
            cap,
        }
    }

    pub fn feed(&mut self, byte: u8) -> KeyAction {
        match byte {
            INTERRUPT => KeyAction::Interrupt,
            LINE_FEED | CARRIAGE_RETURN => {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    self.buf.clear();
                    return KeyAction::Discard;
                }
                let mut line = self.buf.split();
                line.put_u8(b'\n');
                KeyAction::Submit(line.freeze())
            }
            DELETE | BACKSPACE => {
                if self.buf.is_empty() {
                    KeyAction::Ignore
                } else {
                    self.buf.truncate(self.buf.len() - 1);
                    KeyAction::Erase
                }
            }
            _ if self.buf.len() < self.cap => {
                self.buf.put_u8(byte);
                KeyAction::Echo(byte)
            }
            _ => KeyAction::Ignore,
        }
    }

    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(editor: &mut LineEditor, text: &str) {
        for b in text.bytes() {
            editor.feed(b);
        }
    }

    #[test]
    fn test_submit_line() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "hello");

        assert_eq!(
            editor.feed(b'\n'),
            KeyAction::Submit(Bytes::from_static(b"hello\n"))
        );
        assert!(editor.pending().is_empty());
    }

    #[test]
    fn test_carriage_return_submits() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "raw");
        assert_eq!(
            editor.feed(b'\r'),
            KeyAction::Submit(Bytes::from_static(b"raw\n"))
        );
    }

    #[test]
    fn test_blank_lines_are_discarded() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(b'\n'), KeyAction::Discard);

        type_str(&mut editor, "   ");
        assert_eq!(editor.feed(b'\n'), KeyAction::Discard);
        assert!(editor.pending().is_empty());
    }

    #[test]
    fn test_backspace() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(DELETE), KeyAction::Ignore);

        type_str(&mut editor, "ab");
        assert_eq!(editor.feed(DELETE), KeyAction::Erase);
        assert_eq!(editor.feed(BACKSPACE), KeyAction::Erase);
        assert_eq!(editor.feed(DELETE), KeyAction::Ignore);
    }

    #[test]
    fn test_interrupt() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abc");
        assert_eq!(editor.feed(3), KeyAction::Interrupt);
    }

    #[test]
    fn test_cap() {
        let mut editor = LineEditor::with_capacity(3);
        assert_eq!(editor.feed(b'a'), KeyAction::Echo(b'a'));
        type_str(&mut editor, "bc");
        assert_eq!(editor.feed(b'd'), KeyAction::Ignore);
        assert_eq!(editor.pending(), b"abc");
    }
}
