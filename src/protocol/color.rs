//! Display colors and their ANSI escapes

use std::fmt;

/// ANSI escape that resets all attributes
pub const RESET: &str = "\x1B[0m";

/// Display color of a participant
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    /// Reserved for server-originated messages
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    White = 7,
}

impl Color {
    /// Colors a peer may pick during admission, in prompt order
    pub const SELECTABLE: [Color; 6] = [
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Map a peer's reply onto a selectable color, ignoring case and
    /// surrounding whitespace
    pub fn parse(reply: &str) -> Option<Color> {
        let normalized = reply.trim().to_lowercase();
        Self::SELECTABLE
            .iter()
            .copied()
            .find(|color| color.name() == normalized)
    }

    /// Lower-case name as typed by peers
    pub fn name(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
        }
    }

    pub fn escape(&self) -> &'static str {
        match self {
            Color::Red => "\x1B[31m",
            Color::Green => "\x1B[32m",
            Color::Yellow => "\x1B[33m",
            Color::Blue => "\x1B[34m",
            Color::Magenta => "\x1B[35m",
            Color::Cyan => "\x1B[36m",
            Color::White => "\x1B[37m",
        }
    }

    /// `text` wrapped in this color and a reset
    pub fn paint(&self, text: &str) -> String {
        format!("{}{}{}", self.escape(), text, RESET)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
