//! Prompts, markers and message formats exchanged with peers

use bytes::{BufMut, Bytes, BytesMut};

use super::color::{Color, RESET};
use crate::User;

/// First handshake byte when a slot is free; peers treat anything else as a
/// refusal notice
pub const PROCEED_MARKER: &[u8] = b"0\0";

/// Color reply not recognized, a retry prompt follows
pub const REJECT_MARKER: &[u8] = b"0\0";

/// Color reply accepted
pub const ACCEPT_MARKER: &[u8] = b"1\0";

/// Acknowledgement a peer sends to advance a step
pub const ACK: &[u8] = b"1\0";

pub const SERVER_FULL_NOTICE: &str = "Sorry, the server is currently full.";
pub const NAME_PROMPT: &str = "Enter desired username:";
pub const RETRY_COLOR_PROMPT: &str = "That's not a recognized color! Try again: ";
pub const JOINED_NOTICE: &str = "You have joined the server.";

/// Encode a prompt or notice as a NUL-terminated handshake token
pub fn token(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Color question addressed to the candidate name, listing every choice in
/// its own color
pub fn color_prompt(name: &str) -> String {
    let choices = Color::SELECTABLE
        .iter()
        .map(|color| color.paint(&color.name().to_uppercase()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Welcome, {}! Choose a display color. Your options are {}: ",
        name, choices
    )
}

pub fn join_notice(user: &User) -> Bytes {
    Bytes::from(format!("{} has joined.\n", user.color.paint(&user.name)))
}

pub fn leave_notice(user: &User) -> Bytes {
    Bytes::from(format!("{} has left.\n", user.color.paint(&user.name)))
}

/// Prefix a received line with its sender's colored name
pub fn chat_line(user: &User, line: &[u8]) -> Bytes {
    let prefix = format!("{}: ", user.color.paint(&user.name));
    let mut buf = BytesMut::with_capacity(prefix.len() + line.len());
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(line);
    buf.freeze()
}

/// Line typed by the local operator, as seen by everyone
pub fn server_line(text: &[u8]) -> Bytes {
    let prefix = format!("{}SERVER:{} ", Color::Red.escape(), RESET);
    let mut buf = BytesMut::with_capacity(prefix.len() + text.len() + 1);
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(text);
    if text.last() != Some(&b'\n') {
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

/// Cut a requested name down to the name buffer, keeping whole characters
pub fn bounded_name(raw: &str, max_username_length: usize) -> String {
    let limit = max_username_length.saturating_sub(1);
    if raw.len() <= limit {
        return raw.to_string();
    }
    let mut end = limit;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionId;

    fn alice() -> User {
        User::new(ConnectionId::new(), "alice".to_string(), Color::Green)
    }

    #[test]
    fn test_token_is_nul_terminated() {
        assert_eq!(token("abc"), Bytes::from_static(b"abc\0"));
        assert_eq!(PROCEED_MARKER.len(), 2);
        assert_eq!(ACCEPT_MARKER, b"1\0");
    }

    #[test]
    fn test_join_and_leave_notices() {
        let user = alice();
        assert_eq!(
            join_notice(&user),
            Bytes::from_static(b"\x1B[32malice\x1B[0m has joined.\n")
        );
        assert_eq!(
            leave_notice(&user),
            Bytes::from_static(b"\x1B[32malice\x1B[0m has left.\n")
        );
    }

    #[test]
    fn test_chat_line_format() {
        let line = chat_line(&alice(), b"hi\n");
        assert_eq!(line, Bytes::from_static(b"\x1B[32malice\x1B[0m: hi\n"));
    }

    #[test]
    fn test_server_line_adds_newline_once() {
        assert_eq!(
            server_line(b"hello"),
            Bytes::from_static(b"\x1B[31mSERVER:\x1B[0m hello\n")
        );
        assert_eq!(server_line(b"hello\n"), server_line(b"hello"));
    }

    #[test]
    fn test_color_prompt_mentions_name_and_choices() {
        let prompt = color_prompt("bob");
        assert!(prompt.starts_with("Welcome, bob!"));
        for color in Color::SELECTABLE {
            assert!(prompt.contains(&color.name().to_uppercase()));
        }
    }

    #[test]
    fn test_bounded_name() {
        assert_eq!(bounded_name("alice", 20), "alice");
        assert_eq!(bounded_name("abcdefghijklmnopqrstuvwxyz", 20).len(), 19);
        // 'é' is two bytes; never split it
        assert_eq!(bounded_name("ééé", 5), "éé");
    }
}
