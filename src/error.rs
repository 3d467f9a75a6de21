//! Error handling for the chat server

use std::fmt;
use std::io;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Peer disconnected; always recoverable by discarding the session
    ConnectionClosed(String),
    /// No free registry slot
    CapacityExceeded(String),
    /// Send/receive failure that does not indicate closure
    TransientIo(String),
    /// The dispatch loop cannot continue
    FatalReactor(String),
    /// No registry entry for the connection
    NotFound(String),
    /// Peer sent something the handshake cannot use
    Protocol(String),
    /// Configuration error
    Config(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Process exit code used when this error ends the program
    pub fn exit_code(&self) -> u8 {
        match self {
            ChatError::FatalReactor(_) => 4,
            ChatError::Config(_) => 2,
            _ => 1,
        }
    }

    /// Whether the server keeps running after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ChatError::FatalReactor(_) | ChatError::Config(_))
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::ConnectionClosed(msg) => msg,
            ChatError::CapacityExceeded(msg) => msg,
            ChatError::TransientIo(msg) => msg,
            ChatError::FatalReactor(msg) => msg,
            ChatError::NotFound(msg) => msg,
            ChatError::Protocol(msg) => msg,
            ChatError::Config(msg) => msg,
            ChatError::Internal(msg) => msg,
        }
    }

    pub fn connection_closed<T: Into<String>>(msg: T) -> Self {
        ChatError::ConnectionClosed(msg.into())
    }

    pub fn capacity_exceeded<T: Into<String>>(msg: T) -> Self {
        ChatError::CapacityExceeded(msg.into())
    }

    pub fn transient_io<T: Into<String>>(msg: T) -> Self {
        ChatError::TransientIo(msg.into())
    }

    pub fn fatal_reactor<T: Into<String>>(msg: T) -> Self {
        ChatError::FatalReactor(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::NotFound(msg.into())
    }

    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::ConnectionClosed(msg) => write!(f, "Connection closed: {}", msg),
            ChatError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            ChatError::TransientIo(msg) => write!(f, "I/O error: {}", msg),
            ChatError::FatalReactor(msg) => write!(f, "Fatal reactor error: {}", msg),
            ChatError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ChatError::ConnectionClosed(err.to_string()),
            _ => ChatError::TransientIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Config(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            ChatError::from(reset),
            ChatError::ConnectionClosed(_)
        ));

        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert!(matches!(ChatError::from(eof), ChatError::ConnectionClosed(_)));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(ChatError::from(other), ChatError::TransientIo(_)));
    }

    #[test]
    fn test_recoverability() {
        assert!(ChatError::capacity_exceeded("full").is_recoverable());
        assert!(ChatError::connection_closed("gone").is_recoverable());
        assert!(!ChatError::fatal_reactor("select failed").is_recoverable());
        assert_eq!(ChatError::fatal_reactor("x").exit_code(), 4);
    }

    #[test]
    fn test_display() {
        let err = ChatError::not_found("abc");
        assert_eq!(err.to_string(), "Not found: abc");
        assert_eq!(err.message(), "abc");
    }
}
