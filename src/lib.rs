//! TCP text chat server with a local operator console
//!
//! One process accepts many concurrent TCP connections, admits each through a
//! name/color handshake, and fans chat lines out to every admitted peer. The
//! operator typing at the server's terminal takes part as a virtual
//! participant.
//!
//! ## Architecture
//!
//! ```text
//!  TcpListener ──accept──> admission worker (one task per connection)
//!       │                        │ handshake over the raw socket
//!       │                        v
//!       │                  Wakeup channel ──Admit──┐
//!       v                                          v
//!  +-------------------------------------------------------+
//!  | Dispatcher (single task, tokio::select!)               |
//!  |   owns Registry + watch-set, drives Broadcast fan-out  |
//!  +-------------------------------------------------------+
//!       ^                    │
//!   local keystrokes       Console (stdout)
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod terminal;

pub use client::ChatClient;
pub use error::{ChatError, Result};
pub use protocol::color::Color;
pub use server::ChatServer;

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 54060;

/// Maximum number of concurrently admitted users
pub const DEFAULT_CAPACITY: usize = 10;

/// Size of the name buffer, including the terminator
pub const MAX_USERNAME_LENGTH: usize = 20;

/// Largest single read, prompt or chat line on the wire
pub const MAX_DATA_SIZE: usize = 512;

/// Chat server configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Maximum number of concurrently admitted users
    pub capacity: usize,
    /// Display names are truncated to `max_username_length - 1` bytes
    pub max_username_length: usize,
    /// Maximum handshake token / chat line size in bytes
    pub max_line_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            max_username_length: MAX_USERNAME_LENGTH,
            max_line_length: MAX_DATA_SIZE,
        }
    }
}

impl ChatConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChatError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ChatConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ChatError::config("capacity must be at least 1"));
        }
        if self.max_username_length < 2 {
            return Err(ChatError::config("max_username_length must be at least 2"));
        }
        if self.max_line_length < 16 {
            return Err(ChatError::config("max_line_length must be at least 16"));
        }
        Ok(())
    }

    /// Candidate listen addresses, dual-stack first
    pub fn bind_candidates(&self) -> [SocketAddr; 2] {
        [
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.port)),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)),
        ]
    }
}

/// Identity of one accepted connection for as long as it stays open
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to tell sessions apart in logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// An admitted chat participant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub connection: ConnectionId,
    pub name: String,
    pub color: Color,
}

impl User {
    pub fn new(connection: ConnectionId, name: String, color: Color) -> Self {
        Self {
            connection,
            name,
            color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.port, 54060);
        assert_eq!(config.capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = ChatConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ChatError::Config(_))));

        let config = ChatConfig {
            max_username_length: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json_file() {
        let path = std::env::temp_dir().join(format!("parlor-{}.json", ConnectionId::new()));
        std::fs::write(&path, r#"{ "port": 6000, "capacity": 2 }"#).unwrap();

        let config = ChatConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.capacity, 2);
        assert_eq!(config.max_username_length, MAX_USERNAME_LENGTH);
    }

    #[test]
    fn test_bind_candidates_prefer_dual_stack() {
        let config = ChatConfig {
            port: 7000,
            ..Default::default()
        };
        let [first, second] = config.bind_candidates();
        assert!(first.is_ipv6());
        assert!(second.is_ipv4());
        assert_eq!(second.port(), 7000);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }
}
