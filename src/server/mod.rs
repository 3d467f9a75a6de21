//! Chat server
//!
//! ## Layout
//!
//! - [`admission`]: per-connection handshake workers
//! - [`dispatcher`]: the single task owning all shared state
//! - [`registry`]: admitted users, capped at the configured capacity
//! - [`broadcast`]: fan-out of one message to the console and every peer
//! - [`wakeup`]: how workers hand results to the dispatcher
//! - [`local_input`]: line editing for the operator's keystrokes

pub mod admission;
pub mod broadcast;
pub mod dispatcher;
pub mod local_input;
pub mod registry;
pub mod wakeup;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ChatConfig;
use crate::error::{ChatError, Result};
use crate::terminal::Console;

pub use dispatcher::{Dispatcher, LocalInput, ReactorEvent};
pub use registry::{CapacityGauge, Registry};
pub use wakeup::Waker;

/// A bound chat server, ready to run
pub struct ChatServer {
    listener: TcpListener,
    config: ChatConfig,
    registry: Registry<OwnedWriteHalf>,
    waker: Waker<ReactorEvent>,
    wakeup: wakeup::WakeupReceiver<ReactorEvent>,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Bind the configured port on every interface, IPv6 first
    pub async fn bind(config: ChatConfig) -> Result<Self> {
        config.validate()?;

        let mut last_error = None;
        for addr in config.bind_candidates() {
            match TcpListener::bind(addr).await {
                Ok(listener) => return Ok(Self::from_listener(listener, config)),
                Err(e) => {
                    warn!("Failed to bind {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ChatError::config(format!(
            "Failed to bind port {}: {}",
            config.port,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Bind one specific address
    pub async fn bind_to(addr: SocketAddr, config: ChatConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ChatError::config(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self::from_listener(listener, config))
    }

    pub fn from_listener(listener: TcpListener, config: ChatConfig) -> Self {
        let registry = Registry::new(config.capacity);
        let (waker, wakeup) = wakeup::channel();
        Self {
            listener,
            config,
            registry,
            waker,
            wakeup,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Live view of how many slots are taken
    pub fn gauge(&self) -> CapacityGauge {
        self.registry.gauge()
    }

    /// Handle for queueing [`ReactorEvent::Announce`] from other tasks
    pub fn announcer(&self) -> Waker<ReactorEvent> {
        self.waker.clone()
    }

    /// Cancelling this token stops [`ChatServer::run`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> ServerStats {
        let gauge = self.gauge();
        ServerStats {
            connected_clients: gauge.occupied(),
            bind_address: self.listener.local_addr().ok(),
            max_connections: gauge.capacity(),
        }
    }

    /// Serve until interrupted. `local_input` carries the operator's raw
    /// keystrokes; pass `None` for a headless server.
    pub async fn run<C: Console>(self, console: C, local_input: Option<LocalInput>) -> Result<()> {
        info!(
            "Chat server listening on {:?} (capacity {})",
            self.listener.local_addr().ok(),
            self.config.capacity
        );
        Dispatcher::new(
            self.listener,
            self.config,
            self.registry,
            self.wakeup,
            self.waker,
            console,
            local_input,
            self.shutdown,
        )
        .run()
        .await
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub connected_clients: usize,
    pub bind_address: Option<SocketAddr>,
    pub max_connections: usize,
}
