//! The dispatch loop
//!
//! A single task owns the listener, the registry and the watch-set of
//! admitted connections. It waits on all of them at once, plus the wakeup
//! channel and the local keystroke stream, and handles whichever is ready.
//! Handshakes never run here: accepted sockets are handed to admission
//! workers, and come back through the wakeup channel once confirmed.

use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::admission::{self, Admission};
use super::broadcast::{PeerLink, broadcast};
use super::local_input::{KeyAction, LineEditor};
use super::registry::Registry;
use super::wakeup::{WakeupReceiver, Waker};
use crate::error::{ChatError, Result};
use crate::protocol::codec::WireCodec;
use crate::protocol::notices;
use crate::terminal::Console;
use crate::{ChatConfig, ConnectionId};

/// Pause after a failed accept so a persistent error does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Raw keystrokes from the operator's terminal
pub type LocalInput = mpsc::Receiver<io::Result<u8>>;

/// Requests other tasks can put in front of the dispatcher
#[derive(Debug)]
pub enum ReactorEvent {
    /// A connection finished its handshake and wants a slot
    Admit(Admission),
    /// Server-originated message for everyone
    Announce(Bytes),
}

/// What an admitted connection produced
#[derive(Debug)]
enum PeerEvent {
    Line(Bytes),
    Failed(ChatError),
    Closed,
}

type PeerStream = Pin<Box<dyn Stream<Item = PeerEvent> + Send>>;

fn peer_stream(reader: FramedRead<OwnedReadHalf, WireCodec>) -> PeerStream {
    let lines = reader.map(|frame| match frame {
        Ok(line) => PeerEvent::Line(line),
        Err(e) => PeerEvent::Failed(e),
    });
    Box::pin(lines.chain(tokio_stream::once(PeerEvent::Closed)))
}

pub struct Dispatcher<C> {
    listener: TcpListener,
    config: ChatConfig,
    registry: Registry<OwnedWriteHalf>,
    watch_set: StreamMap<ConnectionId, PeerStream>,
    wakeup: WakeupReceiver<ReactorEvent>,
    waker: Waker<ReactorEvent>,
    local_input: Option<LocalInput>,
    editor: LineEditor,
    console: C,
    shutdown: CancellationToken,
}

impl<C: Console> Dispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        config: ChatConfig,
        registry: Registry<OwnedWriteHalf>,
        wakeup: WakeupReceiver<ReactorEvent>,
        waker: Waker<ReactorEvent>,
        console: C,
        local_input: Option<LocalInput>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            config,
            registry,
            watch_set: StreamMap::new(),
            wakeup,
            waker,
            local_input,
            editor: LineEditor::new(),
            console,
            shutdown,
        }
    }

    /// Serve until the operator interrupts or shutdown is requested
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        info!(
            "Dispatching on {:?} with room for {} users",
            self.listener.local_addr().ok(),
            self.registry.capacity()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    self.on_accept(accepted).await?;
                }
                // The dispatcher holds a waker itself, so the channel stays open
                Some(event) = self.wakeup.recv() => {
                    self.on_wakeup(event);
                }
                keystroke = next_keystroke(&mut self.local_input) => {
                    if self.on_keystroke(keystroke).is_break() {
                        info!("Interrupted from the local terminal");
                        break;
                    }
                }
                Some((connection, event)) = self.watch_set.next(), if !self.watch_set.is_empty() => {
                    self.on_peer_event(connection, event);
                }
            }
        }

        if !self.registry.is_empty() {
            info!("Dispatcher stopped with {} users connected", self.registry.len());
        }
        Ok(())
    }

    async fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) -> Result<()> {
        match accepted {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);
                let notice = format!("New connection from {}\n", peer_addr.ip().to_canonical());
                self.console.render_line(notice.as_bytes());
                tokio::spawn(admission::admit(
                    stream,
                    peer_addr,
                    self.config.clone(),
                    self.registry.gauge(),
                    self.waker.clone(),
                ));
            }
            Err(e) if listener_broken(&e) => {
                error!("Listener failed: {}", e);
                return Err(ChatError::fatal_reactor(format!("listener failed: {}", e)));
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
        Ok(())
    }

    fn on_wakeup(&mut self, first: ReactorEvent) {
        self.handle_event(first);
        for event in self.wakeup.drain() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ReactorEvent) {
        match event {
            ReactorEvent::Admit(admission) => self.register(admission),
            ReactorEvent::Announce(message) => {
                broadcast(&self.registry, &mut self.console, &message, None);
            }
        }
    }

    /// Commit a confirmed session: registry entry and watch-set membership
    /// are added together, before anything else can observe either
    fn register(&mut self, admission: Admission) {
        let connection = admission.connection();
        let Admission {
            user,
            peer_addr,
            reader,
            writer,
        } = admission;

        if self.registry.is_full() {
            info!(
                "{} ({}) lost the race for the last slot",
                user.name, peer_addr
            );
            if let Err(e) = writer.send_best_effort(&notices::token(notices::SERVER_FULL_NOTICE)) {
                debug!("Could not tell {} the server is full: {}", peer_addr, e);
            }
            return;
        }

        let notice = notices::join_notice(&user);
        let name = user.name.clone();
        if let Err(e) = self.registry.try_insert(connection, user, writer) {
            warn!("Could not register {} ({}): {}", name, peer_addr, e);
            return;
        }
        self.watch_set.insert(connection, peer_stream(reader));
        debug_assert!(self.is_consistent());

        let confirmed = self
            .registry
            .link(connection)
            .map(|link| link.send_best_effort(&notices::token(notices::JOINED_NOTICE)));
        if let Ok(Err(e)) = confirmed {
            warn!("Failed to confirm admission of {}: {}", peer_addr, e);
        }

        info!("{} joined from {} as {}", name, peer_addr, connection);
        broadcast(&self.registry, &mut self.console, &notice, Some(connection));
    }

    /// Drop a closed connection from both the registry and the watch-set,
    /// then tell everyone else
    fn retire(&mut self, connection: ConnectionId) {
        self.watch_set.remove(&connection);
        match self.registry.remove(connection) {
            Ok(user) => {
                debug_assert!(self.is_consistent());
                info!("{} ({}) left", user.name, connection);
                let notice = notices::leave_notice(&user);
                broadcast(&self.registry, &mut self.console, &notice, None);
            }
            Err(e) => warn!("Closed connection was not registered: {}", e),
        }
    }

    fn on_peer_event(&mut self, connection: ConnectionId, event: PeerEvent) {
        match event {
            PeerEvent::Line(line) => {
                let message = match self.registry.find_by_connection(connection) {
                    Ok(user) => notices::chat_line(user, &line),
                    Err(e) => {
                        warn!("Line from unknown sender: {}", e);
                        return;
                    }
                };
                debug!("{} sent {} bytes", connection, line.len());
                broadcast(&self.registry, &mut self.console, &message, None);
            }
            PeerEvent::Failed(e) => {
                warn!("Read from {} failed: {}", connection, e);
            }
            PeerEvent::Closed => self.retire(connection),
        }
    }

    fn on_keystroke(&mut self, keystroke: Option<io::Result<u8>>) -> ControlFlow<()> {
        let byte = match keystroke {
            Some(Ok(byte)) => byte,
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                return ControlFlow::Continue(());
            }
            Some(Err(e)) => {
                warn!("Local input failed, no longer reading it: {}", e);
                self.local_input = None;
                return ControlFlow::Continue(());
            }
            None => {
                debug!("Local input closed");
                self.local_input = None;
                return ControlFlow::Continue(());
            }
        };

        match self.editor.feed(byte) {
            KeyAction::Interrupt => return ControlFlow::Break(()),
            KeyAction::Submit(line) => {
                self.console.clear_input();
                let message = notices::server_line(&line);
                broadcast(&self.registry, &mut self.console, &message, None);
            }
            KeyAction::Discard => self.console.clear_input(),
            KeyAction::Erase => self.console.render_backspace(),
            KeyAction::Echo(byte) => self.console.render_char(byte),
            KeyAction::Ignore => {}
        }
        ControlFlow::Continue(())
    }

    /// The watch-set holds exactly the registered connections
    fn is_consistent(&self) -> bool {
        self.watch_set.len() == self.registry.len()
            && self
                .registry
                .connections()
                .all(|connection| self.watch_set.contains_key(&connection))
    }
}

/// Accept errors that mean the listening socket itself is unusable, as
/// opposed to one failed connection or a temporary resource shortage
fn listener_broken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    )
}

async fn next_keystroke(input: &mut Option<LocalInput>) -> Option<io::Result<u8>> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
