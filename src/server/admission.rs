//! Per-connection admission handshake
//!
//! Each accepted socket gets its own task that walks the peer through the
//! capacity check, the name query and the color query. The dialogue happens
//! directly on the socket; the dispatcher only learns about the connection
//! once the peer has confirmed its color, when the finished session is handed
//! over through the wakeup channel.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use super::dispatcher::ReactorEvent;
use super::registry::CapacityGauge;
use super::wakeup::Waker;
use crate::error::{ChatError, Result};
use crate::protocol::codec::{WireCodec, WireMode};
use crate::protocol::color::Color;
use crate::protocol::notices;
use crate::{ChatConfig, ConnectionId, User};

/// Where a handshake currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Capacity check and first acknowledgement
    Admitting,
    /// Waiting for the display name
    NamePrompted,
    /// Waiting for an acceptable color
    ColorPrompted,
    /// Dialogue complete, ready to register
    Confirmed,
    /// Turned away or gave up
    Rejected,
}

/// A connection that finished the dialogue and waits to be registered
#[derive(Debug)]
pub struct Admission {
    pub user: User,
    pub peer_addr: SocketAddr,
    pub reader: FramedRead<OwnedReadHalf, WireCodec>,
    pub writer: OwnedWriteHalf,
}

impl Admission {
    pub fn connection(&self) -> ConnectionId {
        self.user.connection
    }
}

/// Worker-local state of one handshake
pub struct HandshakeSession {
    connection: ConnectionId,
    peer_addr: SocketAddr,
    reader: FramedRead<OwnedReadHalf, WireCodec>,
    writer: OwnedWriteHalf,
    step: HandshakeStep,
    max_username_length: usize,
}

impl HandshakeSession {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, config: &ChatConfig) -> Self {
        let (read_half, writer) = stream.into_split();
        let codec = WireCodec::with_max_length(WireMode::Handshake, config.max_line_length);
        Self {
            connection: ConnectionId::new(),
            peer_addr,
            reader: FramedRead::new(read_half, codec),
            writer,
            step: HandshakeStep::Admitting,
            max_username_length: config.max_username_length,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn step(&self) -> HandshakeStep {
        self.step
    }

    /// Walk the peer through the whole dialogue
    pub async fn run(mut self, gauge: &CapacityGauge) -> Result<Admission> {
        let result = self.converse(gauge).await;
        match result {
            Ok((name, color)) => {
                self.step = HandshakeStep::Confirmed;
                self.reader.decoder_mut().enter_chat();
                Ok(Admission {
                    user: User::new(self.connection, name, color),
                    peer_addr: self.peer_addr,
                    reader: self.reader,
                    writer: self.writer,
                })
            }
            Err(e) => {
                self.step = HandshakeStep::Rejected;
                Err(e)
            }
        }
    }

    async fn converse(&mut self, gauge: &CapacityGauge) -> Result<(String, Color)> {
        self.check_capacity(gauge).await?;
        let name = self.query_name().await?;
        let color = self.query_color(&name).await?;
        Ok((name, color))
    }

    async fn check_capacity(&mut self, gauge: &CapacityGauge) -> Result<()> {
        if gauge.is_full() {
            self.send(&notices::token(notices::SERVER_FULL_NOTICE)).await?;
            return Err(ChatError::capacity_exceeded(format!(
                "{} of {} slots taken",
                gauge.occupied(),
                gauge.capacity()
            )));
        }

        self.send(notices::PROCEED_MARKER).await?;
        self.receive().await?;
        debug!("{} acknowledged proceed marker", self.connection);
        Ok(())
    }

    async fn query_name(&mut self) -> Result<String> {
        self.step = HandshakeStep::NamePrompted;
        self.send(&notices::token(notices::NAME_PROMPT)).await?;

        let reply = self.receive().await?;
        let name = notices::bounded_name(&String::from_utf8_lossy(&reply), self.max_username_length);
        debug!("{} asked for name {:?}", self.connection, name);
        Ok(name)
    }

    async fn query_color(&mut self, name: &str) -> Result<Color> {
        self.step = HandshakeStep::ColorPrompted;
        self.send(&notices::token(&notices::color_prompt(name))).await?;

        let color = loop {
            let reply = self.receive().await?;
            match Color::parse(&String::from_utf8_lossy(&reply)) {
                Some(color) => break color,
                None => {
                    debug!("{} sent unknown color, asking again", self.connection);
                    self.send(notices::REJECT_MARKER).await?;
                    self.send(&notices::token(notices::RETRY_COLOR_PROMPT)).await?;
                }
            }
        };

        self.send(notices::ACCEPT_MARKER).await?;
        self.receive().await?;
        Ok(color)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes> {
        match self.reader.next().await {
            Some(frame) => frame,
            None => Err(ChatError::connection_closed(format!(
                "{} hung up during {:?}",
                self.peer_addr, self.step
            ))),
        }
    }
}

/// Body of the per-connection worker task. Never registers anything itself:
/// a confirmed session goes to the dispatcher, anything else is dropped.
pub async fn admit(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: ChatConfig,
    gauge: CapacityGauge,
    waker: Waker<ReactorEvent>,
) {
    let session = HandshakeSession::new(stream, peer_addr, &config);
    let connection = session.connection();

    match session.run(&gauge).await {
        Ok(admission) => {
            debug!(
                "{} confirmed as {} ({})",
                connection, admission.user.name, admission.user.color
            );
            if let Err(e) = waker.wake(ReactorEvent::Admit(admission)) {
                debug!("Dropping admission of {}: {}", connection, e);
            }
        }
        Err(ChatError::CapacityExceeded(reason)) => {
            info!("Turned away {}: {}", peer_addr, reason);
        }
        Err(e) => {
            debug!("Handshake with {} abandoned: {}", peer_addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatClient;
    use crate::server::registry::Registry;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn session_pair(config: &ChatConfig) -> (HandshakeSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_side, peer_addr) = accepted.unwrap();
        (
            HandshakeSession::new(server_side, peer_addr, config),
            client.unwrap(),
        )
    }

    #[tokio::test]
    async fn test_full_handshake_with_color_retries() {
        let config = ChatConfig::default();
        let (session, stream) = session_pair(&config).await;
        assert_eq!(session.step(), HandshakeStep::Admitting);
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        let mut client = ChatClient::from_stream(stream);
        client
            .handshake("alice", ["purple", "orange", "Green"])
            .await
            .unwrap();

        let admission = timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(admission.user.name, "alice");
        assert_eq!(admission.user.color, Color::Green);
        assert_eq!(admission.reader.decoder().mode(), WireMode::Chat);
    }

    #[tokio::test]
    async fn test_first_valid_color_needs_no_retry() {
        let config = ChatConfig::default();
        let (session, stream) = session_pair(&config).await;
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        let mut client = ChatClient::from_stream(stream);
        client.handshake("bob", ["BLUE"]).await.unwrap();

        let admission = worker.await.unwrap().unwrap();
        assert_eq!(admission.user.color, Color::Blue);
    }

    #[tokio::test]
    async fn test_long_name_is_truncated() {
        let config = ChatConfig::default();
        let (session, stream) = session_pair(&config).await;
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        let mut client = ChatClient::from_stream(stream);
        client
            .handshake("a-very-long-name-that-overflows", ["white"])
            .await
            .unwrap();

        let admission = worker.await.unwrap().unwrap();
        assert_eq!(admission.user.name, "a-very-long-name-th");
    }

    #[tokio::test]
    async fn test_empty_name_is_admitted_verbatim() {
        let config = ChatConfig::default();
        let (session, stream) = session_pair(&config).await;
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        let mut client = ChatClient::from_stream(stream);
        timeout(Duration::from_secs(5), client.handshake("", ["green"]))
            .await
            .unwrap()
            .unwrap();

        let admission = timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(admission.user.name, "");
        assert_eq!(admission.user.color, Color::Green);
    }

    #[tokio::test]
    async fn test_empty_color_reply_is_rejected_and_retried() {
        let config = ChatConfig::default();
        let (session, stream) = session_pair(&config).await;
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        let (read_half, mut writer) = stream.into_split();
        let mut reader = FramedRead::new(read_half, WireCodec::handshake());

        assert_eq!(reader.next().await.unwrap().unwrap(), "0");
        writer.write_all(notices::ACK).await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), notices::NAME_PROMPT);
        writer.write_all(b"bob\0").await.unwrap();
        reader.next().await.unwrap().unwrap(); // color prompt

        writer.write_all(b"\0").await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), "0");
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            notices::RETRY_COLOR_PROMPT
        );

        writer.write_all(b"blue\0").await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), "1");
        writer.write_all(notices::ACK).await.unwrap();

        let admission = timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(admission.user.name, "bob");
        assert_eq!(admission.user.color, Color::Blue);
    }

    #[tokio::test]
    async fn test_full_server_sends_notice() {
        let config = ChatConfig::default();
        let (session, mut stream) = session_pair(&config).await;
        let mut registry = Registry::new(1);
        let id = ConnectionId::new();
        registry
            .try_insert(id, User::new(id, "x".into(), Color::Cyan), ())
            .unwrap();
        let gauge = registry.gauge();

        let result = session.run(&gauge).await;
        assert!(matches!(result, Err(ChatError::CapacityExceeded(_))));

        let mut buf = vec![0u8; 128];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(
            &buf[..n],
            &notices::token(notices::SERVER_FULL_NOTICE)[..]
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_mid_handshake_is_rejected() {
        let config = ChatConfig::default();
        let (session, mut stream) = session_pair(&config).await;
        let registry: Registry<()> = Registry::new(2);
        let gauge = registry.gauge();

        let worker = tokio::spawn(async move { session.run(&gauge).await });

        // Acknowledge, send half a name, then vanish
        let mut buf = vec![0u8; 64];
        stream.read(&mut buf).await.unwrap();
        stream.write_all(notices::ACK).await.unwrap();
        stream.read(&mut buf).await.unwrap();
        stream.write_all(b"ali").await.unwrap();
        drop(stream);

        let result = timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        assert!(matches!(result, Err(ChatError::ConnectionClosed(_))));
    }
}
