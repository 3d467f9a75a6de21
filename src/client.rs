//! Chat client implementation
//!
//! This module provides the peer side of the admission handshake and the
//! line-based chat that follows it.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::protocol::codec::WireCodec;
use crate::protocol::notices;

/// TCP chat client
pub struct ChatClient {
    reader: FramedRead<OwnedReadHalf, WireCodec>,
    writer: OwnedWriteHalf,
}

impl ChatClient {
    /// Connect to a chat server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!("Connecting to chat server at {}", addr);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChatError::connection_closed(format!("Failed to connect: {}", e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected socket
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            reader: FramedRead::new(read_half, WireCodec::handshake()),
            writer,
        }
    }

    /// Wait for the server's go-ahead and acknowledge it. A full server
    /// answers with a notice instead, returned as `CapacityExceeded`.
    pub async fn await_proceed(&mut self) -> Result<()> {
        let first = self.next_token().await?;
        if &first[..] != b"0" {
            return Err(ChatError::capacity_exceeded(
                String::from_utf8_lossy(&first).into_owned(),
            ));
        }
        self.acknowledge().await
    }

    /// Read the next prompt text
    pub async fn read_prompt(&mut self) -> Result<String> {
        let token = self.next_token().await?;
        Ok(String::from_utf8_lossy(&token).into_owned())
    }

    /// Answer the current prompt
    pub async fn answer(&mut self, text: &str) -> Result<()> {
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(0);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Read an accept (`true`) or reject (`false`) marker
    pub async fn read_marker(&mut self) -> Result<bool> {
        let token = self.next_token().await?;
        match &token[..] {
            b"1" => Ok(true),
            b"0" => Ok(false),
            other => Err(ChatError::protocol(format!(
                "expected a marker, got {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    pub async fn acknowledge(&mut self) -> Result<()> {
        self.writer.write_all(notices::ACK).await?;
        Ok(())
    }

    /// Run the dialogue up to and including the final acknowledgement,
    /// offering colors from `colors` until one is accepted
    pub async fn handshake<I, S>(&mut self, name: &str, colors: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.await_proceed().await?;
        self.introduce(name, colors).await
    }

    /// Name and color part of the dialogue, after the go-ahead was
    /// acknowledged
    pub async fn introduce<I, S>(&mut self, name: &str, colors: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name_prompt = self.read_prompt().await?;
        debug!("Server asks: {}", name_prompt);
        self.answer(name).await?;

        let mut colors = colors.into_iter();
        self.read_prompt().await?;
        loop {
            let color = colors
                .next()
                .ok_or_else(|| ChatError::protocol("no acceptable color offered"))?;
            self.answer(color.as_ref()).await?;
            if self.read_marker().await? {
                break;
            }
            self.read_prompt().await?;
        }

        self.acknowledge().await
    }

    /// Wait for the registration verdict and switch to chat framing
    pub async fn await_joined(&mut self) -> Result<String> {
        let verdict = self.read_prompt().await?;
        if verdict == notices::SERVER_FULL_NOTICE {
            return Err(ChatError::capacity_exceeded(verdict));
        }
        if verdict != notices::JOINED_NOTICE {
            return Err(ChatError::protocol(format!(
                "unexpected registration reply {:?}",
                verdict
            )));
        }
        self.reader.decoder_mut().enter_chat();
        Ok(verdict)
    }

    /// Full admission: handshake followed by the joined confirmation
    pub async fn login<I, S>(&mut self, name: &str, colors: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.handshake(name, colors).await?;
        self.await_joined().await
    }

    /// Send one chat line, newline-terminated and NUL-padded
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        let mut buf = BytesMut::with_capacity(text.len() + 2);
        buf.put_slice(text.as_bytes());
        if !text.ends_with('\n') {
            buf.put_u8(b'\n');
        }
        buf.put_u8(0);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Next broadcast line; `None` once the server hangs up
    pub async fn next_line(&mut self) -> Result<Option<Bytes>> {
        self.reader.next().await.transpose()
    }

    /// Hang up
    pub async fn disconnect(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn next_token(&mut self) -> Result<Bytes> {
        match self.reader.next().await {
            Some(token) => token,
            None => Err(ChatError::connection_closed("server closed the connection")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (ChatClient, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(ChatClient::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_full_notice_surfaces_as_capacity_exceeded() {
        let (mut client, mut server) = pair().await;
        server
            .write_all(&notices::token(notices::SERVER_FULL_NOTICE))
            .await
            .unwrap();

        let err = client.await_proceed().await.unwrap_err();
        assert_eq!(
            err,
            ChatError::capacity_exceeded(notices::SERVER_FULL_NOTICE)
        );
    }

    #[tokio::test]
    async fn test_send_line_framing() {
        let (mut client, mut server) = pair().await;
        client.send_line("hi").await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi\n\0");
    }

    #[tokio::test]
    async fn test_markers() {
        let (mut client, mut server) = pair().await;
        server.write_all(b"0\01\0").await.unwrap();

        assert!(!client.read_marker().await.unwrap());
        assert!(client.read_marker().await.unwrap());
    }

    #[tokio::test]
    async fn test_await_joined_switches_to_chat_lines() {
        let (mut client, mut server) = pair().await;
        server
            .write_all(b"You have joined the server.\0hello there\n")
            .await
            .unwrap();

        client.await_joined().await.unwrap();
        let line = client.next_line().await.unwrap().unwrap();
        assert_eq!(line, Bytes::from_static(b"hello there\n"));
    }

    #[tokio::test]
    async fn test_next_line_none_after_hangup() {
        let (mut client, server) = pair().await;
        drop(server);
        assert!(client.next_line().await.unwrap().is_none());
    }
}
