//! Framing for the handshake and chat phases of a connection
//!
//! During admission both sides exchange NUL-terminated tokens (a newline also
//! ends a token so line-oriented tools can talk to the server). After
//! admission the peer sends raw lines ending in `\n`, optionally padded with
//! NUL bytes. One codec instance serves both phases so that bytes buffered
//! while the handshake finished are carried into the chat phase.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::MAX_DATA_SIZE;
use crate::error::ChatError;

/// Which framing rules currently apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// NUL- or LF-terminated tokens
    Handshake,
    /// LF-terminated chat lines, terminator kept
    Chat,
}

#[derive(Debug, Clone)]
pub struct WireCodec {
    mode: WireMode,
    max_length: usize,
}

impl WireCodec {
    pub fn handshake() -> Self {
        Self::with_max_length(WireMode::Handshake, MAX_DATA_SIZE)
    }

    pub fn chat() -> Self {
        Self::with_max_length(WireMode::Chat, MAX_DATA_SIZE)
    }

    pub fn with_max_length(mode: WireMode, max_length: usize) -> Self {
        Self { mode, max_length }
    }

    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Switch to chat framing without touching buffered input
    pub fn enter_chat(&mut self) {
        self.mode = WireMode::Chat;
    }

    /// Empty tokens are replies too
    fn decode_token(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ChatError> {
        let Some(pos) = src.iter().position(|b| *b == 0 || *b == b'\n') else {
            if src.len() > self.max_length {
                return Err(ChatError::protocol(format!(
                    "handshake token exceeds {} bytes",
                    self.max_length
                )));
            }
            return Ok(None);
        };

        let mut token = src.split_to(pos);
        src.advance(1);

        if token.last() == Some(&b'\r') {
            token.truncate(token.len() - 1);
        }
        if token.len() > self.max_length {
            return Err(ChatError::protocol(format!(
                "handshake token exceeds {} bytes",
                self.max_length
            )));
        }
        Ok(Some(token.freeze()))
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Option<Bytes> {
        let padding = src.iter().take_while(|b| **b == 0).count();
        src.advance(padding);

        match src.iter().position(|b| *b == b'\n') {
            Some(pos) if pos < self.max_length => Some(src.split_to(pos + 1).freeze()),
            _ if src.len() >= self.max_length => Some(src.split_to(self.max_length).freeze()),
            _ => None,
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::handshake()
    }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = ChatError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            WireMode::Handshake => self.decode_token(src),
            WireMode::Chat => Ok(self.decode_line(src)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.mode {
            // A half-sent token is as good as a disconnect
            WireMode::Handshake => {
                src.clear();
                Ok(None)
            }
            WireMode::Chat => {
                let rest = src.split().freeze();
                let has_content = rest.iter().any(|b| *b != 0);
                Ok(has_content.then_some(rest))
            }
        }
    }
}
