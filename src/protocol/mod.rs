//! Protocol layer for the chat server
//!
//! This module provides:
//! - Display color enumeration
//! - Handshake / chat line framing
//! - Prompts, markers and message formats

pub mod codec;
pub mod color;
pub mod notices;

pub use codec::{WireCodec, WireMode};
pub use color::Color;
