//! Patch wire protocol.
//!
//! A patch travels as a fixed sequence of frames:
//!
//! ```text
//! Text(header)      {"msgid": ..., "msgtype": "PATCH-DOC", "num_buffers": n?}
//! Text(metadata)    {}
//! Text(content)     {"events": [...], "references": [...]}
//! n × ( Text(buffer header) {"id": ...}
//!       Binary(payload) )
//! ```
//!
//! The [`Receiver`] consumes frames in exactly this order and yields the
//! reassembled [`PatchMessage`].

pub mod codec;
pub mod message;
pub mod receiver;

use bytes::Bytes;

pub use codec::{Buffer, BufferHeader};
pub use message::{PatchHeader, PatchMessage, Protocol, PATCH_DOC, PROTOCOL_VERSION};
pub use receiver::Receiver;

/// One transport frame of a patch message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }
}
