//! Reassembles patch messages from transport frames.

use serde_json::Value;

use crate::error::{Result, SyncError};

use super::codec::{Buffer, BufferHeader};
use super::message::{PatchHeader, PatchMessage};
use super::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Expect {
    #[default]
    Header,
    Metadata,
    Content,
    BufferHeader,
    BufferPayload,
}

#[derive(Debug, Default)]
struct Partial {
    header: Option<PatchHeader>,
    metadata: Option<Value>,
    content: Option<Value>,
    buffers: Vec<Buffer>,
    pending_buffer: Option<BufferHeader>,
}

/// Frame-by-frame patch decoder.
///
/// Feed frames with [`consume`](Receiver::consume); a complete message is
/// returned once its last frame arrives. Any framing error resets the
/// receiver so the next frame is treated as a fresh header.
#[derive(Debug, Default)]
pub struct Receiver {
    expect: Expect,
    partial: Partial,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the receiver is between messages.
    pub fn is_idle(&self) -> bool {
        self.expect == Expect::Header
    }

    pub fn consume(&mut self, frame: Frame) -> Result<Option<PatchMessage>> {
        let result = self.step(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.expect = Expect::Header;
        self.partial = Partial::default();
    }

    fn step(&mut self, frame: Frame) -> Result<Option<PatchMessage>> {
        match (self.expect, frame) {
            (Expect::Header, Frame::Text(text)) => {
                self.partial.header = Some(serde_json::from_str(&text)?);
                self.expect = Expect::Metadata;
                Ok(None)
            }
            (Expect::Metadata, Frame::Text(text)) => {
                self.partial.metadata = Some(serde_json::from_str(&text)?);
                self.expect = Expect::Content;
                Ok(None)
            }
            (Expect::Content, Frame::Text(text)) => {
                self.partial.content = Some(serde_json::from_str(&text)?);
                self.next_buffer_or_finish()
            }
            (Expect::BufferHeader, Frame::Text(text)) => {
                self.partial.pending_buffer = Some(serde_json::from_str(&text)?);
                self.expect = Expect::BufferPayload;
                Ok(None)
            }
            (Expect::BufferPayload, Frame::Binary(payload)) => {
                let header = self.partial.pending_buffer.take().ok_or_else(|| {
                    SyncError::Protocol("Binary payload without buffer header".to_string())
                })?;
                self.partial.buffers.push((header, payload));
                self.next_buffer_or_finish()
            }
            (Expect::BufferPayload, Frame::Text(_)) => Err(SyncError::Protocol(
                "Expected binary buffer payload, got text frame".to_string(),
            )),
            (expect, Frame::Binary(_)) => Err(SyncError::Protocol(format!(
                "Expected text frame for {:?}, got binary frame",
                expect
            ))),
        }
    }

    fn next_buffer_or_finish(&mut self) -> Result<Option<PatchMessage>> {
        let announced = self
            .partial
            .header
            .as_ref()
            .map(PatchHeader::buffer_count)
            .unwrap_or(0);
        if self.partial.buffers.len() < announced {
            self.expect = Expect::BufferHeader;
            return Ok(None);
        }

        let partial = std::mem::take(&mut self.partial);
        self.expect = Expect::Header;
        let (Some(header), Some(metadata), Some(content)) =
            (partial.header, partial.metadata, partial.content)
        else {
            return Err(SyncError::Protocol("Incomplete patch message".to_string()));
        };
        PatchMessage::from_parts(header, metadata, content, partial.buffers).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn test_consumes_three_segments() {
        let mut receiver = Receiver::new();
        assert!(receiver
            .consume(text(r#"{"msgid":"1","msgtype":"PATCH-DOC"}"#))
            .unwrap()
            .is_none());
        assert!(receiver.consume(text("{}")).unwrap().is_none());
        let msg = receiver
            .consume(text(r#"{"events":[],"references":[]}"#))
            .unwrap()
            .expect("message should be complete");
        assert_eq!(msg.header().msgid, "1");
        assert!(receiver.is_idle());
    }

    #[test]
    fn test_waits_for_announced_buffers() {
        let mut receiver = Receiver::new();
        receiver
            .consume(text(r#"{"msgid":"1","msgtype":"PATCH-DOC","num_buffers":1}"#))
            .unwrap();
        receiver.consume(text("{}")).unwrap();
        assert!(receiver.consume(text(r#"{"events":[]}"#)).unwrap().is_none());
        assert!(receiver.consume(text(r#"{"id":"0"}"#)).unwrap().is_none());
        let msg = receiver
            .consume(Frame::Binary(Bytes::from_static(&[0; 8])))
            .unwrap()
            .expect("message should be complete");
        assert_eq!(msg.buffers().len(), 1);
        assert_eq!(msg.buffers()[0].0.id, "0");
    }

    #[test]
    fn test_binary_header_resets() {
        let mut receiver = Receiver::new();
        let err = receiver.consume(Frame::Binary(Bytes::from_static(b"x")));
        assert!(matches!(err, Err(SyncError::Protocol(_))));
        assert!(receiver.is_idle());
    }

    #[test]
    fn test_text_where_payload_expected() {
        let mut receiver = Receiver::new();
        receiver
            .consume(text(r#"{"msgid":"1","msgtype":"PATCH-DOC","num_buffers":1}"#))
            .unwrap();
        receiver.consume(text("{}")).unwrap();
        receiver.consume(text(r#"{"events":[]}"#)).unwrap();
        receiver.consume(text(r#"{"id":"0"}"#)).unwrap();
        assert!(receiver.consume(text(r#"{"id":"1"}"#)).is_err());
        assert!(receiver.is_idle());
    }

    #[test]
    fn test_rejects_other_message_types() {
        let mut receiver = Receiver::new();
        receiver
            .consume(text(r#"{"msgid":"1","msgtype":"PULL-DOC-REPLY"}"#))
            .unwrap();
        receiver.consume(text("{}")).unwrap();
        assert!(receiver.consume(text("{}")).is_err());
    }
}
