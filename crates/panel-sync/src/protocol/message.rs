//! Patch message construction and framing.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{Result, SyncError};
use crate::event::{EventKind, MutationEvent};

use super::codec::{encode_model, encode_property, Buffer, BufferCollector};
use super::Frame;

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type of a document patch.
pub const PATCH_DOC: &str = "PATCH-DOC";

/// Header segment of a patch message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchHeader {
    pub msgid: String,
    pub msgtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_buffers: Option<usize>,
}

impl PatchHeader {
    /// Number of buffer pairs that follow the content segment.
    pub fn buffer_count(&self) -> usize {
        self.num_buffers.unwrap_or(0)
    }
}

/// Factory for messages of one protocol version.
#[derive(Debug, Clone)]
pub struct Protocol {
    version: String,
}

impl Protocol {
    pub fn new(version: &str) -> Result<Self> {
        if version != PROTOCOL_VERSION {
            return Err(SyncError::Protocol(format!(
                "Unsupported protocol version: {}",
                version
            )));
        }
        Ok(Self {
            version: version.to_string(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build a PATCH-DOC message from a batch of events.
    ///
    /// `RootAdded` events pull the full model tree of the new root into the
    /// `references` list, encoded against the document's current state.
    pub fn create_patch_doc(
        &self,
        doc: &Document,
        events: &[MutationEvent],
        use_buffers: bool,
    ) -> Result<PatchMessage> {
        let mut collector = BufferCollector::new(use_buffers);
        let mut references = Vec::new();
        let mut referenced = HashSet::new();
        let mut encoded_events = Vec::with_capacity(events.len());

        for event in events {
            let model_ref = event.model().to_ref();
            let encoded = match event.kind() {
                EventKind::ModelChanged => {
                    let new = event
                        .new_value()
                        .map(|value| encode_property(value, &mut collector))
                        .unwrap_or(Value::Null);
                    json!({
                        "kind": event.kind().as_str(),
                        "model": model_ref,
                        "attr": event.attr(),
                        "new": new,
                    })
                }
                EventKind::RootAdded => {
                    if !doc.contains(event.model()) {
                        return Err(SyncError::UnknownModel(event.model().to_string()));
                    }
                    for model in doc.subtree(event.model()) {
                        if referenced.insert(model.id().clone()) {
                            references.push(encode_model(model, &mut collector)?);
                        }
                    }
                    json!({ "kind": event.kind().as_str(), "model": model_ref })
                }
                EventKind::RootRemoved => {
                    json!({ "kind": event.kind().as_str(), "model": model_ref })
                }
            };
            encoded_events.push(encoded);
        }

        let buffers = collector.into_buffers();
        let header = PatchHeader {
            msgid: Uuid::new_v4().to_string(),
            msgtype: PATCH_DOC.to_string(),
            num_buffers: (!buffers.is_empty()).then_some(buffers.len()),
        };
        let content = json!({ "events": encoded_events, "references": references });

        Ok(PatchMessage {
            header,
            metadata: json!({}),
            content,
            buffers,
        })
    }
}

/// A structured document diff: header, metadata, content and binary buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchMessage {
    header: PatchHeader,
    metadata: Value,
    content: Value,
    buffers: Vec<Buffer>,
}

impl PatchMessage {
    /// Assemble a message from received parts.
    pub fn from_parts(
        header: PatchHeader,
        metadata: Value,
        content: Value,
        buffers: Vec<Buffer>,
    ) -> Result<Self> {
        if header.msgtype != PATCH_DOC {
            return Err(SyncError::Protocol(format!(
                "Expected {} message, got {}",
                PATCH_DOC, header.msgtype
            )));
        }
        if header.buffer_count() != buffers.len() {
            return Err(SyncError::Protocol(format!(
                "Header announces {} buffers, got {}",
                header.buffer_count(),
                buffers.len()
            )));
        }
        Ok(Self {
            header,
            metadata,
            content,
            buffers,
        })
    }

    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// Events carried by the content segment.
    pub fn events(&self) -> &[Value] {
        self.content
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn header_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.header)?)
    }

    pub fn metadata_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.metadata)?)
    }

    pub fn content_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.content)?)
    }

    /// The transport frames of this message in wire order.
    pub fn frames(&self) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(3 + 2 * self.buffers.len());
        frames.push(Frame::Text(self.header_json()?));
        frames.push(Frame::Text(self.metadata_json()?));
        frames.push(Frame::Text(self.content_json()?));
        for (header, payload) in &self.buffers {
            frames.push(Frame::Text(serde_json::to_string(header)?));
            frames.push(Frame::Binary(payload.clone()));
        }
        Ok(frames)
    }
}
