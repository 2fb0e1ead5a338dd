//! Drains pending document events into patch messages.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;
use crate::event::MutationEvent;
use crate::hold::HoldGate;
use crate::protocol::{PatchMessage, Protocol, PROTOCOL_VERSION};

/// Build a patch from the document's pending events and remove them from the
/// ledger.
///
/// `events` overrides the ledger contents as the source of the patch; only the
/// events actually encoded are removed from the ledger. Returns `None` when the
/// gate is held or there is nothing to send. A held gate leaves the ledger
/// untouched.
pub fn compute_diff(
    doc: &mut Document,
    gate: &HoldGate,
    binary: bool,
    events: Option<Vec<MutationEvent>>,
) -> Result<Option<PatchMessage>> {
    if gate.is_held() {
        tracing::trace!("hold gate engaged, deferring diff");
        return Ok(None);
    }
    let events = events.unwrap_or_else(|| doc.ledger().pending().to_vec());
    if events.is_empty() {
        return Ok(None);
    }

    let msg = Protocol::new(PROTOCOL_VERSION)?.create_patch_doc(doc, &events, binary)?;
    let drained = doc.ledger_mut().drain(&events);
    tracing::debug!(
        msgid = %msg.header().msgid,
        events = events.len(),
        drained,
        buffers = msg.buffers().len(),
        "computed document diff"
    );
    Ok(Some(msg))
}

/// The three JSON segments of a text-mode patch, as stored in a snapshot tree leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPatch {
    pub header: String,
    pub metadata: String,
    pub content: String,
}

impl RecordedPatch {
    pub fn from_message(msg: &PatchMessage) -> Result<Self> {
        Ok(Self {
            header: msg.header_json()?,
            metadata: msg.metadata_json()?,
            content: msg.content_json()?,
        })
    }
}

/// Drain the ledger into a text-mode patch, or `None` if nothing changed.
pub fn record_events(doc: &mut Document, gate: &HoldGate) -> Result<Option<RecordedPatch>> {
    compute_diff(doc, gate, false, None)?
        .map(|msg| RecordedPatch::from_message(&msg))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelId, NumericArray};
    use serde_json::json;

    fn held_doc() -> (Document, ModelId) {
        let mut doc = Document::new();
        let id = doc.insert_model(Model::new("TextInput").with_property("value", json!("")));
        doc.add_root(&id).unwrap();
        doc.hold();
        (doc, id)
    }

    #[test]
    fn test_empty_ledger_is_no_patch() {
        let (mut doc, _) = held_doc();
        let gate = HoldGate::new();
        assert!(compute_diff(&mut doc, &gate, true, None).unwrap().is_none());
    }

    #[test]
    fn test_hold_gate_suppresses_without_draining() {
        let (mut doc, id) = held_doc();
        let gate = HoldGate::new();
        doc.set_property(&id, "value", json!("a")).unwrap();
        doc.set_property(&id, "value", json!("b")).unwrap();
        let before: Vec<_> = doc.ledger().pending().iter().map(|e| e.id()).collect();

        {
            let _hold = gate.hold();
            assert!(compute_diff(&mut doc, &gate, true, None).unwrap().is_none());
        }

        let after: Vec<_> = doc.ledger().pending().iter().map(|e| e.id()).collect();
        assert_eq!(before, after);
        assert!(compute_diff(&mut doc, &gate, true, None).unwrap().is_some());
    }

    #[test]
    fn test_second_diff_is_empty() {
        let (mut doc, id) = held_doc();
        let gate = HoldGate::new();
        doc.set_property(&id, "value", json!("a")).unwrap();

        assert!(compute_diff(&mut doc, &gate, false, None).unwrap().is_some());
        assert!(doc.ledger().is_empty());
        assert!(compute_diff(&mut doc, &gate, false, None).unwrap().is_none());
    }

    #[test]
    fn test_explicit_events_only_drain_themselves() {
        let (mut doc, id) = held_doc();
        let gate = HoldGate::new();
        for value in ["a", "b", "c", "d"] {
            doc.set_property(&id, "value", json!(value)).unwrap();
        }
        let pending = doc.ledger().pending().to_vec();
        let selected = vec![pending[1].clone(), pending[3].clone()];

        let msg = compute_diff(&mut doc, &gate, false, Some(selected))
            .unwrap()
            .unwrap();
        assert_eq!(msg.events().len(), 2);
        assert_eq!(msg.events()[0]["new"], "b");

        let remaining: Vec<_> = doc.ledger().pending().iter().map(|e| e.id()).collect();
        assert_eq!(remaining, vec![pending[0].id(), pending[2].id()]);
    }

    #[test]
    fn test_binary_flag_controls_buffers() {
        let (mut doc, id) = held_doc();
        let gate = HoldGate::new();
        doc.set_property(&id, "data", NumericArray::new(vec![1.0])).unwrap();
        let pending = doc.ledger().pending().to_vec();

        let binary = compute_diff(&mut doc, &gate, true, Some(pending.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(binary.buffers().len(), 1);

        let text = compute_diff(&mut doc, &gate, false, Some(pending))
            .unwrap()
            .unwrap();
        assert!(text.buffers().is_empty());
        assert!(text.content_json().unwrap().contains("__ndarray__"));
    }

    #[test]
    fn test_record_events() {
        let (mut doc, id) = held_doc();
        let gate = HoldGate::new();
        assert!(record_events(&mut doc, &gate).unwrap().is_none());

        doc.set_property(&id, "value", json!("x")).unwrap();
        let recorded = record_events(&mut doc, &gate).unwrap().unwrap();
        assert!(recorded.header.contains("PATCH-DOC"));
        assert_eq!(recorded.metadata, "{}");
        assert!(recorded.content.contains("\"new\":\"x\""));
    }
}
