//! The server-side document: an arena of models, the root list and the
//! ledger of pending mutation events.
//!
//! Property changes made through [`Document::set_property`] and root changes
//! produce [`MutationEvent`]s. While the document is held
//! ([`Document::hold`]) those events queue in the ledger until a diff drains
//! them; otherwise they are handed straight to the change listeners.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::event::{EventId, EventKind, EventLedger, MutationEvent};
use crate::model::{Model, ModelId, PropertyValue};
use crate::protocol::codec::{decode_model, decode_property, encode_model, Buffer, BufferCollector};
use crate::protocol::PatchMessage;

/// Callback invoked for every event produced while the document is not held.
pub type ChangeListener = Box<dyn FnMut(&MutationEvent) + Send>;

pub struct Document {
    title: String,
    version: u64,
    models: BTreeMap<ModelId, Model>,
    roots: Vec<ModelId>,
    held: bool,
    ledger: EventLedger,
    next_event: u64,
    listeners: Vec<ChangeListener>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("title", &self.title)
            .field("version", &self.version)
            .field("roots", &self.roots)
            .field("models", &self.models.len())
            .field("held", &self.held)
            .field("pending", &self.ledger.len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            title: "Panel".to_string(),
            version: 0,
            models: BTreeMap::new(),
            roots: Vec::new(),
            held: false,
            ledger: EventLedger::new(),
            next_event: 0,
            listeners: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Incremented on every tracked change and every applied patch.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Queue events in the ledger instead of dispatching them.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Stop holding and dispatch everything still queued to the listeners.
    pub fn unhold(&mut self) {
        self.held = false;
        let pending = self.ledger.pending().to_vec();
        self.ledger.clear();
        for event in &pending {
            self.dispatch(event);
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn on_change(&mut self, listener: impl FnMut(&MutationEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut EventLedger {
        &mut self.ledger
    }

    /// Add a model to the arena without producing an event.
    pub fn insert_model(&mut self, model: Model) -> ModelId {
        let id = model.id().clone();
        self.models.insert(id.clone(), model);
        id
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.models.contains_key(id)
    }

    pub fn model(&self, id: &ModelId) -> Option<&Model> {
        self.models.get(id)
    }

    /// Untracked access, for tags and client-side callbacks.
    pub fn model_mut(&mut self, id: &ModelId) -> Option<&mut Model> {
        self.models.get_mut(id)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn roots(&self) -> &[ModelId] {
        &self.roots
    }

    pub fn add_root(&mut self, id: &ModelId) -> Result<()> {
        if !self.models.contains_key(id) {
            return Err(SyncError::UnknownModel(id.to_string()));
        }
        if self.roots.contains(id) {
            return Ok(());
        }
        self.roots.push(id.clone());
        self.emit(|event_id| MutationEvent::root_added(event_id, id.clone()));
        Ok(())
    }

    /// Returns whether `id` was a root.
    pub fn remove_root(&mut self, id: &ModelId) -> bool {
        let Some(position) = self.roots.iter().position(|root| root == id) else {
            return false;
        };
        self.roots.remove(position);
        self.emit(|event_id| MutationEvent::root_removed(event_id, id.clone()));
        true
    }

    /// Set a property, recording a `ModelChanged` event if the value differs.
    ///
    /// Returns whether the value changed.
    pub fn set_property(
        &mut self,
        id: &ModelId,
        attr: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<bool> {
        let value = value.into();
        let model = self
            .models
            .get_mut(id)
            .ok_or_else(|| SyncError::UnknownModel(id.to_string()))?;
        if model.property(attr) == Some(&value) {
            return Ok(false);
        }
        let old = model.replace_property(attr, value.clone());
        self.emit(|event_id| MutationEvent::model_changed(event_id, id.clone(), attr, old, value));
        Ok(true)
    }

    /// All models reachable from `root` through `children`, root first.
    pub fn subtree(&self, root: &ModelId) -> Vec<&Model> {
        let mut seen = HashSet::new();
        let mut stack = vec![root.clone()];
        let mut found = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(model) = self.models.get(&id) {
                stack.extend(model.child_ids().into_iter().rev());
                found.push(model);
            }
        }
        found
    }

    pub fn select(&self, root: &ModelId, predicate: impl Fn(&Model) -> bool) -> Vec<&Model> {
        self.subtree(root)
            .into_iter()
            .filter(|model| predicate(model))
            .collect()
    }

    pub fn select_one(&self, root: &ModelId, model_type: &str) -> Option<&Model> {
        self.subtree(root)
            .into_iter()
            .find(|model| model.model_type() == model_type)
    }

    /// The model under `root` whose `children` include `child`.
    pub fn parent_of(&self, root: &ModelId, child: &ModelId) -> Option<&ModelId> {
        self.subtree(root)
            .into_iter()
            .find(|model| model.child_ids().contains(child))
            .map(Model::id)
    }

    /// Put `new` in place of `old` among the children of `parent`, without
    /// recording an event.
    pub(crate) fn swap_child(&mut self, parent: &ModelId, old: &ModelId, new: &ModelId) -> Result<()> {
        let model = self
            .models
            .get_mut(parent)
            .ok_or_else(|| SyncError::UnknownModel(parent.to_string()))?;
        let children: Vec<Value> = model
            .value("children")
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::UnknownModel(old.to_string()))?
            .iter()
            .map(|child| match ModelId::from_ref(child) {
                Some(id) if &id == old => new.to_ref(),
                _ => child.clone(),
            })
            .collect();
        model.replace_property("children", PropertyValue::Json(json!(children)));
        Ok(())
    }

    /// Drop a model that is no longer referenced, without recording an event.
    pub(crate) fn remove_model(&mut self, id: &ModelId) -> Option<Model> {
        self.models.remove(id)
    }

    /// Remove a root and hand back every model of its tree.
    ///
    /// Pending events about the removed models are discarded, since they can
    /// no longer be encoded against this document. A root that was never sent
    /// leaves no trace in the ledger at all; otherwise its `RootRemoved` stays
    /// queued so the peer drops it too.
    pub fn detach(&mut self, root: &ModelId) -> Vec<Model> {
        let ids: HashSet<ModelId> = self.subtree(root).iter().map(|m| m.id().clone()).collect();
        let unsent = self
            .ledger
            .pending()
            .iter()
            .any(|event| event.kind() == EventKind::RootAdded && event.model() == root);
        self.remove_root(root);
        let discarded = self.ledger.discard(|event| {
            ids.contains(event.model()) && (unsent || event.kind() != EventKind::RootRemoved)
        });
        if discarded > 0 {
            tracing::debug!(root = %root, discarded, "discarded events of detached models");
        }
        ids.iter().filter_map(|id| self.models.remove(id)).collect()
    }

    /// Apply a received patch. Nothing is changed if any part fails to decode.
    ///
    /// Applied changes are not recorded in the ledger; they originate from the
    /// peer and must not be echoed back.
    pub fn apply_patch(&mut self, msg: &PatchMessage) -> Result<()> {
        self.apply_json_patch(msg.content(), msg.buffers())
    }

    pub fn apply_json_patch(&mut self, content: &Value, buffers: &[Buffer]) -> Result<()> {
        let mut models = self.models.clone();
        let mut roots = self.roots.clone();

        if let Some(references) = content.get("references").and_then(Value::as_array) {
            for reference in references {
                let model = decode_model(reference, buffers)?;
                models.insert(model.id().clone(), model);
            }
        }

        let events = content
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::Protocol("Patch content has no events".to_string()))?;

        for event in events {
            let id = event
                .get("model")
                .and_then(ModelId::from_ref)
                .ok_or_else(|| SyncError::Protocol("Patch event has no model".to_string()))?;
            match event.get("kind").and_then(Value::as_str) {
                Some("ModelChanged") => {
                    let attr = event.get("attr").and_then(Value::as_str).ok_or_else(|| {
                        SyncError::Protocol("ModelChanged event has no attr".to_string())
                    })?;
                    let new = decode_property(event.get("new").unwrap_or(&Value::Null), buffers)?;
                    models
                        .get_mut(&id)
                        .ok_or_else(|| SyncError::UnknownModel(id.to_string()))?
                        .replace_property(attr, new);
                }
                Some("RootAdded") => {
                    if !models.contains_key(&id) {
                        return Err(SyncError::UnknownModel(id.to_string()));
                    }
                    if !roots.contains(&id) {
                        roots.push(id);
                    }
                }
                Some("RootRemoved") => roots.retain(|root| root != &id),
                other => {
                    return Err(SyncError::Protocol(format!(
                        "Unknown patch event kind: {:?}",
                        other
                    )))
                }
            }
        }

        self.models = models;
        self.roots = roots;
        self.version += 1;
        Ok(())
    }

    /// Full serialized state, as embedded in a rendered notebook output.
    pub fn to_json(&self) -> Result<Value> {
        let mut collector = BufferCollector::new(false);
        let mut references = Vec::new();
        let mut seen = HashSet::new();
        for root in &self.roots {
            for model in self.subtree(root) {
                if seen.insert(model.id().clone()) {
                    references.push(encode_model(model, &mut collector)?);
                }
            }
        }
        Ok(json!({
            "title": self.title,
            "roots": {
                "root_ids": self.roots,
                "references": references,
            },
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }

    /// Rebuild a document from [`to_json`](Document::to_json) output.
    pub fn from_json(value: &Value) -> Result<Self> {
        let roots = value
            .get("roots")
            .ok_or_else(|| SyncError::Protocol("Document JSON has no roots".to_string()))?;

        let mut doc = Document::new();
        if let Some(title) = value.get("title").and_then(Value::as_str) {
            doc.title = title.to_string();
        }
        if let Some(references) = roots.get("references").and_then(Value::as_array) {
            for reference in references {
                doc.insert_model(decode_model(reference, &[])?);
            }
        }

        let root_ids = roots
            .get("root_ids")
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::Protocol("Document JSON has no root_ids".to_string()))?;
        for id in root_ids {
            let id = id
                .as_str()
                .map(ModelId::from)
                .ok_or_else(|| SyncError::Protocol(format!("Invalid root id: {}", id)))?;
            if !doc.contains(&id) {
                return Err(SyncError::UnknownModel(id.to_string()));
            }
            doc.roots.push(id);
        }
        Ok(doc)
    }

    fn emit(&mut self, make: impl FnOnce(EventId) -> MutationEvent) {
        let event = make(EventId::new(self.next_event));
        self.next_event += 1;
        self.version += 1;
        if self.held {
            self.ledger.record(event);
        } else {
            self.dispatch(&event);
        }
    }

    fn dispatch(&mut self, event: &MutationEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }
}

/// Make `root` a root of `doc`, holding the document if requested and not
/// already held.
pub fn add_to_doc(doc: &mut Document, root: &ModelId, hold: bool) -> Result<()> {
    doc.add_root(root)?;
    if hold && !doc.is_held() {
        doc.hold();
    }
    Ok(())
}

/// Move a root and its model tree from one document to another.
///
/// A model belongs to at most one document, so the tree is detached from
/// `from` before it is added to `to`.
pub fn transfer_root(from: &mut Document, to: &mut Document, root: &ModelId, hold: bool) -> Result<()> {
    let models = from.detach(root);
    if models.is_empty() {
        return Err(SyncError::UnknownModel(root.to_string()));
    }
    for model in models {
        to.insert_model(model);
    }
    add_to_doc(to, root, hold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_diff;
    use crate::hold::HoldGate;
    use std::sync::{Arc, Mutex};

    fn column_with_child(doc: &mut Document) -> (ModelId, ModelId) {
        let child = doc.insert_model(Model::new("Select").with_property("value", json!("a")));
        let root = doc.insert_model(
            Model::new("Column").with_property("children", json!([child.to_ref()])),
        );
        (root, child)
    }

    #[test]
    fn test_held_document_records_events() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        doc.hold();
        doc.add_root(&root).unwrap();
        doc.set_property(&child, "value", json!("b")).unwrap();

        let kinds: Vec<EventKind> = doc.ledger().pending().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::RootAdded, EventKind::ModelChanged]);
        let changed = &doc.ledger().pending()[1];
        assert_eq!(changed.attr(), Some("value"));
        assert_eq!(changed.old(), Some(&PropertyValue::Json(json!("a"))));
    }

    #[test]
    fn test_unheld_document_dispatches_to_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut doc = Document::new();
        let (_, child) = column_with_child(&mut doc);
        doc.on_change(move |event| sink.lock().unwrap().push(event.kind()));
        doc.set_property(&child, "value", json!("b")).unwrap();

        assert!(doc.ledger().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::ModelChanged]);
    }

    #[test]
    fn test_unhold_flushes_ledger() {
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();

        let mut doc = Document::new();
        let (_, child) = column_with_child(&mut doc);
        doc.on_change(move |_| *sink.lock().unwrap() += 1);
        doc.hold();
        doc.set_property(&child, "value", json!("b")).unwrap();
        doc.set_property(&child, "value", json!("c")).unwrap();
        doc.unhold();

        assert!(doc.ledger().is_empty());
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_unchanged_value_records_nothing() {
        let mut doc = Document::new();
        let (_, child) = column_with_child(&mut doc);
        doc.hold();
        assert!(!doc.set_property(&child, "value", json!("a")).unwrap());
        assert!(doc.ledger().is_empty());
    }

    #[test]
    fn test_unknown_model() {
        let mut doc = Document::new();
        let missing = ModelId::from("missing");
        assert!(matches!(
            doc.set_property(&missing, "value", json!(1)),
            Err(SyncError::UnknownModel(_))
        ));
        assert!(doc.add_root(&missing).is_err());
    }

    #[test]
    fn test_select_one_by_type() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        assert_eq!(doc.select_one(&root, "Select").map(Model::id), Some(&child));
        assert!(doc.select_one(&root, "Slider").is_none());
        assert_eq!(doc.select(&root, |_| true).len(), 2);
    }

    #[test]
    fn test_swap_child_keeps_position() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        let tail = doc.insert_model(Model::new("Div"));
        let mut children = doc.model(&root).unwrap().value("children").cloned().unwrap();
        children.as_array_mut().unwrap().push(tail.to_ref());
        doc.model_mut(&root).unwrap().replace_property("children", PropertyValue::Json(children));
        let other = doc.insert_model(Model::new("Slider"));
        doc.hold();

        assert_eq!(doc.parent_of(&root, &child), Some(&root));
        doc.swap_child(&root, &child, &other).unwrap();
        assert_eq!(doc.model(&root).unwrap().child_ids(), vec![other.clone(), tail]);
        assert_eq!(doc.parent_of(&root, &child), None);
        assert!(doc.ledger().is_empty());
    }

    #[test]
    fn test_transfer_root_moves_tree() {
        let mut first = Document::new();
        let mut second = Document::new();
        let (root, child) = column_with_child(&mut first);
        first.add_root(&root).unwrap();

        transfer_root(&mut first, &mut second, &root, true).unwrap();

        assert!(first.roots().is_empty());
        assert!(!first.contains(&child));
        assert_eq!(second.roots(), &[root]);
        assert!(second.contains(&child));
        assert!(second.is_held());
    }

    #[test]
    fn test_transfer_of_unsent_root_leaves_diffable_ledger() {
        let mut first = Document::new();
        let mut second = Document::new();
        let (root, child) = column_with_child(&mut first);
        let other = first.insert_model(Model::new("Div").with_property("text", json!("kept")));
        first.hold();
        first.add_root(&other).unwrap();
        first.add_root(&root).unwrap();
        first.set_property(&child, "value", json!("b")).unwrap();

        transfer_root(&mut first, &mut second, &root, false).unwrap();

        let pending: Vec<&ModelId> = first.ledger().pending().iter().map(|e| e.model()).collect();
        assert_eq!(pending, vec![&other]);
        let msg = compute_diff(&mut first, &HoldGate::new(), false, None)
            .unwrap()
            .expect("the other root is still pending");
        assert_eq!(msg.content()["events"].as_array().unwrap().len(), 1);
        assert!(first.ledger().is_empty());
    }

    #[test]
    fn test_transfer_of_synced_root_keeps_removal() {
        let mut first = Document::new();
        let mut second = Document::new();
        let (root, child) = column_with_child(&mut first);
        first.add_root(&root).unwrap();
        first.hold();
        first.set_property(&child, "value", json!("b")).unwrap();

        transfer_root(&mut first, &mut second, &root, false).unwrap();

        let kinds: Vec<EventKind> = first.ledger().pending().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::RootRemoved]);
        let msg = compute_diff(&mut first, &HoldGate::new(), false, None)
            .unwrap()
            .expect("removal is pending");
        assert_eq!(msg.content()["events"][0]["kind"], json!("RootRemoved"));
    }

    #[test]
    fn test_apply_json_patch_rejects_oversized_array() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        doc.add_root(&root).unwrap();

        let content = json!({
            "events": [{
                "kind": "ModelChanged",
                "model": child.to_ref(),
                "attr": "data",
                "new": {"__ndarray__": "", "dtype": "float64", "shape": [8589934592u64, 8589934592u64]},
            }],
            "references": [],
        });
        assert!(matches!(
            doc.apply_json_patch(&content, &[]),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(doc.model(&child).unwrap().property("data"), None);
    }

    #[test]
    fn test_apply_json_patch_is_atomic() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        doc.add_root(&root).unwrap();

        let content = json!({
            "events": [
                {"kind": "ModelChanged", "model": child.to_ref(), "attr": "value", "new": "z"},
                {"kind": "ModelChanged", "model": {"id": "missing"}, "attr": "value", "new": 1},
            ],
            "references": [],
        });
        assert!(doc.apply_json_patch(&content, &[]).is_err());
        assert_eq!(doc.model(&child).unwrap().value("value"), Some(&json!("a")));
    }

    #[test]
    fn test_to_json_lists_roots() {
        let mut doc = Document::new();
        let (root, _) = column_with_child(&mut doc);
        doc.add_root(&root).unwrap();
        let docs_json = doc.to_json().unwrap();
        assert_eq!(docs_json["roots"]["root_ids"], json!([root]));
        assert_eq!(docs_json["roots"]["references"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_from_json_builds_replica() {
        let mut doc = Document::new();
        let (root, child) = column_with_child(&mut doc);
        doc.model_mut(&root).unwrap().add_tag("embedded");
        doc.add_root(&root).unwrap();

        let replica = Document::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(replica.roots(), &[root.clone()]);
        assert_eq!(replica.model(&child).unwrap().value("value"), Some(&json!("a")));
        assert_eq!(replica.model(&root).unwrap().tags(), &["embedded".to_string()]);
        assert!(replica.ledger().is_empty());

        assert!(Document::from_json(&json!({"roots": {"root_ids": ["x"]}})).is_err());
    }
}
