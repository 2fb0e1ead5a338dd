//! Static state export.
//!
//! [`embed_state`] drives every explorable widget through the cross product of
//! its value domain, recording the patch each combination produces into a
//! [`SnapshotTree`]. The tree is attached to the document as a `State` root
//! that a browser can replay from without a server.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::component::{Component, DomainSource, Options, Widget, WidgetKind};
use crate::diff::{record_events, RecordedPatch};
use crate::document::{add_to_doc, Document};
use crate::error::{Result, SyncError};
use crate::hold::HoldGate;
use crate::model::{CustomJs, Model, ModelId};
use crate::protocol::{Frame, Receiver};

use super::domain::{cardinality, cross_product, resolve_domain};
use super::snapshot::{SnapshotTree, StateKey};

/// Model type of the root carrying an exported state tree.
pub const STATE_MODEL: &str = "State";

/// Tag added to a root whose states have been exported.
pub const EMBEDDED_TAG: &str = "embedded";

/// Client-side change callback attached to every explored widget. `{id}` is
/// replaced with the id of the state root.
pub const STATE_JS: &str = r#"
var receiver = new Bokeh.protocol.Receiver()
var state = null
for (var root of cb_obj.document.roots()) {
  if (root.id == '{id}') {
    state = root;
    break;
  }
}
if (!state) { return; }
msg = state.get_state(cb_obj)
receiver.consume(msg.header)
receiver.consume(msg.metadata)
receiver.consume(msg.content)
if (receiver.message) {
  cb_obj.document.apply_json_patch(receiver.message.content)
}
"#;

/// Limits for a state export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Largest cross product that will be explored.
    pub max_states: usize,
    /// Number of samples taken from a continuous range.
    pub max_opts: usize,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            max_states: 1000,
            max_opts: 3,
        }
    }
}

impl EmbedOptions {
    pub fn with_max_states(mut self, max_states: usize) -> Self {
        self.max_states = max_states;
        self
    }

    pub fn with_max_opts(mut self, max_opts: usize) -> Self {
        self.max_opts = max_opts;
        self
    }
}

struct Explored<'a> {
    widget: &'a mut Widget,
    backing: ModelId,
    domain: Vec<Value>,
    sampled: bool,
    /// Discrete slider rendered in place of a sampled range widget.
    replacement: Option<Widget>,
}

impl Explored<'_> {
    /// Drive the rendered control first, then the widget it stands in for.
    fn set_value(&mut self, value: Value, doc: &mut Document) -> Result<()> {
        if let Some(replacement) = &mut self.replacement {
            replacement.set_value(nearest(&self.domain, &value), doc)?;
        }
        self.widget.set_value(value, doc)
    }

    /// Swap the rendered range slider for a discrete slider over the sampled
    /// values, so every value the browser can produce has a recorded state.
    fn discretize(&mut self, doc: &mut Document, root: &ModelId) -> Result<()> {
        let Some(parent) = doc.parent_of(root, &self.backing).cloned() else {
            tracing::debug!(widget = self.widget.name(), "sampled widget has no parent, keeping it");
            return Ok(());
        };
        let value = nearest(&self.domain, self.widget.value());
        let options = Options::List(self.domain.clone());
        let mut replacement =
            Widget::new(self.widget.name(), WidgetKind::DiscreteSlider { options }, value)?;
        let backing = replacement.render_into(doc, root);
        doc.swap_child(&parent, &self.backing, &backing)?;
        if let Some(previous) = self.widget.release_model(root) {
            doc.remove_model(&previous);
        }
        self.backing = backing;
        self.replacement = Some(replacement);
        Ok(())
    }
}

/// The sample closest to `value`.
fn nearest(domain: &[Value], value: &Value) -> Value {
    let target = value.as_f64().unwrap_or_default();
    domain
        .iter()
        .min_by(|a, b| {
            let da = (a.as_f64().unwrap_or_default() - target).abs();
            let db = (b.as_f64().unwrap_or_default() - target).abs();
            da.total_cmp(&db)
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Export every reachable state of `tree`, rendered as `root`, into a `State`
/// root of `doc`. Returns the id of that state root.
///
/// Fails without touching the document or any widget if the number of
/// combinations exceeds `options.max_states`. Widget values are restored
/// afterwards on a best-effort basis.
///
/// Sampled range sliders are replaced in the rendered layout by discrete
/// sliders over their samples.
pub fn embed_state(
    tree: &mut Component,
    root: &ModelId,
    doc: &mut Document,
    gate: &HoldGate,
    options: &EmbedOptions,
) -> Result<ModelId> {
    let mut explored = Vec::new();
    for widget in tree.widgets_mut() {
        let Some(source) = widget.domain() else {
            continue;
        };
        let backing = widget
            .model_for(root)
            .cloned()
            .ok_or_else(|| SyncError::NotRendered {
                widget: widget.name().to_string(),
                root: root.to_string(),
            })?;
        if !doc.contains(&backing) {
            return Err(SyncError::UnknownModel(backing.to_string()));
        }
        let sampled = matches!(source, DomainSource::Range(_));
        let domain = resolve_domain(&source, options.max_opts);
        explored.push(Explored {
            widget,
            backing,
            domain,
            sampled,
            replacement: None,
        });
    }

    let domains: Vec<Vec<Value>> = explored.iter().map(|e| e.domain.clone()).collect();
    let states = cardinality(&domains);
    if states > options.max_states {
        return Err(SyncError::Capacity {
            states,
            max_states: options.max_states,
        });
    }
    if !doc.contains(root) {
        return Err(SyncError::UnknownModel(root.to_string()));
    }

    for entry in explored.iter_mut().filter(|e| e.sampled) {
        entry.discretize(doc, root)?;
    }

    let state_id = ModelId::new();
    let callback = CustomJs::new(STATE_JS.replace("{id}", state_id.as_str()));
    for entry in &explored {
        if let Some(model) = doc.model_mut(&entry.backing) {
            model.js_on_change("value", callback.clone());
        }
    }
    if let Some(model) = doc.model_mut(root) {
        model.add_tag(EMBEDDED_TAG);
    }
    add_to_doc(doc, root, true)?;
    doc.ledger_mut().clear();

    let restore: Vec<Value> = explored.iter().map(|e| e.widget.value().clone()).collect();
    let initial: Vec<Value> = explored
        .iter()
        .map(|e| backing_value(doc, &e.backing))
        .collect();

    let mut snapshot = SnapshotTree::new();
    let mut recorded = 0usize;
    'combos: for combination in cross_product(&domains) {
        let mut path = Vec::with_capacity(combination.len());
        for (entry, value) in explored.iter_mut().zip(combination) {
            if let Err(err) = entry.set_value(value, doc) {
                // Events already produced stay queued for the next recorded state.
                tracing::debug!(widget = entry.widget.name(), error = %err, "skipping state");
                continue 'combos;
            }
            path.push(StateKey::from_value(&backing_value(doc, &entry.backing)));
        }
        if let Some(patch) = record_events(doc, gate)? {
            path.into_iter()
                .fold(&mut snapshot, |node, key| node.child_mut(key))
                .set_patch(patch);
            recorded += 1;
        }
    }

    for (entry, value) in explored.iter_mut().zip(restore) {
        if let Err(err) = entry.set_value(value, doc) {
            tracing::debug!(widget = entry.widget.name(), error = %err, "failed to restore widget");
        }
    }

    let widgets: BTreeMap<String, usize> = explored
        .iter()
        .enumerate()
        .map(|(i, e)| (e.backing.to_string(), i))
        .collect();
    let state = Model::with_id(state_id, STATE_MODEL)
        .with_property("state", snapshot.to_json())
        .with_property("values", json!(initial))
        .with_property("widgets", json!(widgets));
    let state_id = doc.insert_model(state);
    doc.add_root(&state_id)?;

    tracing::debug!(states, recorded, widgets = explored.len(), "embedded application state");
    Ok(state_id)
}

fn backing_value(doc: &Document, backing: &ModelId) -> Value {
    doc.model(backing)
        .and_then(|model| model.value("value"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// The client-side view of an exported `State` root.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedState {
    tree: SnapshotTree,
    values: Vec<Value>,
    widgets: BTreeMap<ModelId, usize>,
}

impl EmbeddedState {
    pub fn from_model(model: &Model) -> Result<Self> {
        if model.model_type() != STATE_MODEL {
            return Err(SyncError::TypeContract {
                expected: STATE_MODEL,
                found: model.model_type().to_string(),
            });
        }
        let tree = SnapshotTree::from_json(model.value("state").unwrap_or(&Value::Null))?;
        let values = model
            .value("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let widgets = model
            .value("widgets")
            .and_then(Value::as_object)
            .map(|widgets| {
                widgets
                    .iter()
                    .filter_map(|(id, index)| {
                        index.as_u64().map(|i| (ModelId::from(id.as_str()), i as usize))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            tree,
            values,
            widgets,
        })
    }

    /// The first `State` root of `doc`, if any.
    pub fn from_document(doc: &Document) -> Result<Option<Self>> {
        doc.roots()
            .iter()
            .filter_map(|id| doc.model(id))
            .find(|model| model.model_type() == STATE_MODEL)
            .map(Self::from_model)
            .transpose()
    }

    pub fn tree(&self) -> &SnapshotTree {
        &self.tree
    }

    /// Index of every explored widget, keyed by its backing model.
    pub fn widgets(&self) -> &BTreeMap<ModelId, usize> {
        &self.widgets
    }

    /// Current value of every explored widget, in discovery order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Record that the widget backed by `changed` now holds `value` and look
    /// up the patch for the resulting combination.
    pub fn get_state(&mut self, changed: &ModelId, value: &Value) -> Option<&RecordedPatch> {
        let index = *self.widgets.get(changed)?;
        *self.values.get_mut(index)? = value.clone();
        let path: Vec<StateKey> = self.values.iter().map(StateKey::from_value).collect();
        self.tree.lookup(&path)?.patch()
    }

    /// Replay the recorded patch for a widget change onto `doc`.
    ///
    /// Returns whether a patch was found and applied.
    pub fn replay(&mut self, changed: &ModelId, value: &Value, doc: &mut Document) -> Result<bool> {
        let Some(patch) = self.get_state(changed, value).cloned() else {
            return Ok(false);
        };
        let mut receiver = Receiver::new();
        let mut message = None;
        for segment in [patch.header, patch.metadata, patch.content] {
            message = receiver.consume(Frame::Text(segment))?;
        }
        let message = message
            .ok_or_else(|| SyncError::Protocol("Recorded patch is incomplete".to_string()))?;
        doc.apply_patch(&message)?;
        Ok(true)
    }
}
