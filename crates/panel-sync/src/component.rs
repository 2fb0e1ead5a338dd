//! Reactive components rendered into a [`Document`].
//!
//! A component renders one backing model per root it is displayed in and
//! remembers the mapping, so later value changes can be mirrored onto every
//! rendered copy. Widgets additionally expose the discrete value domain used
//! by static state export.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Value};

use crate::document::Document;
use crate::error::{Result, SyncError};
use crate::model::{Model, ModelId, PropertyValue};

/// Callback run after a widget's value changes. It may update other models.
pub type Watcher = Box<dyn FnMut(&Value, &mut Document) -> Result<()> + Send>;

/// Options of a selection widget, either bare values or labelled values.
#[derive(Debug, Clone, PartialEq)]
pub enum Options {
    List(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Options {
    pub fn values(&self) -> Vec<Value> {
        match self {
            Options::List(values) => values.clone(),
            Options::Named(pairs) => pairs.iter().map(|(_, value)| value.clone()).collect(),
        }
    }

    pub fn labels(&self) -> Vec<String> {
        match self {
            Options::List(values) => values.iter().map(label_of).collect(),
            Options::Named(pairs) => pairs.iter().map(|(label, _)| label.clone()).collect(),
        }
    }

    pub fn position(&self, value: &Value) -> Option<usize> {
        match self {
            Options::List(values) => values.iter().position(|v| v == value),
            Options::Named(pairs) => pairs.iter().position(|(_, v)| v == value),
        }
    }

    fn label_for(&self, value: &Value) -> Option<String> {
        self.position(value).map(|i| self.labels().swap_remove(i))
    }

    fn len(&self) -> usize {
        match self {
            Options::List(values) => values.len(),
            Options::Named(pairs) => pairs.len(),
        }
    }
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Step of a range control; its variant decides integer or float sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    pub start: f64,
    pub end: f64,
    pub step: Step,
}

/// Where a widget's explorable values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainSource {
    Enumerated(Vec<Value>),
    Range(RangeSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetKind {
    Select { options: Options },
    /// A slider over a list of options; its backing slider holds the option index.
    DiscreteSlider { options: Options },
    IntSlider { start: i64, end: i64, step: i64 },
    FloatSlider { start: f64, end: f64, step: f64 },
    TextInput,
    Checkbox,
}

impl WidgetKind {
    fn model_type(&self) -> &'static str {
        match self {
            WidgetKind::Select { .. } => "Select",
            WidgetKind::DiscreteSlider { .. }
            | WidgetKind::IntSlider { .. }
            | WidgetKind::FloatSlider { .. } => "Slider",
            WidgetKind::TextInput => "TextInput",
            WidgetKind::Checkbox => "Checkbox",
        }
    }

    /// The explorable domain, or `None` for free-form controls.
    pub fn domain(&self) -> Option<DomainSource> {
        match self {
            WidgetKind::Select { options } | WidgetKind::DiscreteSlider { options } => {
                Some(DomainSource::Enumerated(options.values()))
            }
            WidgetKind::IntSlider { start, end, step } => Some(DomainSource::Range(RangeSpec {
                start: *start as f64,
                end: *end as f64,
                step: Step::Int(*step),
            })),
            WidgetKind::FloatSlider { start, end, step } => Some(DomainSource::Range(RangeSpec {
                start: *start,
                end: *end,
                step: Step::Float(*step),
            })),
            WidgetKind::TextInput | WidgetKind::Checkbox => None,
        }
    }

    fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            WidgetKind::Select { options } | WidgetKind::DiscreteSlider { options } => options
                .position(value)
                .map(|_| ())
                .ok_or_else(|| format!("{} is not one of the available options", value)),
            WidgetKind::IntSlider { start, end, .. } => match value.as_i64() {
                Some(v) if (*start..=*end).contains(&v) => Ok(()),
                Some(v) => Err(format!("{} is outside [{}, {}]", v, start, end)),
                None => Err(format!("{} is not an integer", value)),
            },
            WidgetKind::FloatSlider { start, end, .. } => match value.as_f64() {
                Some(v) if v >= *start && v <= *end => Ok(()),
                Some(v) => Err(format!("{} is outside [{}, {}]", v, start, end)),
                None => Err(format!("{} is not a number", value)),
            },
            WidgetKind::TextInput if value.is_string() => Ok(()),
            WidgetKind::TextInput => Err(format!("{} is not a string", value)),
            WidgetKind::Checkbox if value.is_boolean() => Ok(()),
            WidgetKind::Checkbox => Err(format!("{} is not a boolean", value)),
        }
    }

    /// The value the backing model holds for a widget value.
    fn model_value(&self, value: &Value) -> Value {
        match self {
            WidgetKind::Select { options } => options
                .label_for(value)
                .map(Value::String)
                .unwrap_or(Value::Null),
            WidgetKind::DiscreteSlider { options } => options
                .position(value)
                .map(|i| json!(i))
                .unwrap_or(Value::Null),
            _ => value.clone(),
        }
    }

    fn model_properties(&self) -> Vec<(&'static str, Value)> {
        match self {
            WidgetKind::Select { options } => vec![("options", json!(options.labels()))],
            WidgetKind::DiscreteSlider { options } => vec![
                ("start", json!(0)),
                ("end", json!(options.len().saturating_sub(1))),
                ("step", json!(1)),
            ],
            WidgetKind::IntSlider { start, end, step } => vec![
                ("start", json!(start)),
                ("end", json!(end)),
                ("step", json!(step)),
            ],
            WidgetKind::FloatSlider { start, end, step } => vec![
                ("start", json!(start)),
                ("end", json!(end)),
                ("step", json!(step)),
            ],
            WidgetKind::TextInput | WidgetKind::Checkbox => Vec::new(),
        }
    }
}

/// An interactive control.
pub struct Widget {
    name: String,
    kind: WidgetKind,
    value: Value,
    models: BTreeMap<ModelId, ModelId>,
    watchers: Vec<Watcher>,
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("models", &self.models)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl Widget {
    pub fn new(name: impl Into<String>, kind: WidgetKind, value: Value) -> Result<Self> {
        let name = name.into();
        kind.validate(&value)
            .map_err(|reason| SyncError::InvalidValue {
                widget: name.clone(),
                reason,
            })?;
        Ok(Self {
            name,
            kind,
            value,
            models: BTreeMap::new(),
            watchers: Vec::new(),
        })
    }

    /// A select widget starting on its first option.
    pub fn select(name: impl Into<String>, options: Options) -> Result<Self> {
        let value = options.values().into_iter().next().unwrap_or(Value::Null);
        Self::new(name, WidgetKind::Select { options }, value)
    }

    pub fn int_slider(name: impl Into<String>, start: i64, end: i64, step: i64, value: i64) -> Result<Self> {
        Self::new(name, WidgetKind::IntSlider { start, end, step }, json!(value))
    }

    pub fn float_slider(name: impl Into<String>, start: f64, end: f64, step: f64, value: f64) -> Result<Self> {
        Self::new(name, WidgetKind::FloatSlider { start, end, step }, json!(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &WidgetKind {
        &self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn domain(&self) -> Option<DomainSource> {
        self.kind.domain()
    }

    /// Backing model rendered for `root`.
    pub fn model_for(&self, root: &ModelId) -> Option<&ModelId> {
        self.models.get(root)
    }

    pub fn watch(&mut self, watcher: impl FnMut(&Value, &mut Document) -> Result<()> + Send + 'static) {
        self.watchers.push(Box::new(watcher));
    }

    /// Set the value, mirror it onto every rendered model and run watchers.
    ///
    /// Setting the current value again is a no-op.
    pub fn set_value(&mut self, value: Value, doc: &mut Document) -> Result<()> {
        self.kind
            .validate(&value)
            .map_err(|reason| SyncError::InvalidValue {
                widget: self.name.clone(),
                reason,
            })?;
        if self.value == value {
            return Ok(());
        }
        self.value = value;

        let model_value = self.kind.model_value(&self.value);
        for model in self.models.values() {
            if doc.contains(model) {
                doc.set_property(model, "value", model_value.clone())?;
            }
        }
        let value = &self.value;
        for watcher in &mut self.watchers {
            watcher(value, doc)?;
        }
        Ok(())
    }

    /// Render a fresh backing model for `root` outside of any layout.
    pub(crate) fn render_into(&mut self, doc: &mut Document, root: &ModelId) -> ModelId {
        self.render_as(doc, root, ModelId::new())
    }

    /// Forget the backing model rendered for `root`, returning its id.
    pub(crate) fn release_model(&mut self, root: &ModelId) -> Option<ModelId> {
        self.models.remove(root)
    }

    fn render_as(&mut self, doc: &mut Document, root: &ModelId, id: ModelId) -> ModelId {
        let mut model = Model::with_id(id, self.kind.model_type())
            .with_property("title", json!(self.name))
            .with_property("value", self.kind.model_value(&self.value));
        for (name, value) in self.kind.model_properties() {
            model = model.with_property(name, value);
        }
        let id = doc.insert_model(model);
        self.models.insert(root.clone(), id.clone());
        id
    }
}

/// A display-only component backed by a single model.
#[derive(Debug, Clone)]
pub struct Pane {
    model_type: String,
    properties: Vec<(String, PropertyValue)>,
    models: BTreeMap<ModelId, ModelId>,
}

impl Pane {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            properties: Vec::new(),
            models: BTreeMap::new(),
        }
    }

    /// An HTML text pane.
    pub fn html(text: impl Into<String>) -> Self {
        Self::new("Div").with_property("text", json!(text.into()))
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn model_for(&self, root: &ModelId) -> Option<&ModelId> {
        self.models.get(root)
    }

    fn render_as(&mut self, doc: &mut Document, root: &ModelId, id: ModelId) -> ModelId {
        let mut model = Model::with_id(id, self.model_type.as_str());
        for (name, value) in &self.properties {
            model = model.with_property(name.as_str(), value.clone());
        }
        let id = doc.insert_model(model);
        self.models.insert(root.clone(), id.clone());
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Row,
    Column,
}

/// An ordered container of components.
#[derive(Debug)]
pub struct Layout {
    kind: LayoutKind,
    children: Vec<Component>,
    models: BTreeMap<ModelId, ModelId>,
}

impl Layout {
    pub fn new(kind: LayoutKind, children: Vec<Component>) -> Self {
        Self {
            kind,
            children,
            models: BTreeMap::new(),
        }
    }

    pub fn column(children: Vec<Component>) -> Self {
        Self::new(LayoutKind::Column, children)
    }

    pub fn row(children: Vec<Component>) -> Self {
        Self::new(LayoutKind::Row, children)
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    pub fn push(&mut self, child: impl Into<Component>) {
        self.children.push(child.into());
    }

    pub fn model_for(&self, root: &ModelId) -> Option<&ModelId> {
        self.models.get(root)
    }

    fn render_as(&mut self, doc: &mut Document, root: &ModelId, id: ModelId) -> ModelId {
        let children: Vec<Value> = self
            .children
            .iter_mut()
            .map(|child| child.render(doc, root).to_ref())
            .collect();
        let model_type = match self.kind {
            LayoutKind::Row => "Row",
            LayoutKind::Column => "Column",
        };
        let model = Model::with_id(id, model_type).with_property("children", json!(children));
        let id = doc.insert_model(model);
        self.models.insert(root.clone(), id.clone());
        id
    }
}

/// A node of the component tree.
#[derive(Debug)]
pub enum Component {
    Widget(Widget),
    Pane(Pane),
    Layout(Layout),
}

impl From<Widget> for Component {
    fn from(widget: Widget) -> Self {
        Component::Widget(widget)
    }
}

impl From<Pane> for Component {
    fn from(pane: Pane) -> Self {
        Component::Pane(pane)
    }
}

impl From<Layout> for Component {
    fn from(layout: Layout) -> Self {
        Component::Layout(layout)
    }
}

impl Component {
    /// Render this component as a new root of `doc` and return the root id.
    ///
    /// The models are inserted into the document but not yet added as a root.
    pub fn get_root(&mut self, doc: &mut Document) -> ModelId {
        let root = ModelId::new();
        self.render_as(doc, &root, root.clone())
    }

    fn render(&mut self, doc: &mut Document, root: &ModelId) -> ModelId {
        self.render_as(doc, root, ModelId::new())
    }

    fn render_as(&mut self, doc: &mut Document, root: &ModelId, id: ModelId) -> ModelId {
        match self {
            Component::Widget(widget) => widget.render_as(doc, root, id),
            Component::Pane(pane) => pane.render_as(doc, root, id),
            Component::Layout(layout) => layout.render_as(doc, root, id),
        }
    }

    /// Backing model of this component for `root`.
    pub fn model_for(&self, root: &ModelId) -> Option<&ModelId> {
        match self {
            Component::Widget(widget) => widget.model_for(root),
            Component::Pane(pane) => pane.model_for(root),
            Component::Layout(layout) => layout.model_for(root),
        }
    }

    /// Every component in the tree, this one included, matching `predicate`.
    pub fn select(&self, predicate: impl Fn(&Component) -> bool) -> Vec<&Component> {
        let mut found = Vec::new();
        self.collect(&predicate, &mut found);
        found
    }

    fn collect<'a>(&'a self, predicate: &dyn Fn(&Component) -> bool, found: &mut Vec<&'a Component>) {
        if predicate(self) {
            found.push(self);
        }
        if let Component::Layout(layout) = self {
            for child in &layout.children {
                child.collect(predicate, found);
            }
        }
    }

    /// All widgets in depth-first order.
    pub fn widgets_mut(&mut self) -> Vec<&mut Widget> {
        let mut found = Vec::new();
        self.collect_widgets_mut(&mut found);
        found
    }

    fn collect_widgets_mut<'a>(&'a mut self, found: &mut Vec<&'a mut Widget>) {
        match self {
            Component::Widget(widget) => found.push(widget),
            Component::Layout(layout) => {
                for child in &mut layout.children {
                    child.collect_widgets_mut(found);
                }
            }
            Component::Pane(_) => {}
        }
    }

    pub fn widget_mut(&mut self, name: &str) -> Option<&mut Widget> {
        self.widgets_mut()
            .into_iter()
            .find(|widget| widget.name() == name)
    }
}
