//! Backing visual elements held by a [`Document`](crate::Document).
//!
//! A [`Model`] is the server-side replica of one object in the browser's
//! document: a type name, a bag of properties and the client-side callbacks
//! attached to them. Models are owned by exactly one document, which is the
//! only place their properties may be changed with change tracking.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Model types that carry data or behaviour but cannot be displayed on their own.
pub const DATA_MODEL_TYPES: &[&str] = &["ColumnDataSource", "CustomJS", "State"];

/// Dtype tag for every [`NumericArray`] on the wire.
pub const ARRAY_DTYPE: &str = "float64";

/// Byte order tag for every [`NumericArray`] on the wire.
pub const ARRAY_ORDER: &str = "little";

/// Unique identifier of a model within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `{"id": ...}` reference form used inside patch content.
    pub fn to_ref(&self) -> Value {
        json!({ "id": self.0 })
    }

    /// Parse a `{"id": ...}` reference.
    pub fn from_ref(value: &Value) -> Option<Self> {
        value.get("id").and_then(Value::as_str).map(Self::from)
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A flat float64 array with an explicit shape.
///
/// Arrays are the only property values that may travel as binary buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    data: Vec<f64>,
    shape: Vec<usize>,
}

impl NumericArray {
    /// Create a one-dimensional array.
    pub fn new(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Create an array with an explicit shape. The shape must cover the data exactly.
    pub fn with_shape(data: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| SyncError::Protocol(format!("Array shape {:?} is too large", shape)))?;
        if expected != data.len() {
            return Err(SyncError::Protocol(format!(
                "Array shape {:?} does not match {} elements",
                shape,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Little-endian byte representation.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 8);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Rebuild an array from little-endian bytes.
    pub fn from_le_bytes(bytes: &[u8], shape: Vec<usize>) -> Result<Self> {
        if bytes.len() % 8 != 0 {
            return Err(SyncError::Protocol(format!(
                "Array payload of {} bytes is not a multiple of 8",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Self::with_shape(data, shape)
    }
}

/// The value of one model property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Any plain JSON value.
    Json(Value),
    /// A single numeric array.
    Array(NumericArray),
    /// Named numeric columns, as held by a column data source.
    Columns(BTreeMap<String, NumericArray>),
}

impl PropertyValue {
    /// The plain JSON value, if this property is not array-backed.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropertyValue::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Json(value)
    }
}

impl From<NumericArray> for PropertyValue {
    fn from(array: NumericArray) -> Self {
        PropertyValue::Array(array)
    }
}

impl From<BTreeMap<String, NumericArray>> for PropertyValue {
    fn from(columns: BTreeMap<String, NumericArray>) -> Self {
        PropertyValue::Columns(columns)
    }
}

/// A client-side callback executed by the browser when a property changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJs {
    pub code: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, ModelId>,
}

impl CustomJs {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, model: ModelId) -> Self {
        self.args.insert(name.into(), model);
        self
    }
}

/// A backing visual element.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    id: ModelId,
    model_type: String,
    properties: BTreeMap<String, PropertyValue>,
    tags: Vec<String>,
    js_property_callbacks: BTreeMap<String, Vec<CustomJs>>,
}

impl Model {
    /// Create a model of the given type with a fresh id.
    pub fn new(model_type: impl Into<String>) -> Self {
        Self::with_id(ModelId::new(), model_type)
    }

    pub fn with_id(id: ModelId, model_type: impl Into<String>) -> Self {
        Self {
            id,
            model_type: model_type.into(),
            properties: BTreeMap::new(),
            tags: Vec::new(),
            js_property_callbacks: BTreeMap::new(),
        }
    }

    /// Builder-style property initialisation. Does not produce change events.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Whether this model can be displayed as a layout element.
    pub fn is_layout(&self) -> bool {
        !DATA_MODEL_TYPES.contains(&self.model_type.as_str())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Shortcut for a plain JSON property.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.property(name).and_then(PropertyValue::as_json)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Replace a property without change tracking, returning the previous value.
    pub(crate) fn replace_property(&mut self, name: &str, value: PropertyValue) -> Option<PropertyValue> {
        self.properties.insert(name.to_string(), value)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    /// Attach a client-side callback to changes of `attr`.
    pub fn js_on_change(&mut self, attr: &str, callback: CustomJs) {
        self.js_property_callbacks
            .entry(format!("change:{}", attr))
            .or_default()
            .push(callback);
    }

    pub fn js_property_callbacks(&self) -> &BTreeMap<String, Vec<CustomJs>> {
        &self.js_property_callbacks
    }

    pub(crate) fn set_js_property_callbacks(&mut self, callbacks: BTreeMap<String, Vec<CustomJs>>) {
        self.js_property_callbacks = callbacks;
    }

    pub(crate) fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    /// Ids referenced by the `children` property, in order.
    pub fn child_ids(&self) -> Vec<ModelId> {
        self.value("children")
            .and_then(Value::as_array)
            .map(|children| children.iter().filter_map(ModelId::from_ref).collect())
            .unwrap_or_default()
    }
}
