//! JSON encoding of property values and models inside patch content.
//!
//! Numeric arrays have two encodings:
//!
//! ```text
//! binary:  {"__buffer__": id, "dtype": "float64", "shape": [...], "order": "little"}
//! text:    {"__ndarray__": base64, "dtype": "float64", "shape": [...], "order": "little"}
//! ```
//!
//! Binary encoding moves the bytes into a separate [`Buffer`] sent after the
//! content frame.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, SyncError};
use crate::model::{CustomJs, Model, ModelId, NumericArray, PropertyValue, ARRAY_DTYPE, ARRAY_ORDER};

const BUFFER_KEY: &str = "__buffer__";
const NDARRAY_KEY: &str = "__ndarray__";

/// Header sent in the text frame preceding each binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHeader {
    pub id: String,
}

/// A buffer header paired with its raw payload.
pub type Buffer = (BufferHeader, Bytes);

/// Gathers binary payloads while encoding, if buffer transport is enabled.
#[derive(Debug, Default)]
pub struct BufferCollector {
    enabled: bool,
    buffers: Vec<Buffer>,
}

impl BufferCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buffers: Vec::new(),
        }
    }

    pub fn into_buffers(self) -> Vec<Buffer> {
        self.buffers
    }

    fn encode_array(&mut self, array: &NumericArray) -> Value {
        let bytes = array.to_le_bytes();
        if self.enabled {
            let id = self.buffers.len().to_string();
            self.buffers
                .push((BufferHeader { id: id.clone() }, Bytes::from(bytes)));
            json!({
                BUFFER_KEY: id,
                "dtype": ARRAY_DTYPE,
                "shape": array.shape(),
                "order": ARRAY_ORDER,
            })
        } else {
            json!({
                NDARRAY_KEY: STANDARD.encode(bytes),
                "dtype": ARRAY_DTYPE,
                "shape": array.shape(),
                "order": ARRAY_ORDER,
            })
        }
    }
}

/// Encode a property value for patch content.
pub fn encode_property(value: &PropertyValue, collector: &mut BufferCollector) -> Value {
    match value {
        PropertyValue::Json(value) => value.clone(),
        PropertyValue::Array(array) => collector.encode_array(array),
        PropertyValue::Columns(columns) => {
            let encoded: Map<String, Value> = columns
                .iter()
                .map(|(name, array)| (name.clone(), collector.encode_array(array)))
                .collect();
            Value::Object(encoded)
        }
    }
}

fn is_encoded_array(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key(BUFFER_KEY) || obj.contains_key(NDARRAY_KEY))
}

fn decode_array(value: &Value, buffers: &[Buffer]) -> Result<NumericArray> {
    let dtype = value.get("dtype").and_then(Value::as_str);
    if dtype != Some(ARRAY_DTYPE) {
        return Err(SyncError::Protocol(format!(
            "Unsupported array dtype: {:?}",
            dtype
        )));
    }

    let shape = value
        .get("shape")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Protocol("Encoded array is missing its shape".to_string()))?
        .iter()
        .map(|dim| {
            dim.as_u64()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| SyncError::Protocol(format!("Invalid array dimension: {}", dim)))
        })
        .collect::<Result<Vec<usize>>>()?;

    if let Some(encoded) = value.get(NDARRAY_KEY).and_then(Value::as_str) {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| SyncError::Protocol(format!("Invalid base64 array payload: {}", e)))?;
        return NumericArray::from_le_bytes(&bytes, shape);
    }

    let id = value
        .get(BUFFER_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol("Encoded array has no payload".to_string()))?;
    let (_, payload) = buffers
        .iter()
        .find(|(header, _)| header.id == id)
        .ok_or_else(|| SyncError::Protocol(format!("Missing buffer {}", id)))?;
    NumericArray::from_le_bytes(payload, shape)
}

/// Decode a property value from patch content.
pub fn decode_property(value: &Value, buffers: &[Buffer]) -> Result<PropertyValue> {
    if is_encoded_array(value) {
        return decode_array(value, buffers).map(PropertyValue::Array);
    }
    if let Some(obj) = value.as_object() {
        if !obj.is_empty() && obj.values().all(is_encoded_array) {
            let columns = obj
                .iter()
                .map(|(name, column)| Ok((name.clone(), decode_array(column, buffers)?)))
                .collect::<Result<BTreeMap<String, NumericArray>>>()?;
            return Ok(PropertyValue::Columns(columns));
        }
    }
    Ok(PropertyValue::Json(value.clone()))
}

/// Encode a full model as a patch reference.
pub fn encode_model(model: &Model, collector: &mut BufferCollector) -> Result<Value> {
    let mut attributes: Map<String, Value> = model
        .properties()
        .iter()
        .map(|(name, value)| (name.clone(), encode_property(value, collector)))
        .collect();
    if !model.tags().is_empty() {
        attributes.insert("tags".to_string(), json!(model.tags()));
    }
    if !model.js_property_callbacks().is_empty() {
        attributes.insert(
            "js_property_callbacks".to_string(),
            serde_json::to_value(model.js_property_callbacks())?,
        );
    }
    Ok(json!({
        "type": model.model_type(),
        "id": model.id(),
        "attributes": attributes,
    }))
}

/// Decode a model from a patch reference.
pub fn decode_model(value: &Value, buffers: &[Buffer]) -> Result<Model> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol("Reference is missing an id".to_string()))?;
    let model_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol(format!("Reference {} is missing a type", id)))?;

    let mut model = Model::with_id(ModelId::from(id), model_type);
    let Some(attributes) = value.get("attributes").and_then(Value::as_object) else {
        return Ok(model);
    };

    for (name, attr) in attributes {
        match name.as_str() {
            "tags" => {
                let tags: Vec<String> = serde_json::from_value(attr.clone())?;
                model.set_tags(tags);
            }
            "js_property_callbacks" => {
                let callbacks: BTreeMap<String, Vec<CustomJs>> =
                    serde_json::from_value(attr.clone())?;
                model.set_js_property_callbacks(callbacks);
            }
            _ => {
                model.replace_property(name, decode_property(attr, buffers)?);
            }
        }
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_array_goes_to_buffer() {
        let mut collector = BufferCollector::new(true);
        let array = NumericArray::new(vec![1.0, 2.0]);
        let encoded = encode_property(&PropertyValue::Array(array.clone()), &mut collector);

        assert_eq!(encoded[BUFFER_KEY], "0");
        assert_eq!(encoded["shape"], json!([2]));
        let buffers = collector.into_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].1.len(), 16);

        let decoded = decode_property(&encoded, &buffers).unwrap();
        assert_eq!(decoded, PropertyValue::Array(array));
    }

    #[test]
    fn test_text_array_is_inlined() {
        let mut collector = BufferCollector::new(false);
        let array = NumericArray::new(vec![0.5]);
        let encoded = encode_property(&PropertyValue::Array(array.clone()), &mut collector);

        assert!(encoded.get(NDARRAY_KEY).is_some());
        assert!(collector.into_buffers().is_empty());
        assert_eq!(decode_property(&encoded, &[]).unwrap(), PropertyValue::Array(array));
    }

    #[test]
    fn test_columns_decode_as_columns() {
        let mut columns = BTreeMap::new();
        columns.insert("x".to_string(), NumericArray::new(vec![1.0, 2.0]));
        columns.insert("y".to_string(), NumericArray::new(vec![3.0, 4.0]));
        let value = PropertyValue::Columns(columns);

        let mut collector = BufferCollector::new(true);
        let encoded = encode_property(&value, &mut collector);
        let buffers = collector.into_buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!(decode_property(&encoded, &buffers).unwrap(), value);
    }

    #[test]
    fn test_plain_objects_stay_json() {
        let value = json!({"a": 1});
        assert_eq!(decode_property(&value, &[]).unwrap(), PropertyValue::Json(value));
        let empty = json!({});
        assert_eq!(decode_property(&empty, &[]).unwrap(), PropertyValue::Json(empty));
    }

    #[test]
    fn test_missing_buffer_is_error() {
        let encoded = json!({BUFFER_KEY: "7", "dtype": "float64", "shape": [1], "order": "little"});
        assert!(matches!(
            decode_property(&encoded, &[]),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_model_reference() {
        let mut model = Model::new("Select").with_property("value", json!("a"));
        model.add_tag("embedded");
        model.js_on_change("value", CustomJs::new("x()"));

        let encoded = encode_model(&model, &mut BufferCollector::new(false)).unwrap();
        assert_eq!(encoded["type"], "Select");
        assert_eq!(encoded["attributes"]["tags"], json!(["embedded"]));

        let decoded = decode_model(&encoded, &[]).unwrap();
        assert_eq!(decoded, model);
    }
}
