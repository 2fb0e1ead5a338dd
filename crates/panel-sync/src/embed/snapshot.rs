//! The nested, value-keyed tree of recorded patches.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::diff::RecordedPatch;
use crate::error::{Result, SyncError};

const PATCH_KEYS: [&str; 3] = ["header", "metadata", "content"];

/// A tree key: a widget value stringified the way a browser stringifies
/// object keys, so `1`, `1.0` and `"1"` all map to `"1"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(String);

impl StateKey {
    pub fn from_value(value: &Value) -> Self {
        let key = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => i.to_string(),
                (_, Some(u), _) => u.to_string(),
                (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
                (_, _, Some(f)) => f.to_string(),
                _ => n.to_string(),
            },
            other => other.to_string(),
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One level of the snapshot tree. Leaves carry the patch recorded for the
/// combination on their path; a leaf without a patch means nothing changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotTree {
    children: BTreeMap<StateKey, SnapshotTree>,
    patch: Option<RecordedPatch>,
}

impl SnapshotTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the child under `key`, creating an empty one if needed.
    pub fn child_mut(&mut self, key: StateKey) -> &mut SnapshotTree {
        self.children.entry(key).or_default()
    }

    pub fn child(&self, key: &StateKey) -> Option<&SnapshotTree> {
        self.children.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.children.keys()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.patch.is_none()
    }

    pub fn patch(&self) -> Option<&RecordedPatch> {
        self.patch.as_ref()
    }

    pub fn set_patch(&mut self, patch: RecordedPatch) {
        self.patch = Some(patch);
    }

    pub fn lookup(&self, path: &[StateKey]) -> Option<&SnapshotTree> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    /// Number of recorded patches in the whole tree.
    pub fn patch_count(&self) -> usize {
        usize::from(self.patch.is_some())
            + self.children.values().map(SnapshotTree::patch_count).sum::<usize>()
    }

    /// JSON form: child keys map to subtrees, and a recorded patch adds the
    /// `header`, `metadata` and `content` string entries.
    pub fn to_json(&self) -> Value {
        let mut obj: Map<String, Value> = self
            .children
            .iter()
            .map(|(key, child)| (key.0.clone(), child.to_json()))
            .collect();
        if let Some(patch) = &self.patch {
            obj.insert("header".to_string(), Value::String(patch.header.clone()));
            obj.insert("metadata".to_string(), Value::String(patch.metadata.clone()));
            obj.insert("content".to_string(), Value::String(patch.content.clone()));
        }
        Value::Object(obj)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::Protocol("Snapshot node must be an object".to_string()))?;

        let segment = |name: &str| obj.get(name).and_then(Value::as_str).map(str::to_string);
        let patch = match (segment("header"), segment("metadata"), segment("content")) {
            (Some(header), Some(metadata), Some(content)) => Some(RecordedPatch {
                header,
                metadata,
                content,
            }),
            _ => None,
        };

        let mut children = BTreeMap::new();
        for (key, child) in obj {
            if patch.is_some() && PATCH_KEYS.contains(&key.as_str()) {
                continue;
            }
            children.insert(StateKey(key.clone()), Self::from_json(child)?);
        }
        Ok(Self { children, patch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(tag: &str) -> RecordedPatch {
        RecordedPatch {
            header: format!("h{}", tag),
            metadata: "{}".to_string(),
            content: format!("c{}", tag),
        }
    }

    #[test]
    fn test_keys_follow_browser_stringification() {
        assert_eq!(StateKey::from_value(&json!(1)).as_str(), "1");
        assert_eq!(StateKey::from_value(&json!(1.0)).as_str(), "1");
        assert_eq!(StateKey::from_value(&json!(0.5)).as_str(), "0.5");
        assert_eq!(StateKey::from_value(&json!("a")).as_str(), "a");
        assert_eq!(StateKey::from_value(&json!(true)).as_str(), "true");
        assert_eq!(StateKey::from_value(&Value::Null).as_str(), "null");
    }

    #[test]
    fn test_child_mut_creates_path() {
        let mut tree = SnapshotTree::new();
        tree.child_mut("a".into())
            .child_mut("x".into())
            .set_patch(patch("1"));
        tree.child_mut("a".into()).child_mut("y".into());

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.child(&"a".into()).unwrap().len(), 2);
        let leaf = tree.lookup(&["a".into(), "x".into()]).unwrap();
        assert_eq!(leaf.patch(), Some(&patch("1")));
        assert!(tree.lookup(&["a".into(), "y".into()]).unwrap().patch().is_none());
        assert!(tree.lookup(&["b".into()]).is_none());
        assert_eq!(tree.patch_count(), 1);
    }

    #[test]
    fn test_json_layout() {
        let mut tree = SnapshotTree::new();
        tree.child_mut("1".into()).set_patch(patch("1"));
        tree.child_mut("2".into());

        let value = tree.to_json();
        assert_eq!(
            value,
            json!({
                "1": {"header": "h1", "metadata": "{}", "content": "c1"},
                "2": {},
            })
        );
        assert_eq!(SnapshotTree::from_json(&value).unwrap(), tree);
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(SnapshotTree::from_json(&json!({"1": 2})).is_err());
    }
}
