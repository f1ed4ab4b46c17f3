//! Original key order of structured provider payloads.
//!
//! Objects are addressed by RFC 6901 JSON pointers (`""` is the document
//! root, `/Josh` the object under the `Josh` key). Each pointer maps to the
//! keys of that object in the order the provider emitted them, so a turn can
//! later be re-serialized exactly as the provider first wrote it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ROOT: &str = "";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyOrder(BTreeMap<String, Vec<String>>);

impl PropertyOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the key order of every object reachable from `value`.
    pub fn capture(value: &Value) -> Self {
        let mut order = Self::new();
        order.capture_at(ROOT, value);
        order
    }

    fn capture_at(&mut self, pointer: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                self.0
                    .insert(pointer.to_string(), map.keys().cloned().collect());
                for (key, child) in map {
                    self.capture_at(&child_pointer(pointer, key), child);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    self.capture_at(&child_pointer(pointer, &index.to_string()), child);
                }
            }
            _ => {}
        }
    }

    pub fn record(&mut self, pointer: impl Into<String>, keys: Vec<String>) {
        self.0.insert(pointer.into(), keys);
    }

    pub fn keys_at(&self, pointer: &str) -> Option<&[String]> {
        self.0.get(pointer).map(Vec::as_slice)
    }

    /// Fold a later document's order into this one.
    ///
    /// Root keys are unioned in first-seen order, the same position a merged
    /// handle keeps in the merged mapping. Everything under a handle present
    /// in `later` is replaced wholesale by `later`'s entries.
    pub fn merge(&mut self, later: PropertyOrder) {
        let mut later = later.0;
        let incoming_root = later.remove(ROOT).unwrap_or_default();

        for key in &incoming_root {
            let prefix = child_pointer(ROOT, key);
            self.0.retain(|pointer, _| !is_within(pointer, &prefix));
        }

        let root = self.0.entry(ROOT.to_string()).or_default();
        for key in incoming_root {
            if !root.contains(&key) {
                root.push(key);
            }
        }

        self.0.extend(later);
    }

    /// The slice of this order that describes a single top-level entry,
    /// re-rooted so the document is `{ key: ... }`.
    pub fn scoped(&self, key: &str) -> PropertyOrder {
        let prefix = child_pointer(ROOT, key);
        let mut scoped = PropertyOrder::new();
        scoped.record(ROOT, vec![key.to_string()]);
        for (pointer, keys) in &self.0 {
            if is_within(pointer, &prefix) {
                scoped.0.insert(pointer.clone(), keys.clone());
            }
        }
        scoped
    }

    /// Drop keys rejected by `keep` from the object at `pointer`, along with
    /// any order recorded beneath them.
    pub fn retain_keys(&mut self, pointer: &str, keep: impl Fn(&str) -> bool) {
        let Some(keys) = self.0.get_mut(pointer) else {
            return;
        };
        let mut dropped = Vec::new();
        keys.retain(|key| {
            let kept = keep(key);
            if !kept {
                dropped.push(child_pointer(pointer, key));
            }
            kept
        });
        for prefix in dropped {
            self.0.retain(|p, _| !is_within(p, &prefix));
        }
    }

    /// Rebuild `value` so every object lists its keys in the recorded order.
    /// Keys with no recorded position keep their current relative order and
    /// follow the recorded ones.
    pub fn apply(&self, value: Value) -> Value {
        self.apply_at(ROOT, value)
    }

    fn apply_at(&self, pointer: &str, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Option<Value>)> =
                    map.into_iter().map(|(k, v)| (k, Some(v))).collect();
                let mut ordered = Map::new();

                if let Some(keys) = self.0.get(pointer) {
                    for key in keys {
                        let slot = entries
                            .iter_mut()
                            .find(|(k, _)| k == key)
                            .and_then(|(_, v)| v.take());
                        if let Some(child) = slot {
                            let child = self.apply_at(&child_pointer(pointer, key), child);
                            ordered.insert(key.clone(), child);
                        }
                    }
                }

                for (key, slot) in entries {
                    if let Some(child) = slot {
                        let child = self.apply_at(&child_pointer(pointer, &key), child);
                        ordered.insert(key, child);
                    }
                }

                Value::Object(ordered)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, child)| {
                        self.apply_at(&child_pointer(pointer, &index.to_string()), child)
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

pub fn child_pointer(parent: &str, key: &str) -> String {
    format!("{parent}/{}", escape_segment(key))
}

fn escape_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn is_within(pointer: &str, prefix: &str) -> bool {
    pointer == prefix
        || pointer
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
