use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A typed handle into a [`WorkflowContext`].
///
/// The key's type parameter fixes what may be stored under its name; a read
/// through a key of a different type finds nothing.
pub struct ContextKey<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn type_tag() -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("name", &self.name)
            .field("type", &Self::type_tag())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContextEntry {
    #[serde(rename = "type")]
    type_tag: String,
    value: serde_json::Value,
}

/// Immutable, type-keyed side channel carried next to the payload.
///
/// Values are kept as JSON so a snapshot of the whole context serializes
/// without knowing the concrete types. Every update returns a new instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    entries: BTreeMap<String, ContextEntry>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value. Returns `None` when the key is absent, was written with a
    /// different type, or no longer deserializes into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &ContextKey<T>) -> Option<T> {
        let entry = self.entries.get(key.name())?;
        if entry.type_tag != ContextKey::<T>::type_tag() {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    /// Raw JSON view of a value regardless of its declared type.
    pub fn get_raw(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name).map(|e| &e.value)
    }

    /// Return a copy with `key` set to `value`.
    pub fn put<T: Serialize>(&self, key: &ContextKey<T>, value: T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        let mut next = self.clone();
        next.entries.insert(
            key.name().to_string(),
            ContextEntry {
                type_tag: ContextKey::<T>::type_tag().to_string(),
                value,
            },
        );
        Ok(next)
    }

    /// Return a copy without `name`.
    pub fn remove(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.entries.remove(name);
        next
    }

    /// Right-biased merge: entries of `other` win on conflict.
    pub fn merge(&self, other: &WorkflowContext) -> Self {
        let mut next = self.clone();
        for (k, v) in &other.entries {
            next.entries.insert(k.clone(), v.clone());
        }
        next
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_put_and_get() {
        let name: ContextKey<String> = ContextKey::new("name");
        let count: ContextKey<u32> = ContextKey::new("count");

        let ctx = WorkflowContext::new()
            .put(&name, "Alice".to_string())
            .unwrap()
            .put(&count, 42)
            .unwrap();

        assert_eq!(ctx.get(&name), Some("Alice".to_string()));
        assert_eq!(ctx.get(&count), Some(42));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_put_does_not_mutate_original() {
        let key: ContextKey<bool> = ContextKey::new("approved");
        let empty = WorkflowContext::new();
        let updated = empty.put(&key, true).unwrap();
        assert!(empty.is_empty());
        assert_eq!(updated.get(&key), Some(true));
    }

    #[test]
    fn test_type_mismatch_reads_nothing() {
        let as_int: ContextKey<i64> = ContextKey::new("score");
        let as_str: ContextKey<String> = ContextKey::new("score");
        let ctx = WorkflowContext::new().put(&as_int, 7).unwrap();

        assert_eq!(ctx.get(&as_str), None);
        assert_eq!(ctx.get_raw("score"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn test_merge_is_right_biased() {
        let a: ContextKey<String> = ContextKey::new("a");
        let b: ContextKey<String> = ContextKey::new("b");
        let c: ContextKey<String> = ContextKey::new("c");

        let left = WorkflowContext::new()
            .put(&a, "1".into())
            .unwrap()
            .put(&b, "2".into())
            .unwrap();
        let right = WorkflowContext::new()
            .put(&b, "overwritten".into())
            .unwrap()
            .put(&c, "3".into())
            .unwrap();

        let merged = left.merge(&right);
        assert_eq!(merged.get(&a).as_deref(), Some("1"));
        assert_eq!(merged.get(&b).as_deref(), Some("overwritten"));
        assert_eq!(merged.get(&c).as_deref(), Some("3"));
        assert_eq!(left.get(&b).as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_and_keys() {
        let a: ContextKey<u8> = ContextKey::new("a");
        let b: ContextKey<u8> = ContextKey::new("b");
        let ctx = WorkflowContext::new()
            .put(&a, 1)
            .unwrap()
            .put(&b, 2)
            .unwrap()
            .remove("a");

        assert!(!ctx.contains("a"));
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_types() {
        let key: ContextKey<Vec<String>> = ContextKey::new("tags");
        let ctx = WorkflowContext::new()
            .put(&key, vec!["x".into(), "y".into()])
            .unwrap();

        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: WorkflowContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
        assert_eq!(parsed.get(&key), Some(vec!["x".to_string(), "y".to_string()]));
    }
}
