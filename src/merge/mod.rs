//! Secret value model and deep merge.
//!
//! [`SecretTree`] is the payload of a single secret: a scalar, an ordered
//! mapping, or a sequence. Mapping key order is insertion order and is
//! irrelevant for equality; sequence order is significant. A [`SecretTree::Set`]
//! is a sequence with a uniqueness tag; free-form JSON never deserializes
//! into one, so dedup only applies where a producer opted in.
//!
//! [`deep_merge`] composes two trees under the merge law:
//! - mapping ∘ mapping: key union, recursing on shared keys; base keys keep
//!   their order, overlay-only keys follow in overlay order
//! - sequence ∘ sequence: concatenation, duplicates preserved
//! - set ∘ set: union, base order first
//! - scalar or type mismatch: overlay replaces base wholesale
//! - explicit null in the overlay replaces; an absent key does not
//!
//! The merge is associative up to scalar override and folds left-to-right
//! deterministically; the empty mapping is a left identity.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::errors::{Result, VaultSyncError};

/// Fully merged output for one scope: ordered `path -> value`
pub type MergedBundle = IndexMap<String, SecretTree>;

/// A recursive secret value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretTree {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<SecretTree>),
    /// Sequence with set semantics; only produced programmatically.
    /// Listed after `Sequence` so untagged deserialization never yields it.
    Set(Vec<SecretTree>),
    Mapping(IndexMap<String, SecretTree>),
}

impl SecretTree {
    /// The empty mapping, the left identity of the merge
    pub fn empty_mapping() -> Self {
        SecretTree::Mapping(IndexMap::new())
    }

    /// Build a set-typed value from elements, deduplicating in order
    pub fn set_of(elements: Vec<SecretTree>) -> Self {
        let mut out: Vec<SecretTree> = Vec::with_capacity(elements.len());
        for e in elements {
            if !out.contains(&e) {
                out.push(e);
            }
        }
        SecretTree::Set(out)
    }

    pub fn is_empty_mapping(&self) -> bool {
        matches!(self, SecretTree::Mapping(m) if m.is_empty())
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, SecretTree>> {
        match self {
            SecretTree::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Number of nodes in the tree, counting this one
    pub fn node_count(&self) -> usize {
        match self {
            SecretTree::Sequence(items) | SecretTree::Set(items) => {
                1 + items.iter().map(SecretTree::node_count).sum::<usize>()
            }
            SecretTree::Mapping(map) => {
                1 + map.values().map(SecretTree::node_count).sum::<usize>()
            }
            _ => 1,
        }
    }

    /// Convert to a `serde_json::Value` with mapping keys sorted
    ///
    /// This is the canonical form: content-hash-comparable regardless of
    /// insertion order. Sequence order is preserved.
    pub fn to_canonical_value(&self) -> serde_json::Value {
        match self {
            SecretTree::Null => serde_json::Value::Null,
            SecretTree::Bool(b) => serde_json::Value::Bool(*b),
            SecretTree::Number(n) => serde_json::Value::Number(n.clone()),
            SecretTree::String(s) => serde_json::Value::String(s.clone()),
            SecretTree::Sequence(items) | SecretTree::Set(items) => {
                serde_json::Value::Array(items.iter().map(SecretTree::to_canonical_value).collect())
            }
            SecretTree::Mapping(map) => {
                let mut entries: Vec<(&String, &SecretTree)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                serde_json::Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.to_canonical_value()))
                        .collect(),
                )
            }
        }
    }

    /// Canonical JSON encoding: sorted mapping keys, UTF-8, no trailing newline
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_canonical_value())?)
    }

    /// Parse a tree from JSON bytes
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<serde_json::Value> for SecretTree {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SecretTree::Null,
            serde_json::Value::Bool(b) => SecretTree::Bool(b),
            serde_json::Value::Number(n) => SecretTree::Number(n),
            serde_json::Value::String(s) => SecretTree::String(s),
            serde_json::Value::Array(items) => {
                SecretTree::Sequence(items.into_iter().map(SecretTree::from).collect())
            }
            serde_json::Value::Object(map) => SecretTree::Mapping(
                map.into_iter().map(|(k, v)| (k, SecretTree::from(v))).collect(),
            ),
        }
    }
}

/// Deep equality: mappings key-sorted, sequences ordered, scalars by
/// value and type
impl PartialEq for SecretTree {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SecretTree::Null, SecretTree::Null) => true,
            (SecretTree::Bool(a), SecretTree::Bool(b)) => a == b,
            (SecretTree::Number(a), SecretTree::Number(b)) => a == b,
            (SecretTree::String(a), SecretTree::String(b)) => a == b,
            (SecretTree::Sequence(a), SecretTree::Sequence(b))
            | (SecretTree::Set(a), SecretTree::Set(b)) => a == b,
            (SecretTree::Mapping(a), SecretTree::Mapping(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            _ => false,
        }
    }
}

impl Eq for SecretTree {}

/// Merge `overlay` into `base` under the merge law, no node bound
pub fn deep_merge(base: SecretTree, overlay: SecretTree) -> SecretTree {
    // Unbounded merge cannot fail.
    merge_counted(base, overlay, &mut 0, usize::MAX).expect("unbounded merge is infallible")
}

/// Merge with a node budget; fails with `MergeBoundExceeded`
/// once the combined output would visit more than `node_limit` nodes
pub fn deep_merge_bounded(
    base: SecretTree,
    overlay: SecretTree,
    node_limit: usize,
) -> Result<SecretTree> {
    let mut visited = 0usize;
    merge_counted(base, overlay, &mut visited, node_limit)
}

fn merge_counted(
    base: SecretTree,
    overlay: SecretTree,
    visited: &mut usize,
    limit: usize,
) -> Result<SecretTree> {
    *visited += 1;
    if *visited > limit {
        return Err(VaultSyncError::MergeBoundExceeded { limit });
    }

    match (base, overlay) {
        (SecretTree::Mapping(mut base_map), SecretTree::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => {
                        let base_value = std::mem::replace(slot, SecretTree::Null);
                        *slot = merge_counted(base_value, overlay_value, visited, limit)?;
                    }
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
            Ok(SecretTree::Mapping(base_map))
        }
        (SecretTree::Sequence(mut base_items), SecretTree::Sequence(overlay_items)) => {
            base_items.extend(overlay_items);
            Ok(SecretTree::Sequence(base_items))
        }
        (SecretTree::Set(mut base_items), SecretTree::Set(overlay_items)) => {
            for item in overlay_items {
                if !base_items.contains(&item) {
                    base_items.push(item);
                }
            }
            Ok(SecretTree::Set(base_items))
        }
        // Scalars, explicit nulls, and type mismatches: overlay wins wholesale.
        (_, overlay) => Ok(overlay),
    }
}
