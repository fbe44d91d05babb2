//! Attribute model: name -> finite set of scalar values
//!
//! Attribute sets form a join/meet semilattice: union is used on
//! merge/pushout, intersection on pullback, difference on attribute
//! removal. Single values are normalized to one-element sets. An absent
//! key means "unconstrained", which is distinct from an empty set.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Scalar attribute value
///
/// Total order derived so that attribute sets iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Finite set of scalar values
pub type AttrSet = BTreeSet<AttrValue>;

/// Attribute map of a node or an edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attrs(pub BTreeMap<String, AttrSet>);

impl Attrs {
    pub fn new() -> Self {
        Attrs(BTreeMap::new())
    }

    /// Build from (name, values) pairs, normalizing duplicates away
    pub fn from_pairs<K, V, I, VI>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AttrValue>,
        I: IntoIterator<Item = (K, VI)>,
        VI: IntoIterator<Item = V>,
    {
        let mut map = BTreeMap::new();
        for (k, vs) in pairs {
            let set: AttrSet = vs.into_iter().map(Into::into).collect();
            map.insert(k.into(), set);
        }
        Attrs(map)
    }

    /// Coerce a single scalar to a one-element set
    pub fn from_value<K: Into<String>, V: Into<AttrValue>>(key: K, value: V) -> Self {
        let mut map = BTreeMap::new();
        let mut set = AttrSet::new();
        set.insert(value.into());
        map.insert(key.into(), set);
        Attrs(map)
    }

    /// Parse the boundary format: a JSON object mapping attribute names
    /// to scalars or arrays of scalars. Null values are rejected; absence
    /// is modeled by key absence.
    pub fn from_json(value: &JsonValue) -> Result<Self, EngineError> {
        let obj = value.as_object().ok_or_else(|| {
            EngineError::InvalidAttrValue("attribute map must be a JSON object".to_string())
        })?;
        let mut map = BTreeMap::new();
        for (k, v) in obj {
            let mut set = AttrSet::new();
            match v {
                JsonValue::Array(elems) => {
                    for el in elems {
                        set.insert(json_scalar(k, el)?);
                    }
                }
                other => {
                    set.insert(json_scalar(k, other)?);
                }
            }
            map.insert(k.clone(), set);
        }
        Ok(Attrs(map))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AttrSet> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str, value: &AttrValue) -> bool {
        self.0.get(key).map(|s| s.contains(value)).unwrap_or(false)
    }

    /// Key-wise set union; keys present on either side survive
    pub fn union(&self, other: &Attrs) -> Attrs {
        let mut result = self.0.clone();
        for (k, vs) in &other.0 {
            result
                .entry(k.clone())
                .or_insert_with(AttrSet::new)
                .extend(vs.iter().cloned());
        }
        Attrs(result)
    }

    /// Key-wise set intersection; keys missing from either side are dropped
    pub fn intersection(&self, other: &Attrs) -> Attrs {
        let mut result = BTreeMap::new();
        for (k, vs) in &self.0 {
            if let Some(other_vs) = other.0.get(k) {
                let common: AttrSet = vs.intersection(other_vs).cloned().collect();
                if !common.is_empty() {
                    result.insert(k.clone(), common);
                }
            }
        }
        Attrs(result)
    }

    /// Key-wise set difference; keys emptied by the removal are dropped
    pub fn difference(&self, other: &Attrs) -> Attrs {
        let mut result = BTreeMap::new();
        for (k, vs) in &self.0 {
            match other.0.get(k) {
                Some(other_vs) => {
                    let remaining: AttrSet = vs.difference(other_vs).cloned().collect();
                    if !remaining.is_empty() {
                        result.insert(k.clone(), remaining);
                    }
                }
                None => {
                    result.insert(k.clone(), vs.clone());
                }
            }
        }
        Attrs(result)
    }

    /// True when every key/value of self is present in other
    pub fn is_subset_of(&self, other: &Attrs) -> bool {
        self.0.iter().all(|(k, vs)| {
            other
                .0
                .get(k)
                .map(|other_vs| vs.is_subset(other_vs))
                .unwrap_or(false)
        })
    }

    pub fn to_json(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        for (k, vs) in &self.0 {
            let arr: Vec<JsonValue> = vs
                .iter()
                .map(|v| match v {
                    AttrValue::Bool(b) => JsonValue::Bool(*b),
                    AttrValue::Int(i) => JsonValue::from(*i),
                    AttrValue::Str(s) => JsonValue::String(s.clone()),
                })
                .collect();
            obj.insert(k.clone(), JsonValue::Array(arr));
        }
        JsonValue::Object(obj)
    }
}

fn json_scalar(key: &str, value: &JsonValue) -> Result<AttrValue, EngineError> {
    match value {
        JsonValue::Bool(b) => Ok(AttrValue::Bool(*b)),
        JsonValue::Number(n) => n.as_i64().map(AttrValue::Int).ok_or_else(|| {
            EngineError::InvalidAttrValue(format!(
                "attribute '{}': only integer numbers are supported",
                key
            ))
        }),
        JsonValue::String(s) => Ok(AttrValue::Str(s.clone())),
        JsonValue::Null => Err(EngineError::InvalidAttrValue(format!(
            "attribute '{}': null is not a value, omit the key instead",
            key
        ))),
        other => Err(EngineError::InvalidAttrValue(format!(
            "attribute '{}': unsupported value {}",
            key, other
        ))),
    }
}
