//! Store-independent graph representation produced by parsers.
//!
//! A parser run fills a [`Container`] with [`NodeSet`]s and
//! [`RelationshipSet`]s. Relationship endpoints are references by
//! `(label, key property, key value)`, never by ownership, so an edge may point
//! at nodes another parser produces.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value.into_iter().map(Value::Str).collect())
    }
}

impl From<KeyValue> for Value {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Int(v) => Value::Int(v),
            KeyValue::Str(v) => Value::Str(v),
        }
    }
}

/// The subset of [`Value`] usable as a unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(KeyValue::Int(*v)),
            Value::Str(v) => Some(KeyValue::Str(v.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Str(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        KeyValue::Int(i64::from(value))
    }
}

pub type Properties = BTreeMap<String, Value>;

/// Builds a [`Properties`] map from `(name, value)` pairs.
pub fn props<K, V, I>(pairs: I) -> Properties
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Identity of the nodes on one side of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeSet {
    label: String,
    merge_key: String,
    records: Vec<Properties>,
    positions: HashMap<KeyValue, usize>,
    duplicates: usize,
}

impl NodeSet {
    pub fn new(label: impl Into<String>, merge_key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            merge_key: merge_key.into(),
            records: Vec::new(),
            positions: HashMap::new(),
            duplicates: 0,
        }
    }

    /// Adds a record. A record whose key is already present replaces the
    /// earlier one in place.
    pub fn add_node(&mut self, properties: Properties) -> Result<(), KiraError> {
        let key = properties
            .get(&self.merge_key)
            .and_then(KeyValue::from_value)
            .ok_or_else(|| KiraError::MissingKey {
                label: self.label.clone(),
                key: self.merge_key.clone(),
            })?;

        if let Some(&position) = self.positions.get(&key) {
            let duplicate = KiraError::DuplicateKey {
                label: self.label.clone(),
                key: key.to_string(),
            };
            warn!("{duplicate}");
            self.duplicates += 1;
            self.records[position] = properties;
            return Ok(());
        }

        self.positions.insert(key, self.records.len());
        self.records.push(properties);
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn merge_key(&self) -> &str {
        &self.merge_key
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(&self.label, &self.merge_key)
    }

    pub fn records(&self) -> &[Properties] {
        &self.records
    }

    pub fn contains_key(&self, key: &KeyValue) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records collapsed by last-write-wins since creation.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub start: KeyValue,
    pub end: KeyValue,
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub struct RelationshipSet {
    rel_type: String,
    start: NodeRef,
    end: NodeRef,
    edges: Vec<Edge>,
}

impl RelationshipSet {
    pub fn new(rel_type: impl Into<String>, start: NodeRef, end: NodeRef) -> Self {
        Self {
            rel_type: rel_type.into(),
            start,
            end,
            edges: Vec::new(),
        }
    }

    pub fn add_relationship(
        &mut self,
        start: impl Into<KeyValue>,
        end: impl Into<KeyValue>,
        properties: Properties,
    ) {
        self.edges.push(Edge {
            start: start.into(),
            end: end.into(),
            properties,
        });
    }

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    pub fn start(&self) -> &NodeRef {
        &self.start
    }

    pub fn end(&self) -> &NodeRef {
        &self.end
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Output of one parser run.
#[derive(Debug, Clone, Default)]
pub struct Container {
    nodesets: Vec<NodeSet>,
    relationshipsets: Vec<RelationshipSet>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nodeset(&mut self, nodeset: NodeSet) {
        self.nodesets.push(nodeset);
    }

    pub fn add_relationshipset(&mut self, relationshipset: RelationshipSet) {
        self.relationshipsets.push(relationshipset);
    }

    pub fn nodesets(&self) -> &[NodeSet] {
        &self.nodesets
    }

    pub fn relationshipsets(&self) -> &[RelationshipSet] {
        &self.relationshipsets
    }

    pub fn node_count(&self) -> usize {
        self.nodesets.iter().map(NodeSet::len).sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationshipsets.iter().map(RelationshipSet::len).sum()
    }

    pub fn duplicate_count(&self) -> usize {
        self.nodesets.iter().map(NodeSet::duplicates).sum()
    }
}
