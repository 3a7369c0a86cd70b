//! In-process [`GraphStore`] used by test run mode and by tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::KiraError;
use crate::graph::{Edge, KeyValue, NodeRef, Properties};
use crate::graphdb::GraphStore;

type NodeId = (NodeRef, KeyValue);
type RelationshipId = (String, NodeId, NodeId);

#[derive(Debug, Default)]
struct MemoryGraph {
    indexes: BTreeSet<NodeRef>,
    nodes: HashMap<NodeId, Properties>,
    relationships: HashMap<RelationshipId, Properties>,
}

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: Mutex<MemoryGraph>,
    pending_failures: AtomicU32,
    write_calls: AtomicUsize,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn index_count(&self) -> usize {
        self.lock().indexes.len()
    }

    pub fn has_index(&self, label: &str, key: &str) -> bool {
        self.lock().indexes.contains(&NodeRef::new(label, key))
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn nodes_with_label(&self, label: &str) -> usize {
        self.lock()
            .nodes
            .keys()
            .filter(|(node, _)| node.label == label)
            .count()
    }

    pub fn node(&self, label: &str, key: &str, value: impl Into<KeyValue>) -> Option<Properties> {
        self.lock()
            .nodes
            .get(&(NodeRef::new(label, key), value.into()))
            .cloned()
    }

    pub fn relationship_count(&self) -> usize {
        self.lock().relationships.len()
    }

    pub fn relationships_of_type(&self, rel_type: &str) -> usize {
        self.lock()
            .relationships
            .keys()
            .filter(|(kind, _, _)| kind == rel_type)
            .count()
    }

    /// True when every relationship joins two stored nodes.
    pub fn is_referentially_complete(&self) -> bool {
        let graph = self.lock();
        graph
            .relationships
            .keys()
            .all(|(_, start, end)| graph.nodes.contains_key(start) && graph.nodes.contains_key(end))
    }

    /// Calls that reached the store, successful or not.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self) -> Result<(), KiraError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match injected {
            Ok(_) => Err(KiraError::StoreHttp("injected transient failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn ensure_unique_index(&self, node: &NodeRef) -> Result<(), KiraError> {
        self.begin_call()?;
        self.lock().indexes.insert(node.clone());
        Ok(())
    }

    fn merge_nodes(&self, node: &NodeRef, records: &[Properties]) -> Result<usize, KiraError> {
        self.begin_call()?;
        let mut graph = self.lock();
        for record in records {
            let key = record
                .get(&node.key)
                .and_then(KeyValue::from_value)
                .ok_or_else(|| KiraError::MissingKey {
                    label: node.label.clone(),
                    key: node.key.clone(),
                })?;
            let stored = graph.nodes.entry((node.clone(), key)).or_default();
            stored.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(records.len())
    }

    fn resolve_nodes(
        &self,
        node: &NodeRef,
        keys: &[KeyValue],
    ) -> Result<HashSet<KeyValue>, KiraError> {
        self.begin_call()?;
        let graph = self.lock();
        Ok(keys
            .iter()
            .filter(|key| graph.nodes.contains_key(&(node.clone(), (*key).clone())))
            .cloned()
            .collect())
    }

    fn merge_relationships(
        &self,
        rel_type: &str,
        start: &NodeRef,
        end: &NodeRef,
        edges: &[Edge],
    ) -> Result<usize, KiraError> {
        self.begin_call()?;
        let mut graph = self.lock();
        let mut written = 0;
        for edge in edges {
            let start_id = (start.clone(), edge.start.clone());
            let end_id = (end.clone(), edge.end.clone());
            if !graph.nodes.contains_key(&start_id) || !graph.nodes.contains_key(&end_id) {
                continue;
            }
            let stored = graph
                .relationships
                .entry((rel_type.to_string(), start_id, end_id))
                .or_default();
            stored.extend(edge.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            written += 1;
        }
        Ok(written)
    }
}
