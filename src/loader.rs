//! Writes [`Container`]s into a [`GraphStore`] in three phases.
//!
//! ```text
//! GraphLoader<Pending> --create_indexes--> GraphLoader<Indexed>
//!                      --create_nodes----> GraphLoader<NodesLoaded>
//!                      --create_relationships--> LoadReport
//! ```
//!
//! The phase order is carried in the type, so relationships can only be
//! written once every node of every container has been merged.

use std::collections::{BTreeSet, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::EdgePolicy;
use crate::error::KiraError;
use crate::graph::{Container, Edge, KeyValue, NodeRef, NodeSet, RelationshipSet};
use crate::graphdb::{GraphStore, RetryPolicy, validate_identifier};

/// Unresolved edges logged individually per relationship set before the
/// remainder is summarised.
const UNRESOLVED_LOG_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub edge_policy: EdgePolicy,
    pub retry: RetryPolicy,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 1,
            edge_policy: EdgePolicy::Skip,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub indexes: usize,
    pub nodes_written: usize,
    pub duplicate_keys: usize,
    pub relationships_written: usize,
    pub relationships_skipped: usize,
    pub index_ms: u64,
    pub node_ms: u64,
    pub relationship_ms: u64,
}

pub struct Pending;
pub struct Indexed;
pub struct NodesLoaded;

pub struct GraphLoader<'a, G: GraphStore + ?Sized, State = Pending> {
    store: &'a G,
    options: LoaderOptions,
    containers: &'a [Container],
    report: LoadReport,
    state: PhantomData<State>,
}

impl<'a, G: GraphStore + ?Sized> GraphLoader<'a, G, Pending> {
    pub fn new(store: &'a G, options: LoaderOptions, containers: &'a [Container]) -> Self {
        Self {
            store,
            options,
            containers,
            report: LoadReport::default(),
            state: PhantomData,
        }
    }

    /// Runs all three phases.
    pub fn load(self) -> Result<LoadReport, KiraError> {
        self.create_indexes()?.create_nodes()?.create_relationships()
    }

    /// Ensures a unique index for every (label, key) a node set or a
    /// relationship endpoint uses.
    pub fn create_indexes(mut self) -> Result<GraphLoader<'a, G, Indexed>, KiraError> {
        let started = Instant::now();
        let mut targets = BTreeSet::new();
        for container in self.containers {
            for nodeset in container.nodesets() {
                targets.insert(nodeset.node_ref());
            }
            for relset in container.relationshipsets() {
                validate_identifier(relset.rel_type())?;
                targets.insert(relset.start().clone());
                targets.insert(relset.end().clone());
            }
        }

        for target in &targets {
            validate_identifier(&target.label)?;
            validate_identifier(&target.key)?;
            let operation = format!("index {}.{}", target.label, target.key);
            self.options
                .retry
                .run(&operation, || self.store.ensure_unique_index(target))?;
        }

        self.report.indexes = targets.len();
        self.report.index_ms = millis(started.elapsed());
        info!(indexes = targets.len(), "phase=Index; done");
        Ok(self.advance())
    }
}

impl<'a, G: GraphStore + ?Sized> GraphLoader<'a, G, Indexed> {
    /// Merges every node set. Sets sharing a (label, key) are written in
    /// container order by one worker; distinct groups run concurrently.
    pub fn create_nodes(mut self) -> Result<GraphLoader<'a, G, NodesLoaded>, KiraError> {
        let started = Instant::now();
        let groups = group_nodesets(self.containers);
        let store = self.store;
        let options = self.options;

        let results = parallel_map(options.workers, groups.len(), |index| {
            let (target, sets) = &groups[index];
            write_node_group(store, &options, target, sets)
        });

        let mut written = 0;
        for result in results {
            written += result?;
        }
        self.report.nodes_written = written;
        self.report.duplicate_keys = self
            .containers
            .iter()
            .map(Container::duplicate_count)
            .sum();
        self.report.node_ms = millis(started.elapsed());
        info!(
            nodes = written,
            duplicates = self.report.duplicate_keys,
            groups = groups.len(),
            "phase=Nodes; done"
        );
        Ok(self.advance())
    }
}

impl<G: GraphStore + ?Sized> GraphLoader<'_, G, NodesLoaded> {
    /// Merges every relationship set, sequentially and in container order.
    pub fn create_relationships(mut self) -> Result<LoadReport, KiraError> {
        let started = Instant::now();
        for container in self.containers {
            for relset in container.relationshipsets() {
                let (written, skipped) = self.write_relationship_set(relset)?;
                self.report.relationships_written += written;
                self.report.relationships_skipped += skipped;
            }
        }
        self.report.relationship_ms = millis(started.elapsed());
        info!(
            relationships = self.report.relationships_written,
            skipped = self.report.relationships_skipped,
            "phase=Relationships; done"
        );
        Ok(self.report)
    }

    fn write_relationship_set(&self, relset: &RelationshipSet) -> Result<(usize, usize), KiraError> {
        if relset.is_empty() {
            return Ok((0, 0));
        }
        let operation = format!(
            "merge {}:{}->{}",
            relset.rel_type(),
            relset.start().label,
            relset.end().label
        );
        let mut written = 0;
        let mut skipped = 0;

        for batch in relset.edges().chunks(self.options.batch_size.max(1)) {
            let starts = self.resolve(relset.start(), batch.iter().map(|edge| &edge.start))?;
            let ends = self.resolve(relset.end(), batch.iter().map(|edge| &edge.end))?;

            let mut resolved: Vec<Edge> = Vec::with_capacity(batch.len());
            for edge in batch {
                let missing = if !starts.contains(&edge.start) {
                    Some((relset.start(), &edge.start))
                } else if !ends.contains(&edge.end) {
                    Some((relset.end(), &edge.end))
                } else {
                    None
                };
                let Some((node, key)) = missing else {
                    resolved.push(edge.clone());
                    continue;
                };
                let err = KiraError::UnresolvedEndpoint {
                    rel_type: relset.rel_type().to_string(),
                    label: node.label.clone(),
                    key: key.to_string(),
                };
                if self.options.edge_policy == EdgePolicy::Fail {
                    return Err(err);
                }
                if skipped < UNRESOLVED_LOG_LIMIT {
                    warn!(error = %err, "skipping relationship");
                }
                skipped += 1;
            }

            if !resolved.is_empty() {
                written += self.options.retry.run(&operation, || {
                    self.store
                        .merge_relationships(relset.rel_type(), relset.start(), relset.end(), &resolved)
                })?;
            }
            debug!(
                rel_type = relset.rel_type(),
                batch = batch.len(),
                written,
                "relationship batch"
            );
        }

        if skipped > UNRESOLVED_LOG_LIMIT {
            warn!(
                rel_type = relset.rel_type(),
                skipped,
                "further unresolved relationships not logged individually"
            );
        }
        Ok((written, skipped))
    }

    fn resolve<'k>(
        &self,
        node: &NodeRef,
        keys: impl Iterator<Item = &'k KeyValue>,
    ) -> Result<HashSet<KeyValue>, KiraError> {
        let distinct: Vec<KeyValue> = keys
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let operation = format!("resolve {}.{}", node.label, node.key);
        self.options
            .retry
            .run(&operation, || self.store.resolve_nodes(node, &distinct))
    }
}

impl<'a, G: GraphStore + ?Sized, State> GraphLoader<'a, G, State> {
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    fn advance<Next>(self) -> GraphLoader<'a, G, Next> {
        GraphLoader {
            store: self.store,
            options: self.options,
            containers: self.containers,
            report: self.report,
            state: PhantomData,
        }
    }
}

fn group_nodesets(containers: &[Container]) -> Vec<(NodeRef, Vec<&NodeSet>)> {
    let mut groups: Vec<(NodeRef, Vec<&NodeSet>)> = Vec::new();
    for nodeset in containers.iter().flat_map(Container::nodesets) {
        let target = nodeset.node_ref();
        match groups.iter_mut().find(|(existing, _)| *existing == target) {
            Some((_, sets)) => sets.push(nodeset),
            None => groups.push((target, vec![nodeset])),
        }
    }
    groups
}

fn write_node_group<G: GraphStore + ?Sized>(
    store: &G,
    options: &LoaderOptions,
    target: &NodeRef,
    sets: &[&NodeSet],
) -> Result<usize, KiraError> {
    let operation = format!("merge {}", target.label);
    let mut written = 0;
    for nodeset in sets {
        for batch in nodeset.records().chunks(options.batch_size.max(1)) {
            written += options
                .retry
                .run(&operation, || store.merge_nodes(target, batch))?;
            debug!(label = %target.label, batch = batch.len(), "node batch");
        }
    }
    Ok(written)
}

/// Applies `job` to `0..len` on up to `workers` scoped threads, returning
/// results in index order.
pub(crate) fn parallel_map<T, F>(workers: usize, len: usize, job: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if workers <= 1 || len <= 1 {
        return (0..len).map(job).collect();
    }

    let next = AtomicUsize::new(0);
    let mut indexed: Vec<(usize, T)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers.min(len))
            .map(|_| {
                let next = &next;
                let job = &job;
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        if index >= len {
                            break;
                        }
                        done.push((index, job(index)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, value)| value).collect()
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
