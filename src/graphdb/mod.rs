//! Target property-graph store.
//!
//! The loader needs four capabilities from a store: ensure a unique index,
//! upsert nodes by key, find which keys exist, and merge relationships between
//! existing nodes without duplicating them.

pub mod memory;
pub mod neo4j;

use std::collections::HashSet;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use crate::error::KiraError;
use crate::graph::{Edge, KeyValue, NodeRef, Properties};

pub use memory::MemoryGraphStore;
pub use neo4j::Neo4jHttpStore;

pub trait GraphStore: Send + Sync {
    /// Idempotent; an existing index is not an error.
    fn ensure_unique_index(&self, node: &NodeRef) -> Result<(), KiraError>;

    /// Creates or updates one node per record, keyed on `node.key`. Returns
    /// the number of records written.
    fn merge_nodes(&self, node: &NodeRef, records: &[Properties]) -> Result<usize, KiraError>;

    /// The subset of `keys` that exist as nodes.
    fn resolve_nodes(
        &self,
        node: &NodeRef,
        keys: &[KeyValue],
    ) -> Result<HashSet<KeyValue>, KiraError>;

    /// Merges one `rel_type` relationship per edge between existing
    /// endpoints. Returns the number of edges written.
    fn merge_relationships(
        &self,
        rel_type: &str,
        start: &NodeRef,
        end: &NodeRef,
        edges: &[Edge],
    ) -> Result<usize, KiraError>;
}

/// Bounded retry of transient store and fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff before retry number `attempt`, saturating on overflow.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn run<T, F>(&self, operation: &str, mut call: F) -> Result<T, KiraError>
    where
        F: FnMut() -> Result<T, KiraError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(operation, attempt, error = %err, "retrying store write");
                    thread::sleep(self.delay(attempt));
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(KiraError::StoreWrite {
                        operation: operation.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|err| panic!("identifier regex: {err}"))
});

pub fn validate_identifier(name: &str) -> Result<(), KiraError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(KiraError::InvalidIdentifier(name.to_string()))
    }
}

/// Back-quoted Cypher identifier.
pub fn quote_identifier(name: &str) -> Result<String, KiraError> {
    validate_identifier(name)?;
    Ok(format!("`{name}`"))
}
