use std::time::Duration;

use assert_matches::assert_matches;

use kira_biodata_graph::domain::EdgePolicy;
use kira_biodata_graph::error::KiraError;
use kira_biodata_graph::graph::{Container, NodeRef, NodeSet, Properties, RelationshipSet, Value, props};
use kira_biodata_graph::graphdb::{MemoryGraphStore, RetryPolicy};
use kira_biodata_graph::loader::{GraphLoader, LoaderOptions};

fn options() -> LoaderOptions {
    LoaderOptions {
        batch_size: 2,
        workers: 1,
        edge_policy: EdgePolicy::Skip,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
    }
}

fn genes(records: &[(&str, &str)]) -> NodeSet {
    let mut set = NodeSet::new("Gene", "id");
    for (id, name) in records {
        set.add_node(props([("id", *id), ("name", *name)])).unwrap();
    }
    set
}

fn pathways(ids: &[&str]) -> NodeSet {
    let mut set = NodeSet::new("Pathway", "id");
    for id in ids {
        set.add_node(props([("id", *id)])).unwrap();
    }
    set
}

fn associations(edges: &[(&str, &str)]) -> RelationshipSet {
    let mut set = RelationshipSet::new(
        "ASSOCIATED_WITH",
        NodeRef::new("Gene", "id"),
        NodeRef::new("Pathway", "id"),
    );
    for (gene, pathway) in edges {
        set.add_relationship(*gene, *pathway, Properties::new());
    }
    set
}

#[test]
fn later_parser_updates_shared_node() {
    let mut first = Container::new();
    first.add_nodeset(genes(&[("G1", "TP53")]));
    let mut second = Container::new();
    second.add_nodeset(genes(&[("G1", "TP53-updated")]));

    let store = MemoryGraphStore::new();
    let containers = [first, second];
    let report = GraphLoader::new(&store, options(), &containers).load().unwrap();

    assert_eq!(report.nodes_written, 2);
    assert_eq!(store.nodes_with_label("Gene"), 1);
    let gene = store.node("Gene", "id", "G1").unwrap();
    assert_eq!(gene.get("name"), Some(&Value::from("TP53-updated")));
}

#[test]
fn unresolved_endpoint_is_skipped_under_default_policy() {
    let mut container = Container::new();
    container.add_nodeset(genes(&[("G1", "TP53")]));
    container.add_relationshipset(associations(&[("G1", "PWY1")]));

    let store = MemoryGraphStore::new();
    let containers = [container];
    let report = GraphLoader::new(&store, options(), &containers).load().unwrap();

    assert_eq!(report.relationships_written, 0);
    assert_eq!(report.relationships_skipped, 1);
    assert_eq!(store.relationship_count(), 0);
    assert_eq!(store.node_count(), 1);
}

#[test]
fn unresolved_endpoint_fails_under_fail_policy() {
    let mut container = Container::new();
    container.add_nodeset(genes(&[("G1", "TP53")]));
    container.add_relationshipset(associations(&[("G1", "PWY1")]));

    let store = MemoryGraphStore::new();
    let containers = [container];
    let mut options = options();
    options.edge_policy = EdgePolicy::Fail;
    let err = GraphLoader::new(&store, options, &containers)
        .load()
        .unwrap_err();

    assert_matches!(
        err,
        KiraError::UnresolvedEndpoint { ref rel_type, ref label, ref key }
            if rel_type == "ASSOCIATED_WITH" && label == "Pathway" && key == "PWY1"
    );
}

#[test]
fn cross_container_edges_resolve_after_all_nodes() {
    // Edges come first in container order; their endpoints arrive later.
    let mut edges = Container::new();
    edges.add_relationshipset(associations(&[("G1", "PWY1"), ("G2", "PWY1"), ("G3", "PWY2")]));
    let mut gene_nodes = Container::new();
    gene_nodes.add_nodeset(genes(&[("G1", "TP53"), ("G2", "BRCA1"), ("G3", "EGFR")]));
    let mut pathway_nodes = Container::new();
    pathway_nodes.add_nodeset(pathways(&["PWY1", "PWY2"]));

    let store = MemoryGraphStore::new();
    let containers = [edges, gene_nodes, pathway_nodes];
    let report = GraphLoader::new(&store, options(), &containers).load().unwrap();

    assert_eq!(report.indexes, 2);
    assert_eq!(report.relationships_written, 3);
    assert_eq!(report.relationships_skipped, 0);
    assert_eq!(store.relationships_of_type("ASSOCIATED_WITH"), 3);
    assert!(store.is_referentially_complete());
}

#[test]
fn repeated_load_is_idempotent() {
    let build = || {
        let mut container = Container::new();
        container.add_nodeset(genes(&[("G1", "TP53"), ("G2", "BRCA1"), ("G3", "EGFR")]));
        container.add_nodeset(pathways(&["PWY1"]));
        container.add_relationshipset(associations(&[("G1", "PWY1"), ("G2", "PWY1"), ("G1", "PWY1")]));
        [container]
    };

    let store = MemoryGraphStore::new();
    let first = build();
    GraphLoader::new(&store, options(), &first).load().unwrap();
    let nodes = store.node_count();
    let relationships = store.relationship_count();
    assert_eq!(relationships, 2);

    let second = build();
    GraphLoader::new(&store, options(), &second).load().unwrap();
    assert_eq!(store.node_count(), nodes);
    assert_eq!(store.relationship_count(), relationships);
}

#[test]
fn duplicate_keys_collapse_within_a_node_set() {
    let mut set = NodeSet::new("Gene", "id");
    set.add_node(props([("id", "G1"), ("name", "old")])).unwrap();
    set.add_node(props([("id", "G1"), ("name", "new")])).unwrap();
    let mut container = Container::new();
    container.add_nodeset(set);

    let store = MemoryGraphStore::new();
    let containers = [container];
    let report = GraphLoader::new(&store, options(), &containers).load().unwrap();

    assert_eq!(report.duplicate_keys, 1);
    assert_eq!(report.nodes_written, 1);
    let gene = store.node("Gene", "id", "G1").unwrap();
    assert_eq!(gene.get("name"), Some(&Value::from("new")));
}

#[test]
fn transient_failures_within_budget_are_invisible() {
    let mut container = Container::new();
    container.add_nodeset(genes(&[("G1", "TP53")]));

    let store = MemoryGraphStore::new();
    store.inject_transient_failures(2);
    let containers = [container];
    let report = GraphLoader::new(&store, options(), &containers).load().unwrap();

    assert_eq!(report.nodes_written, 1);
    assert_eq!(store.node_count(), 1);
}

#[test]
fn transient_failures_beyond_budget_abort() {
    let mut container = Container::new();
    container.add_nodeset(genes(&[("G1", "TP53")]));

    let store = MemoryGraphStore::new();
    store.inject_transient_failures(10);
    let containers = [container];
    let err = GraphLoader::new(&store, options(), &containers)
        .load()
        .unwrap_err();

    assert_matches!(err, KiraError::StoreWrite { attempts: 3, .. });
    assert_eq!(store.node_count(), 0);
}

#[test]
fn parallel_node_writes_match_sequential() {
    let build = || {
        let mut first = Container::new();
        first.add_nodeset(genes(&[("G1", "TP53"), ("G2", "BRCA1")]));
        first.add_nodeset(pathways(&["PWY1", "PWY2", "PWY3"]));
        let mut second = Container::new();
        second.add_nodeset(genes(&[("G1", "TP53-updated")]));
        second.add_relationshipset(associations(&[("G1", "PWY1"), ("G2", "PWY3")]));
        [first, second]
    };

    let sequential = MemoryGraphStore::new();
    let containers = build();
    GraphLoader::new(&sequential, options(), &containers).load().unwrap();

    let parallel = MemoryGraphStore::new();
    let mut parallel_options = options();
    parallel_options.workers = 4;
    let containers = build();
    GraphLoader::new(&parallel, parallel_options, &containers)
        .load()
        .unwrap();

    assert_eq!(parallel.node_count(), sequential.node_count());
    assert_eq!(parallel.relationship_count(), sequential.relationship_count());
    assert_eq!(
        parallel.node("Gene", "id", "G1"),
        sequential.node("Gene", "id", "G1")
    );
}

#[test]
fn phases_are_exposed_as_separate_steps() {
    let mut container = Container::new();
    container.add_nodeset(genes(&[("G1", "TP53")]));
    container.add_nodeset(pathways(&["PWY1"]));
    container.add_relationshipset(associations(&[("G1", "PWY1")]));

    let store = MemoryGraphStore::new();
    let containers = [container];
    let indexed = GraphLoader::new(&store, options(), &containers)
        .create_indexes()
        .unwrap();
    assert_eq!(store.index_count(), 2);
    assert_eq!(store.node_count(), 0);
    assert_eq!(indexed.report().indexes, 2);

    let nodes = indexed.create_nodes().unwrap();
    assert_eq!(store.node_count(), 2);
    assert_eq!(nodes.report().nodes_written, 2);
    assert_eq!(store.relationship_count(), 0);

    let report = nodes.create_relationships().unwrap();
    assert_eq!(report.relationships_written, 1);
}

#[test]
fn invalid_label_is_rejected_before_any_write() {
    let mut container = Container::new();
    container.add_nodeset(NodeSet::new("Gene) DETACH DELETE (n", "id"));

    let store = MemoryGraphStore::new();
    let containers = [container];
    let err = GraphLoader::new(&store, options(), &containers)
        .load()
        .unwrap_err();

    assert_matches!(err, KiraError::InvalidIdentifier(_));
    assert_eq!(store.write_calls(), 0);
}
