use tracing::info;

use crate::error::KiraError;
use crate::graph::{Container, NodeRef, NodeSet, Properties, RelationshipSet, Value, props};
use crate::parsers::{Parser, for_each_line, parse_error};
use crate::sources::reactome::{HIERARCHY_FILE, PATHWAYS_FILE, SOURCE_ID, UNIPROT_MAPPING_FILE};
use crate::store::Store;

const PATHWAY_PARSER: &str = "ReactomePathwayParser";
const MAPPING_PARSER: &str = "ReactomeMappingParser";

/// Pathways and the pathway hierarchy.
pub struct ReactomePathwayParser {
    store: Store,
}

impl ReactomePathwayParser {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl Parser for ReactomePathwayParser {
    fn name(&self) -> &str {
        PATHWAY_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let pathways_path = self.store.artifact(SOURCE_ID, PATHWAYS_FILE)?;
        let hierarchy_path = self.store.artifact(SOURCE_ID, HIERARCHY_FILE)?;

        let mut pathways = NodeSet::new("Pathway", "sid");
        for_each_line(PATHWAY_PARSER, &pathways_path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let cols: Vec<&str> = line.split('\t').collect();
            let [sid, name, species] = cols[..] else {
                return Err(parse_error(
                    PATHWAY_PARSER,
                    line_no,
                    format!("expected 3 columns, found {}", cols.len()),
                ));
            };
            pathways.add_node(props([
                ("sid", sid),
                ("name", name),
                ("species", species),
                ("source", "Reactome"),
            ]))
        })?;

        let mut children = RelationshipSet::new(
            "HAS_CHILD",
            NodeRef::new("Pathway", "sid"),
            NodeRef::new("Pathway", "sid"),
        );
        for_each_line(PATHWAY_PARSER, &hierarchy_path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let Some((parent, child)) = line.split_once('\t') else {
                return Err(parse_error(PATHWAY_PARSER, line_no, "expected parent<TAB>child"));
            };
            children.add_relationship(parent, child.trim(), Properties::new());
            Ok(())
        })?;

        info!(
            pathways = pathways.len(),
            hierarchy = children.len(),
            "parsed reactome pathways"
        );
        let mut container = Container::new();
        container.add_nodeset(pathways);
        container.add_relationshipset(children);
        Ok(container)
    }
}

/// Protein membership in pathways. Emits relationships only; both endpoints
/// are produced by other parsers.
pub struct ReactomeMappingParser {
    store: Store,
    species: Vec<String>,
}

impl ReactomeMappingParser {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            species: Vec::new(),
        }
    }

    /// Keeps only mappings for these species. Empty keeps everything.
    pub fn with_species(mut self, species: Vec<String>) -> Self {
        self.species = species;
        self
    }
}

impl Parser for ReactomeMappingParser {
    fn name(&self) -> &str {
        MAPPING_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let path = self.store.artifact(SOURCE_ID, UNIPROT_MAPPING_FILE)?;
        let mut members = RelationshipSet::new(
            "MEMBER_OF",
            NodeRef::new("Protein", "sid"),
            NodeRef::new("Pathway", "sid"),
        );

        for_each_line(MAPPING_PARSER, &path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let cols: Vec<&str> = line.split('\t').collect();
            let [accession, pathway, _url, _name, evidence, species] = cols[..] else {
                return Err(parse_error(
                    MAPPING_PARSER,
                    line_no,
                    format!("expected 6 columns, found {}", cols.len()),
                ));
            };
            if !self.species.is_empty() && !self.species.iter().any(|s| s == species) {
                return Ok(());
            }
            members.add_relationship(
                accession,
                pathway,
                props([("evidence", Value::from(evidence))]),
            );
            Ok(())
        })?;

        info!(memberships = members.len(), "parsed reactome mappings");
        let mut container = Container::new();
        container.add_relationshipset(members);
        Ok(container)
    }
}
