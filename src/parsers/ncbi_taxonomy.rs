use std::collections::HashMap;

use tracing::info;

use crate::error::KiraError;
use crate::graph::{Container, NodeRef, NodeSet, Properties, RelationshipSet, Value, props};
use crate::parsers::{Parser, for_each_line, parse_error};
use crate::sources::ncbi_taxonomy::{NAMES_FILE, NODES_FILE, SOURCE_ID};
use crate::store::Store;

const TAXONOMY_PARSER: &str = "NcbiTaxonomyParser";
const ROOT_TAXID: i64 = 1;

/// Taxa with their scientific names and the child-to-parent hierarchy.
pub struct NcbiTaxonomyParser {
    store: Store,
}

impl NcbiTaxonomyParser {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl Parser for NcbiTaxonomyParser {
    fn name(&self) -> &str {
        TAXONOMY_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let names_path = self.store.artifact(SOURCE_ID, NAMES_FILE)?;
        let nodes_path = self.store.artifact(SOURCE_ID, NODES_FILE)?;

        let mut names: HashMap<i64, String> = HashMap::new();
        for_each_line(TAXONOMY_PARSER, &names_path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let fields = dmp_fields(line);
            if fields.len() < 4 {
                return Err(parse_error(TAXONOMY_PARSER, line_no, "expected 4 fields"));
            }
            if fields[3] == "scientific name" {
                names.insert(parse_taxid(fields[0], line_no)?, fields[1].to_string());
            }
            Ok(())
        })?;

        let mut taxa = NodeSet::new("Taxon", "sid");
        let mut parents = RelationshipSet::new(
            "IS_A",
            NodeRef::new("Taxon", "sid"),
            NodeRef::new("Taxon", "sid"),
        );
        for_each_line(TAXONOMY_PARSER, &nodes_path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let fields = dmp_fields(line);
            if fields.len() < 3 {
                return Err(parse_error(TAXONOMY_PARSER, line_no, "expected at least 3 fields"));
            }
            let taxid = parse_taxid(fields[0], line_no)?;
            let parent = parse_taxid(fields[1], line_no)?;
            let mut properties = props([("sid", Value::Int(taxid)), ("rank", Value::from(fields[2]))]);
            if let Some(name) = names.get(&taxid) {
                properties.insert("scientific_name".to_string(), Value::from(name.as_str()));
            }
            taxa.add_node(properties)?;
            if taxid != ROOT_TAXID {
                parents.add_relationship(taxid, parent, Properties::new());
            }
            Ok(())
        })?;

        info!(taxa = taxa.len(), "parsed NCBI taxonomy");
        let mut container = Container::new();
        container.add_nodeset(taxa);
        container.add_relationshipset(parents);
        Ok(container)
    }
}

// `a\t|\tb\t|\tc\t|` -> [a, b, c]
fn dmp_fields(line: &str) -> Vec<&str> {
    line.trim_end_matches("\t|")
        .split("\t|\t")
        .map(str::trim)
        .collect()
}

fn parse_taxid(raw: &str, line_no: usize) -> Result<i64, KiraError> {
    raw.parse::<i64>()
        .map_err(|_| parse_error(TAXONOMY_PARSER, line_no, format!("bad taxid {raw:?}")))
}
