use std::collections::BTreeMap;

use tracing::info;

use crate::domain::TaxId;
use crate::error::KiraError;
use crate::graph::{Container, NodeRef, NodeSet, Properties, RelationshipSet, Value, props};
use crate::parsers::{Parser, for_each_line, parse_error};
use crate::sources::gene_ontology::{ONTOLOGY_FILE, SOURCE_ID, annotation_file};
use crate::store::Store;

const TERM_PARSER: &str = "GeneOntologyParser";

/// GO terms and the term-to-term relations declared in `go-basic.obo`.
pub struct GeneOntologyParser {
    store: Store,
}

impl GeneOntologyParser {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[derive(Default)]
struct TermStanza {
    line: usize,
    id: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
    definition: Option<String>,
    obsolete: bool,
    is_a: Vec<String>,
    relations: Vec<(String, String)>,
}

impl Parser for GeneOntologyParser {
    fn name(&self) -> &str {
        TERM_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let path = self.store.artifact(SOURCE_ID, ONTOLOGY_FILE)?;
        let mut terms = NodeSet::new("Term", "sid");
        let mut is_a = term_relationships("IS_A");
        let mut relations: BTreeMap<String, RelationshipSet> = BTreeMap::new();

        let mut current: Option<TermStanza> = None;
        let mut flush = |stanza: TermStanza| -> Result<(), KiraError> {
            let id = stanza
                .id
                .ok_or_else(|| parse_error(TERM_PARSER, stanza.line, "[Term] stanza without id"))?;
            let mut properties = props([("sid", Value::from(id.as_str()))]);
            if let Some(name) = stanza.name {
                properties.insert("name".to_string(), name.into());
            }
            if let Some(namespace) = stanza.namespace {
                properties.insert("namespace".to_string(), namespace.into());
            }
            if let Some(definition) = stanza.definition {
                properties.insert("definition".to_string(), definition.into());
            }
            properties.insert("obsolete".to_string(), stanza.obsolete.into());
            terms.add_node(properties)?;

            for parent in stanza.is_a {
                is_a.add_relationship(id.as_str(), parent, Properties::new());
            }
            for (rel_type, target) in stanza.relations {
                relations
                    .entry(rel_type.clone())
                    .or_insert_with(|| term_relationships(&rel_type))
                    .add_relationship(id.as_str(), target, Properties::new());
            }
            Ok(())
        };

        for_each_line(TERM_PARSER, &path, |line_no, line| {
            let line = line.trim();
            if line.starts_with('[') {
                if let Some(stanza) = current.take() {
                    flush(stanza)?;
                }
                if line == "[Term]" {
                    current = Some(TermStanza {
                        line: line_no,
                        ..TermStanza::default()
                    });
                }
                return Ok(());
            }
            let Some(stanza) = current.as_mut() else {
                return Ok(());
            };
            let Some((tag, value)) = line.split_once(':') else {
                return Ok(());
            };
            let value = value.trim();
            match tag {
                "id" => stanza.id = Some(value.to_string()),
                "name" => stanza.name = Some(value.to_string()),
                "namespace" => stanza.namespace = Some(value.to_string()),
                "def" => stanza.definition = Some(quoted_text(value).to_string()),
                "is_obsolete" => stanza.obsolete = value == "true",
                "is_a" => {
                    let parent = first_token(value)
                        .ok_or_else(|| parse_error(TERM_PARSER, line_no, "empty is_a"))?;
                    stanza.is_a.push(parent.to_string());
                }
                "relationship" => {
                    let mut parts = value.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some(rel_type), Some(target)) => stanza
                            .relations
                            .push((rel_type.to_uppercase(), target.to_string())),
                        _ => {
                            return Err(parse_error(
                                TERM_PARSER,
                                line_no,
                                format!("malformed relationship: {value}"),
                            ));
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })?;
        if let Some(stanza) = current.take() {
            flush(stanza)?;
        }
        drop(flush);

        info!(terms = terms.len(), is_a = is_a.len(), "parsed gene ontology");
        let mut container = Container::new();
        container.add_nodeset(terms);
        container.add_relationshipset(is_a);
        for relationshipset in relations.into_values() {
            container.add_relationshipset(relationshipset);
        }
        Ok(container)
    }
}

fn term_relationships(rel_type: &str) -> RelationshipSet {
    RelationshipSet::new(
        rel_type,
        NodeRef::new("Term", "sid"),
        NodeRef::new("Term", "sid"),
    )
}

fn first_token(value: &str) -> Option<&str> {
    value.split_whitespace().next()
}

// `"text" [refs]` -> `text`
fn quoted_text(value: &str) -> &str {
    match value.strip_prefix('"') {
        Some(rest) => match rest.rfind("\" [") {
            Some(end) => &rest[..end],
            None => rest.trim_end_matches('"'),
        },
        None => value,
    }
}

/// Protein-to-term annotations for one organism from its GAF file.
pub struct GeneOntologyAssociationParser {
    store: Store,
    taxid: TaxId,
    name: String,
}

impl GeneOntologyAssociationParser {
    pub fn new(store: Store) -> Self {
        Self::with_store_and_taxid(store, TaxId::new(9606))
    }

    pub fn with_taxid(self, taxid: TaxId) -> Self {
        Self::with_store_and_taxid(self.store, taxid)
    }

    fn with_store_and_taxid(store: Store, taxid: TaxId) -> Self {
        Self {
            store,
            taxid,
            name: format!("GeneOntologyAssociationParser[taxon:{taxid}]"),
        }
    }

    pub fn taxid(&self) -> TaxId {
        self.taxid
    }
}

// GAF 2.x columns.
const GAF_DB: usize = 0;
const GAF_OBJECT_ID: usize = 1;
const GAF_SYMBOL: usize = 2;
const GAF_QUALIFIER: usize = 3;
const GAF_GO_ID: usize = 4;
const GAF_REFERENCE: usize = 5;
const GAF_EVIDENCE: usize = 6;
const GAF_OBJECT_NAME: usize = 9;
const GAF_TAXON: usize = 12;
const GAF_ASSIGNED_BY: usize = 14;

impl Parser for GeneOntologyAssociationParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<Container, KiraError> {
        let path = self.store.artifact(SOURCE_ID, &annotation_file(self.taxid)?)?;
        let taxon = format!("taxon:{}", self.taxid);

        let mut proteins = NodeSet::new("Protein", "sid");
        let mut associations = RelationshipSet::new(
            "HAS_GO_ASSOCIATION",
            NodeRef::new("Protein", "sid"),
            NodeRef::new("Term", "sid"),
        );
        let mut in_taxon = RelationshipSet::new(
            "IN_TAXON",
            NodeRef::new("Protein", "sid"),
            NodeRef::new("Taxon", "sid"),
        );

        for_each_line(&self.name, &path, |line_no, line| {
            if line.is_empty() || line.starts_with('!') {
                return Ok(());
            }
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() <= GAF_TAXON {
                return Err(parse_error(
                    &self.name,
                    line_no,
                    format!("expected at least {} columns, found {}", GAF_TAXON + 1, cols.len()),
                ));
            }
            if cols[GAF_DB] != "UniProtKB" {
                return Ok(());
            }
            let primary_taxon = cols[GAF_TAXON].split('|').next().unwrap_or_default();
            if primary_taxon != taxon {
                return Ok(());
            }

            let accession = cols[GAF_OBJECT_ID];
            let key = accession.into();
            if !proteins.contains_key(&key) {
                proteins.add_node(props([
                    ("sid", Value::from(accession)),
                    ("symbol", Value::from(cols[GAF_SYMBOL])),
                    ("name", Value::from(cols[GAF_OBJECT_NAME])),
                    ("taxid", Value::from(self.taxid.get())),
                ]))?;
                in_taxon.add_relationship(accession, self.taxid.get(), Properties::new());
            }

            let mut properties = props([
                ("qualifier", cols[GAF_QUALIFIER]),
                ("reference", cols[GAF_REFERENCE]),
                ("evidence", cols[GAF_EVIDENCE]),
            ]);
            if let Some(assigned_by) = cols.get(GAF_ASSIGNED_BY) {
                properties.insert("assigned_by".to_string(), Value::from(*assigned_by));
            }
            associations.add_relationship(accession, cols[GAF_GO_ID], properties);
            Ok(())
        })?;

        info!(
            taxid = %self.taxid,
            proteins = proteins.len(),
            associations = associations.len(),
            "parsed GO annotations"
        );
        let mut container = Container::new();
        container.add_nodeset(proteins);
        container.add_relationshipset(associations);
        container.add_relationshipset(in_taxon);
        Ok(container)
    }
}
