use tracing::info;

use crate::error::KiraError;
use crate::graph::{Container, NodeRef, NodeSet, Properties, RelationshipSet, Value, props};
use crate::parsers::{Parser, for_each_line, infer_value, parse_error};
use crate::sources::gtex::{MEDIAN_TPM_FILE, SAMPLE_ATTRIBUTES_FILE, SOURCE_ID};
use crate::store::Store;

const METADATA_PARSER: &str = "GtexMetadataParser";
const DATA_PARSER: &str = "GtexDataParser";

const SAMPLE_ID_COLUMN: &str = "SAMPID";
const TISSUE_COLUMN: &str = "SMTS";
const DETAILED_TISSUE_COLUMN: &str = "SMTSD";

/// Samples and the detailed tissues they were taken from.
pub struct GtexMetadataParser {
    store: Store,
}

impl GtexMetadataParser {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl Parser for GtexMetadataParser {
    fn name(&self) -> &str {
        METADATA_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let path = self.store.artifact(SOURCE_ID, SAMPLE_ATTRIBUTES_FILE)?;

        let mut samples = NodeSet::new("GtexSample", "sid");
        let mut tissues = NodeSet::new("GtexDetailedTissue", "name");
        let mut sampled_from = RelationshipSet::new(
            "SAMPLED_FROM",
            NodeRef::new("GtexSample", "sid"),
            NodeRef::new("GtexDetailedTissue", "name"),
        );

        let mut header: Vec<String> = Vec::new();
        let mut columns = (0usize, 0usize, 0usize);
        for_each_line(METADATA_PARSER, &path, |line_no, line| {
            if line.is_empty() {
                return Ok(());
            }
            let cols: Vec<&str> = line.split('\t').collect();
            if header.is_empty() {
                let position = |name: &str| {
                    cols.iter().position(|col| *col == name).ok_or_else(|| {
                        parse_error(METADATA_PARSER, line_no, format!("missing column {name}"))
                    })
                };
                columns = (
                    position(SAMPLE_ID_COLUMN)?,
                    position(TISSUE_COLUMN)?,
                    position(DETAILED_TISSUE_COLUMN)?,
                );
                header = cols.iter().map(|col| col.to_lowercase()).collect();
                return Ok(());
            }
            if cols.len() > header.len() {
                return Err(parse_error(
                    METADATA_PARSER,
                    line_no,
                    format!("expected {} columns, found {}", header.len(), cols.len()),
                ));
            }

            let (sample_col, tissue_col, detailed_col) = columns;
            let sample_id = match cols.get(sample_col).copied() {
                Some(id) if !id.is_empty() => id,
                _ => {
                    return Err(parse_error(
                        METADATA_PARSER,
                        line_no,
                        format!("missing {SAMPLE_ID_COLUMN}"),
                    ));
                }
            };
            let mut properties = Properties::new();
            for (name, raw) in header.iter().zip(&cols) {
                if raw.is_empty() {
                    continue;
                }
                properties.insert(name.clone(), infer_value(raw));
            }
            properties.insert("sid".to_string(), Value::from(sample_id));
            samples.add_node(properties)?;

            let detailed = cols.get(detailed_col).copied().unwrap_or_default();
            if detailed.is_empty() {
                return Ok(());
            }
            let detailed_key = detailed.into();
            if !tissues.contains_key(&detailed_key) {
                let tissue = cols.get(tissue_col).copied().unwrap_or_default();
                tissues.add_node(props([("name", detailed), ("tissue", tissue)]))?;
            }
            sampled_from.add_relationship(sample_id, detailed, Properties::new());
            Ok(())
        })?;

        info!(
            samples = samples.len(),
            tissues = tissues.len(),
            "parsed GTEx sample attributes"
        );
        let mut container = Container::new();
        container.add_nodeset(samples);
        container.add_nodeset(tissues);
        container.add_relationshipset(sampled_from);
        Ok(container)
    }
}

/// Genes and their median expression (TPM) per detailed tissue.
pub struct GtexDataParser {
    store: Store,
}

impl GtexDataParser {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl Parser for GtexDataParser {
    fn name(&self) -> &str {
        DATA_PARSER
    }

    fn run(&self) -> Result<Container, KiraError> {
        let path = self.store.artifact(SOURCE_ID, MEDIAN_TPM_FILE)?;

        let mut genes = NodeSet::new("Gene", "sid");
        let mut expresses = RelationshipSet::new(
            "EXPRESSES",
            NodeRef::new("GtexDetailedTissue", "name"),
            NodeRef::new("Gene", "sid"),
        );

        // GCT: version line, dimensions line, header, rows.
        let mut tissues: Vec<String> = Vec::new();
        for_each_line(DATA_PARSER, &path, |line_no, line| {
            if line_no <= 2 || line.is_empty() {
                return Ok(());
            }
            let cols: Vec<&str> = line.split('\t').collect();
            if line_no == 3 {
                if cols.len() < 3 || cols[0] != "Name" {
                    return Err(parse_error(DATA_PARSER, line_no, "expected GCT header"));
                }
                tissues = cols[2..].iter().map(|col| col.to_string()).collect();
                return Ok(());
            }
            if cols.len() != tissues.len() + 2 {
                return Err(parse_error(
                    DATA_PARSER,
                    line_no,
                    format!("expected {} columns, found {}", tissues.len() + 2, cols.len()),
                ));
            }
            if cols[0].ends_with("_PAR_Y") {
                return Ok(());
            }
            let gene_id = cols[0].split('.').next().unwrap_or(cols[0]);
            genes.add_node(props([("sid", gene_id), ("name", cols[1])]))?;

            for (tissue, raw) in tissues.iter().zip(&cols[2..]) {
                let tpm = raw.parse::<f64>().map_err(|err| {
                    parse_error(DATA_PARSER, line_no, format!("bad TPM {raw:?}: {err}"))
                })?;
                if tpm > 0.0 {
                    expresses.add_relationship(
                        tissue.as_str(),
                        gene_id,
                        props([("val", Value::Float(tpm))]),
                    );
                }
            }
            Ok(())
        })?;

        info!(
            genes = genes.len(),
            expression = expresses.len(),
            "parsed GTEx median TPM"
        );
        let mut container = Container::new();
        container.add_nodeset(genes);
        container.add_relationshipset(expresses);
        Ok(container)
    }
}
