//! Transforms from cached source artifacts to [`Container`]s.
//!
//! Parsers only read what a [`VersionedSource`](crate::sources::VersionedSource)
//! already installed; a missing artifact is reported as
//! [`KiraError::MissingSource`] instead of triggering a download.

pub mod gene_ontology;
pub mod gtex;
pub mod ncbi_taxonomy;
pub mod reactome;

use std::io::BufRead;

use camino::Utf8Path;

use crate::domain::{TaxId, species_name};
use crate::error::KiraError;
use crate::fs_util;
use crate::graph::{Container, Value};
use crate::store::Store;

pub use gene_ontology::{GeneOntologyAssociationParser, GeneOntologyParser};
pub use gtex::{GtexDataParser, GtexMetadataParser};
pub use ncbi_taxonomy::NcbiTaxonomyParser;
pub use reactome::{ReactomeMappingParser, ReactomePathwayParser};

pub trait Parser: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> Result<Container, KiraError>;
}

/// The bundled parsers in their fixed run order.
pub fn default_parsers(store: &Store, taxids: &[TaxId]) -> Vec<Box<dyn Parser>> {
    let mut parsers: Vec<Box<dyn Parser>> = vec![Box::new(GeneOntologyParser::new(store.clone()))];
    for taxid in taxids {
        parsers.push(Box::new(
            GeneOntologyAssociationParser::new(store.clone()).with_taxid(*taxid),
        ));
    }
    parsers.push(Box::new(GtexMetadataParser::new(store.clone())));
    parsers.push(Box::new(GtexDataParser::new(store.clone())));
    parsers.push(Box::new(ReactomePathwayParser::new(store.clone())));
    let species = taxids
        .iter()
        .filter_map(|taxid| species_name(*taxid))
        .map(str::to_string)
        .collect();
    parsers.push(Box::new(
        ReactomeMappingParser::new(store.clone()).with_species(species),
    ));
    parsers.push(Box::new(NcbiTaxonomyParser::new(store.clone())));
    parsers
}

pub(crate) fn parse_error(parser: &str, line: usize, message: impl Into<String>) -> KiraError {
    KiraError::Parse {
        parser: parser.to_string(),
        line,
        message: message.into(),
    }
}

/// Calls `handle` with each 1-based line number and line of a text artifact.
pub(crate) fn for_each_line<F>(parser: &str, path: &Utf8Path, mut handle: F) -> Result<(), KiraError>
where
    F: FnMut(usize, &str) -> Result<(), KiraError>,
{
    let reader = fs_util::open_text(path.as_std_path())?;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| parse_error(parser, index + 1, err.to_string()))?;
        handle(index + 1, line.trim_end_matches('\r'))?;
    }
    Ok(())
}

/// Integer, then float, then string.
pub(crate) fn infer_value(raw: &str) -> Value {
    if let Ok(value) = raw.parse::<i64>() {
        return Value::Int(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        if value.is_finite() {
            return Value::Float(value);
        }
    }
    Value::Str(raw.to_string())
}
