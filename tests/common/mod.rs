#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use kira_biodata_graph::error::KiraError;
use kira_biodata_graph::fetch::Fetcher;
use kira_biodata_graph::sources::VersionedSource;
use kira_biodata_graph::store::{Store, VersionMarker};

pub const GO_OBO: &str = "format-version: 1.2
data-version: releases/2026-10-01

[Term]
id: GO:0008150
name: biological_process
namespace: biological_process
def: \"A biological process.\" [GOC:pdt]

[Term]
id: GO:0006915
name: apoptotic process
namespace: biological_process
is_a: GO:0008150 ! biological_process
relationship: part_of GO:0008150 ! biological_process

[Typedef]
id: part_of
name: part of
";

pub const GAF_HUMAN: &str = "!gaf-version: 2.2
UniProtKB\tP04637\tTP53\tinvolved_in\tGO:0006915\tPMID:1\tIDA\t\tP\tCellular tumor antigen p53\t\tprotein\ttaxon:9606\t20200101\tUniProt\t\t
UniProtKB\tP38398\tBRCA1\tinvolved_in\tGO:0008150\tPMID:2\tIEA\t\tP\tBreast cancer type 1\t\tprotein\ttaxon:9606\t20200101\tUniProt\t\t
UniProtKB\tP04637\tTP53\tinvolved_in\tGO:0008150\tPMID:3\tTAS\t\tP\tCellular tumor antigen p53\t\tprotein\ttaxon:9606\t20200101\tUniProt\t\t
ComplexPortal\tCPX-1\tcomplex\tpart_of\tGO:0008150\tPMID:4\tIPI\t\tC\tSome complex\t\tprotein_complex\ttaxon:9606\t20200101\tComplexPortal\t\t
UniProtKB\tP02340\tTrp53\tinvolved_in\tGO:0006915\tPMID:5\tIDA\t\tP\tp53 mouse\t\tprotein\ttaxon:10090\t20200101\tMGI\t\t
";

pub const REACTOME_PATHWAYS: &str = "R-HSA-109581\tApoptosis\tHomo sapiens
R-HSA-5357801\tProgrammed Cell Death\tHomo sapiens
";

pub const REACTOME_HIERARCHY: &str = "R-HSA-5357801\tR-HSA-109581\n";

pub const REACTOME_MAPPING: &str = "P04637\tR-HSA-109581\thttps://reactome.org/PathwayBrowser/#/R-HSA-109581\tApoptosis\tTAS\tHomo sapiens
P38398\tR-HSA-5357801\thttps://reactome.org/PathwayBrowser/#/R-HSA-5357801\tProgrammed Cell Death\tIEA\tHomo sapiens
O00000\tR-HSA-109581\thttps://reactome.org/PathwayBrowser/#/R-HSA-109581\tApoptosis\tIEA\tHomo sapiens
P02340\tR-MMU-109581\thttps://reactome.org/PathwayBrowser/#/R-MMU-109581\tApoptosis\tIEA\tMus musculus
";

pub const GTEX_SAMPLES: &str = "SAMPID\tSMATSSCR\tSMTS\tSMTSD
GTEX-1117F-0003-SM-58Q7G\t\tBlood\tWhole Blood
GTEX-1117F-0226-SM-5GZZ7\t0\tAdipose Tissue\tAdipose - Subcutaneous
";

pub const GTEX_MEDIAN_TPM: &str = "#1.2
2\t2
Name\tDescription\tAdipose - Subcutaneous\tWhole Blood
ENSG00000141510.16\tTP53\t12.5\t0
ENSG00000012048.20\tBRCA1\t3.1\t1.2
";

pub const TAXONOMY_NAMES: &str = "1\t|\troot\t|\t\t|\tscientific name\t|
9605\t|\tHomo\t|\t\t|\tscientific name\t|
9606\t|\tHomo sapiens\t|\t\t|\tscientific name\t|
9606\t|\thuman\t|\t\t|\tgenbank common name\t|
";

pub const TAXONOMY_NODES: &str = "1\t|\t1\t|\tno rank\t|
9605\t|\t1\t|\tgenus\t|
9606\t|\t9605\t|\tspecies\t|
";

/// Nodes the fixtures above produce across all bundled parsers.
pub const FIXTURE_NODES: usize = 15;
/// Relationships they produce once unresolved edges are skipped.
pub const FIXTURE_RELATIONSHIPS: usize = 17;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
}

pub fn temp_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, Store::new(root))
}

pub fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn taxonomy_archive() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in [
        ("names.dmp", TAXONOMY_NAMES),
        ("nodes.dmp", TAXONOMY_NODES),
        ("division.dmp", "0\t|\tBCT\t|\tBacteria\t|\t\t|\n"),
    ] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Upstream files by the last segment of their URL.
pub fn upstream_files() -> HashMap<String, Vec<u8>> {
    HashMap::from([
        ("go-basic.obo".to_string(), GO_OBO.as_bytes().to_vec()),
        ("goa_human.gaf.gz".to_string(), gzip(GAF_HUMAN)),
        ("ReactomePathways.txt".to_string(), REACTOME_PATHWAYS.as_bytes().to_vec()),
        ("ReactomePathwaysRelation.txt".to_string(), REACTOME_HIERARCHY.as_bytes().to_vec()),
        ("UniProt2Reactome.txt".to_string(), REACTOME_MAPPING.as_bytes().to_vec()),
        (
            "GTEx_Analysis_v8_Annotations_SampleAttributesDS.txt".to_string(),
            GTEX_SAMPLES.as_bytes().to_vec(),
        ),
        (
            "GTEx_Analysis_2017-06-05_v8_RNASeQCv1.1.9_gene_median_tpm.gct.gz".to_string(),
            gzip(GTEX_MEDIAN_TPM),
        ),
        ("taxdmp.zip".to_string(), taxonomy_archive()),
    ])
}

/// Cached artifacts per source id, as the sources leave them on disk.
pub fn cached_files(source_id: &str) -> Vec<(&'static str, Vec<u8>)> {
    match source_id {
        "gene-ontology" => vec![
            ("go-basic.obo", GO_OBO.as_bytes().to_vec()),
            ("goa_human.gaf.gz", gzip(GAF_HUMAN)),
        ],
        "reactome" => vec![
            ("ReactomePathways.txt", REACTOME_PATHWAYS.as_bytes().to_vec()),
            ("ReactomePathwaysRelation.txt", REACTOME_HIERARCHY.as_bytes().to_vec()),
            ("UniProt2Reactome.txt", REACTOME_MAPPING.as_bytes().to_vec()),
        ],
        "gtex" => vec![
            (
                "GTEx_Analysis_v8_Annotations_SampleAttributesDS.txt",
                GTEX_SAMPLES.as_bytes().to_vec(),
            ),
            (
                "GTEx_Analysis_2017-06-05_v8_RNASeQCv1.1.9_gene_median_tpm.gct.gz",
                gzip(GTEX_MEDIAN_TPM),
            ),
        ],
        "ncbi-taxonomy" => vec![
            ("names.dmp", TAXONOMY_NAMES.as_bytes().to_vec()),
            ("nodes.dmp", TAXONOMY_NODES.as_bytes().to_vec()),
        ],
        other => panic!("no fixture for {other}"),
    }
}

/// Installs `files` as the current instance of `source_id`.
pub fn install(
    store: &Store,
    source_id: &str,
    version: &str,
    scope: &[&str],
    files: Vec<(&str, Vec<u8>)>,
) {
    let staging = store.stage(source_id).unwrap();
    let mut names = Vec::new();
    for (name, content) in files {
        fs::write(staging.path().join(name), content).unwrap();
        names.push(name.to_string());
    }
    let scope = scope.iter().map(|item| item.to_string()).collect();
    let marker = VersionMarker::new(source_id, version, names, scope);
    store.commit(staging, &marker).unwrap();
}

/// Installs the fixture instance every source in `sources` expects.
pub fn install_fresh(store: &Store, sources: &[Box<dyn VersionedSource>]) {
    for source in sources {
        let scope: &[&str] = if source.id() == "gene-ontology" {
            &["9606"]
        } else {
            &[]
        };
        install(
            store,
            source.id(),
            &source.current_version(),
            scope,
            cached_files(source.id()),
        );
    }
}

/// Serves [`upstream_files`] and records every requested URL.
#[derive(Default)]
pub struct FixtureFetcher {
    files: HashMap<String, Vec<u8>>,
    pub requests: Mutex<Vec<String>>,
    pub fail_for: Option<String>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self {
            files: upstream_files(),
            ..Self::default()
        }
    }

    pub fn failing_for(source_id: &str) -> Self {
        Self {
            fail_for: Some(source_id.to_string()),
            ..Self::new()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Fetcher for FixtureFetcher {
    fn fetch(&self, source_id: &str, url: &str, destination: &Path) -> Result<(), KiraError> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.fail_for.as_deref() == Some(source_id) {
            return Err(KiraError::FetchStatus {
                source_id: source_id.to_string(),
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let name = url.rsplit('/').next().unwrap_or(url);
        let content = self.files.get(name).ok_or_else(|| KiraError::FetchStatus {
            source_id: source_id.to_string(),
            status: 404,
            message: format!("no fixture for {name}"),
        })?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(destination, content).unwrap();
        Ok(())
    }
}
