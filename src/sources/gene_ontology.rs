use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::domain::{ReleaseCadence, TaxId};
use crate::error::KiraError;
use crate::fs_util;
use crate::sources::{DownloadOptions, SourceContext, Staged, VersionedSource};

pub const SOURCE_ID: &str = "gene-ontology";
pub const ONTOLOGY_FILE: &str = "go-basic.obo";

const ONTOLOGY_URL: &str = "http://purl.obolibrary.org/obo/go/go-basic.obo";
const ANNOTATION_BASE_URL: &str = "http://current.geneontology.org/annotations";

/// Gene Ontology terms plus GAF annotations for selected organisms.
pub struct GeneOntology {
    ctx: SourceContext,
    taxids: Vec<TaxId>,
}

impl GeneOntology {
    pub fn new(ctx: SourceContext, taxids: Vec<TaxId>) -> Self {
        Self { ctx, taxids }
    }

    fn scope(taxids: &[TaxId]) -> Vec<String> {
        taxids.iter().map(TaxId::to_string).collect()
    }
}

impl VersionedSource for GeneOntology {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn current_version(&self) -> String {
        ReleaseCadence::Monthly.version_for(self.ctx.today)
    }

    fn latest_local_instance(&self) -> bool {
        self.ctx
            .is_fresh(SOURCE_ID, &self.current_version(), &Self::scope(&self.taxids))
    }

    fn download(&self, options: &DownloadOptions) -> Result<(), KiraError> {
        let taxids = if options.taxids.is_empty() {
            self.taxids.clone()
        } else {
            options.taxids.clone()
        };
        let annotations = taxids
            .iter()
            .map(|taxid| annotation_file(*taxid))
            .collect::<Result<Vec<_>, KiraError>>()?;

        self.ctx.install(
            SOURCE_ID,
            &self.current_version(),
            Self::scope(&taxids),
            |staging| {
                self.ctx
                    .fetch_into(SOURCE_ID, ONTOLOGY_URL, staging, ONTOLOGY_FILE)?;
                let (upstream_version, _date) = read_go_header(&staging.join(ONTOLOGY_FILE))?;

                let mut files = vec![ONTOLOGY_FILE.to_string()];
                for file in annotations {
                    let url = format!("{ANNOTATION_BASE_URL}/{file}");
                    self.ctx.fetch_into(SOURCE_ID, &url, staging, &file)?;
                    fs_util::validate_gzip(&staging.join(&file))?;
                    files.push(file);
                }
                Ok(Staged {
                    files,
                    upstream_version,
                })
            },
        )
    }
}

/// GAF file published for an organism.
pub fn annotation_file(taxid: TaxId) -> Result<String, KiraError> {
    let organism = match taxid.get() {
        9606 => "goa_human",
        10090 => "mgi",
        10116 => "rgd",
        7955 => "zfin",
        7227 => "fb",
        6239 => "wb",
        559292 => "sgd",
        other => return Err(KiraError::UnsupportedTaxId(other)),
    };
    Ok(format!("{organism}.gaf.gz"))
}

fn read_go_header(path: &Path) -> Result<(Option<String>, Option<String>), KiraError> {
    let file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let lines = BufReader::new(file)
        .lines()
        .take(50)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(parse_go_header(&lines.join("\n")))
}

/// `data-version` and `date` from an OBO header.
pub fn parse_go_header(content: &str) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut date = None;
    for line in content.lines().take(50) {
        if let Some(value) = line.strip_prefix("data-version:") {
            version = Some(value.trim().to_string());
        }
        if let Some(value) = line.strip_prefix("date:") {
            date = Some(value.trim().to_string());
        }
    }
    (version, date)
}
