use std::fs;

use crate::domain::ReleaseCadence;
use crate::error::KiraError;
use crate::fs_util;
use crate::sources::{DownloadOptions, SourceContext, Staged, VersionedSource};

pub const SOURCE_ID: &str = "ncbi-taxonomy";
pub const NAMES_FILE: &str = "names.dmp";
pub const NODES_FILE: &str = "nodes.dmp";

const DUMP_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdmp.zip";
const DUMP_ARCHIVE: &str = "taxdmp.zip";

pub struct NcbiTaxonomy {
    ctx: SourceContext,
}

impl NcbiTaxonomy {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

impl VersionedSource for NcbiTaxonomy {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn current_version(&self) -> String {
        ReleaseCadence::Monthly.version_for(self.ctx.today)
    }

    fn latest_local_instance(&self) -> bool {
        self.ctx.is_fresh(SOURCE_ID, &self.current_version(), &[])
    }

    fn download(&self, _options: &DownloadOptions) -> Result<(), KiraError> {
        self.ctx
            .install(SOURCE_ID, &self.current_version(), Vec::new(), |staging| {
                self.ctx
                    .fetch_into(SOURCE_ID, DUMP_URL, staging, DUMP_ARCHIVE)?;
                let archive = staging.join(DUMP_ARCHIVE);
                fs_util::extract_zip_entries(&archive, staging, &[NAMES_FILE, NODES_FILE])?;
                fs::remove_file(&archive).map_err(|err| KiraError::Filesystem(err.to_string()))?;
                Ok(Staged {
                    files: vec![NAMES_FILE.to_string(), NODES_FILE.to_string()],
                    upstream_version: None,
                })
            })
    }
}
