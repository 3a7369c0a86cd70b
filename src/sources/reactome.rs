use crate::domain::ReleaseCadence;
use crate::error::KiraError;
use crate::sources::{DownloadOptions, SourceContext, Staged, VersionedSource};

pub const SOURCE_ID: &str = "reactome";
pub const PATHWAYS_FILE: &str = "ReactomePathways.txt";
pub const HIERARCHY_FILE: &str = "ReactomePathwaysRelation.txt";
pub const UNIPROT_MAPPING_FILE: &str = "UniProt2Reactome.txt";

const BASE_URL: &str = "https://reactome.org/download/current";

pub struct Reactome {
    ctx: SourceContext,
}

impl Reactome {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

impl VersionedSource for Reactome {
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
                let mut files = Vec::new();
                for file in [PATHWAYS_FILE, HIERARCHY_FILE, UNIPROT_MAPPING_FILE] {
                    let url = format!("{BASE_URL}/{file}");
                    self.ctx.fetch_into(SOURCE_ID, &url, staging, file)?;
                    files.push(file.to_string());
                }
                Ok(Staged {
                    files,
                    upstream_version: None,
                })
            })
    }
}
