use crate::domain::ReleaseCadence;
use crate::error::KiraError;
use crate::fs_util;
use crate::sources::{DownloadOptions, SourceContext, Staged, VersionedSource};

pub const SOURCE_ID: &str = "gtex";
pub const RELEASE: &str = "v8";
pub const SAMPLE_ATTRIBUTES_FILE: &str = "GTEx_Analysis_v8_Annotations_SampleAttributesDS.txt";
pub const MEDIAN_TPM_FILE: &str =
    "GTEx_Analysis_2017-06-05_v8_RNASeQCv1.1.9_gene_median_tpm.gct.gz";

const SAMPLE_ATTRIBUTES_URL: &str = "https://storage.googleapis.com/adult-gtex/annotations/v8/metadata-files/GTEx_Analysis_v8_Annotations_SampleAttributesDS.txt";
const MEDIAN_TPM_URL: &str = "https://storage.googleapis.com/adult-gtex/bulk-gex/v8/rna-seq/GTEx_Analysis_2017-06-05_v8_RNASeQCv1.1.9_gene_median_tpm.gct.gz";

/// GTEx sample annotations and per-tissue median gene expression.
pub struct Gtex {
    ctx: SourceContext,
}

impl Gtex {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }
}

impl VersionedSource for Gtex {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn current_version(&self) -> String {
        ReleaseCadence::Fixed(RELEASE).version_for(self.ctx.today)
    }

    fn latest_local_instance(&self) -> bool {
        self.ctx.is_fresh(SOURCE_ID, &self.current_version(), &[])
    }

    fn download(&self, _options: &DownloadOptions) -> Result<(), KiraError> {
        self.ctx
            .install(SOURCE_ID, &self.current_version(), Vec::new(), |staging| {
                self.ctx.fetch_into(
                    SOURCE_ID,
                    SAMPLE_ATTRIBUTES_URL,
                    staging,
                    SAMPLE_ATTRIBUTES_FILE,
                )?;
                self.ctx
                    .fetch_into(SOURCE_ID, MEDIAN_TPM_URL, staging, MEDIAN_TPM_FILE)?;
                fs_util::validate_gzip(&staging.join(MEDIAN_TPM_FILE))?;
                Ok(Staged {
                    files: vec![
                        SAMPLE_ATTRIBUTES_FILE.to_string(),
                        MEDIAN_TPM_FILE.to_string(),
                    ],
                    upstream_version: Some(RELEASE.to_string()),
                })
            })
    }
}
