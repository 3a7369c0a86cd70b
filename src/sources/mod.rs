//! Versioned upstream datasets cached under the storage root.
//!
//! Every source knows the version a fresh copy must carry (see
//! [`ReleaseCadence`](crate::domain::ReleaseCadence)) and can answer
//! [`VersionedSource::latest_local_instance`] from the local marker alone.
//! Downloads are staged next to the cache and promoted only once complete, so
//! a failed refresh never damages the previous instance.

pub mod gene_ontology;
pub mod gtex;
pub mod ncbi_taxonomy;
pub mod reactome;

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::domain::TaxId;
use crate::error::KiraError;
use crate::fetch::Fetcher;
use crate::store::{Store, VersionMarker};

pub use gene_ontology::GeneOntology;
pub use gtex::Gtex;
pub use ncbi_taxonomy::NcbiTaxonomy;
pub use reactome::Reactome;

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Restricts organism-specific payloads. Empty means the source default.
    pub taxids: Vec<TaxId>,
}

pub trait VersionedSource: Send + Sync {
    fn id(&self) -> &'static str;

    /// Version a fresh local copy must carry, derived without network access.
    fn current_version(&self) -> String;

    /// True when the cached instance matches [`current_version`] and its scope.
    ///
    /// [`current_version`]: VersionedSource::current_version
    fn latest_local_instance(&self) -> bool;

    fn download(&self, options: &DownloadOptions) -> Result<(), KiraError>;
}

/// What every source needs: the cache, a transport and the run date.
#[derive(Clone)]
pub struct SourceContext {
    pub store: Store,
    pub fetcher: Arc<dyn Fetcher>,
    pub today: NaiveDate,
}

impl SourceContext {
    pub fn new(store: Store, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            fetcher,
            today: chrono::Utc::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub(crate) fn is_fresh(&self, source_id: &str, version: &str, scope: &[String]) -> bool {
        let marker = match self.store.read_marker(source_id) {
            Ok(Some(marker)) => marker,
            _ => return false,
        };
        if marker.version != version || !marker.covers(scope) {
            return false;
        }
        let dir = self.store.instance_dir(source_id, version);
        marker
            .files
            .iter()
            .all(|file| dir.join(file).as_std_path().is_file())
    }

    pub(crate) fn fetch_into(
        &self,
        source_id: &str,
        url: &str,
        staging: &Path,
        file: &str,
    ) -> Result<(), KiraError> {
        self.fetcher.fetch(source_id, url, &staging.join(file))
    }

    /// Runs `populate` against a fresh staging directory and installs the
    /// result as `version`.
    pub(crate) fn install<F>(
        &self,
        source_id: &str,
        version: &str,
        scope: Vec<String>,
        populate: F,
    ) -> Result<(), KiraError>
    where
        F: FnOnce(&Path) -> Result<Staged, KiraError>,
    {
        let staging = self.store.stage(source_id)?;
        info!(source = source_id, version, "downloading");
        let staged = populate(staging.path())?;
        for file in &staged.files {
            if !staging.path().join(file).is_file() {
                return Err(KiraError::Fetch {
                    source_id: source_id.to_string(),
                    message: format!("download did not produce {file}"),
                });
            }
        }
        let mut marker = VersionMarker::new(source_id, version, staged.files, scope);
        marker.upstream_version = staged.upstream_version;
        let dir = self.store.commit(staging, &marker)?;
        debug!(source = source_id, dir = %dir, "installed");
        Ok(())
    }
}

/// Files left in a staging directory by a completed download.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub files: Vec<String>,
    pub upstream_version: Option<String>,
}

/// The bundled datasets in refresh order.
pub fn default_sources(ctx: &SourceContext, taxids: &[TaxId]) -> Vec<Box<dyn VersionedSource>> {
    vec![
        Box::new(Gtex::new(ctx.clone())),
        Box::new(GeneOntology::new(ctx.clone(), taxids.to_vec())),
        Box::new(Reactome::new(ctx.clone())),
        Box::new(NcbiTaxonomy::new(ctx.clone())),
    ]
}
