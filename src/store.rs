use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::{Builder, TempDir};
use tracing::debug;

use crate::error::KiraError;

const MARKER_FILE: &str = "version.json";
const STAGING_PREFIX: &str = ".staging-";

/// Local cache of downloaded source artifacts.
///
/// Layout: `<root>/<source>/version.json` names the current instance, which
/// lives in `<root>/<source>/<version>/`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Result<Utf8PathBuf, KiraError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("kira-biodata-graph"),
                )
                .ok()
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn source_dir(&self, source_id: &str) -> Utf8PathBuf {
        self.root.join(source_id)
    }

    pub fn marker_path(&self, source_id: &str) -> Utf8PathBuf {
        self.source_dir(source_id).join(MARKER_FILE)
    }

    pub fn instance_dir(&self, source_id: &str, version: &str) -> Utf8PathBuf {
        self.source_dir(source_id).join(version)
    }

    pub fn read_marker(&self, source_id: &str) -> Result<Option<VersionMarker>, KiraError> {
        let path = self.marker_path(source_id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        let marker = serde_json::from_str(&content)
            .map_err(|err| KiraError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(marker))
    }

    /// Directory of the instance the marker points at.
    pub fn current_instance(&self, source_id: &str) -> Result<Utf8PathBuf, KiraError> {
        let missing = |path: &Utf8Path| KiraError::MissingSource {
            source_id: source_id.to_string(),
            path: path.to_string(),
        };
        let marker = self
            .read_marker(source_id)?
            .ok_or_else(|| missing(&self.marker_path(source_id)))?;
        let dir = self.instance_dir(source_id, &marker.version);
        if !dir.as_std_path().is_dir() {
            return Err(missing(&dir));
        }
        Ok(dir)
    }

    /// Path of one artifact in the current instance.
    pub fn artifact(&self, source_id: &str, file: &str) -> Result<Utf8PathBuf, KiraError> {
        let path = self.current_instance(source_id)?.join(file);
        if !path.as_std_path().is_file() {
            return Err(KiraError::MissingSource {
                source_id: source_id.to_string(),
                path: path.to_string(),
            });
        }
        Ok(path)
    }

    /// Scratch directory for a download in progress. Dropped unless committed.
    pub fn stage(&self, source_id: &str) -> Result<TempDir, KiraError> {
        let dir = self.source_dir(source_id);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Promotes a staged download to the instance named by `marker`, then
    /// points the marker at it. The previous instance stays readable until the
    /// marker has been replaced.
    pub fn commit(&self, staged: TempDir, marker: &VersionMarker) -> Result<Utf8PathBuf, KiraError> {
        let instance = self.instance_dir(&marker.source, &marker.version);
        replace_dir(staged.path(), instance.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("install {instance}: {err}")))?;
        Self::write_marker(&self.marker_path(&marker.source), marker)?;
        self.prune(&marker.source, &marker.version)?;
        Ok(instance)
    }

    pub fn write_marker(path: &Utf8Path, marker: &VersionMarker) -> Result<(), KiraError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(marker)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    // Older instances and abandoned staging dirs.
    fn prune(&self, source_id: &str, keep: &str) -> Result<(), KiraError> {
        let dir = self.source_dir(source_id);
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !path.is_dir() || name == keep {
                continue;
            }
            debug!(source = source_id, dir = %path.display(), "removing superseded instance");
            fs::remove_dir_all(&path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub source: String,
    pub version: String,
    #[serde(default)]
    pub upstream_version: Option<String>,
    pub downloaded_at: String,
    pub tool: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl VersionMarker {
    pub fn new(source: &str, version: &str, files: Vec<String>, scope: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            version: version.to_string(),
            upstream_version: None,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("kira-bg/{}", env!("CARGO_PKG_VERSION")),
            files,
            scope,
        }
    }

    pub fn covers(&self, scope: &[String]) -> bool {
        scope.iter().all(|item| self.scope.contains(item))
    }
}

/// Replaces `to` with `from`, keeping the old directory until the new one is
/// in place.
pub fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
    if !to.exists() {
        return fs::rename(from, to);
    }
    let backup = to.with_extension("old");
    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }
    fs::rename(to, &backup)?;
    if let Err(err) = fs::rename(from, to) {
        fs::rename(&backup, to)?;
        return Err(err);
    }
    fs::remove_dir_all(&backup)
}
