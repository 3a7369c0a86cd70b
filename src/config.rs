use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{EdgePolicy, RunMode, TaxId};
use crate::error::KiraError;
use crate::graphdb::RetryPolicy;
use crate::sources::gene_ontology::annotation_file;
use crate::store::Store;

pub const DEFAULT_CONFIG_FILE: &str = "kira-bg.json";

pub const ENV_ROOT_DIR: &str = "ROOT_DIR";
pub const ENV_STORE_URL: &str = "GC_NEO4J_URL";
pub const ENV_STORE_USER: &str = "GC_NEO4J_USER";
pub const ENV_STORE_PASSWORD: &str = "GC_NEO4J_PASSWORD";
pub const ENV_STORE_DATABASE: &str = "GC_NEO4J_DATABASE";
pub const ENV_RUN_MODE: &str = "RUN_MODE";

const DEFAULT_STORE_URL: &str = "http://localhost:7474";
const DEFAULT_STORE_USER: &str = "neo4j";
const DEFAULT_STORE_PASSWORD: &str = "test";
const DEFAULT_STORE_DATABASE: &str = "neo4j";
const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TAXID: u32 = 9606;
const MAX_BASE_DELAY_MS: u64 = 60_000;

/// On-disk shape of `kira-bg.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub root_dir: Option<String>,
    #[serde(default)]
    pub run_mode: Option<RunMode>,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub edge_policy: Option<EdgePolicy>,
    #[serde(default)]
    pub abort_on_parser_failure: Option<bool>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub store_timeout_secs: Option<u64>,
    #[serde(default)]
    pub taxids: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

/// Connection settings for the target graph store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Fully resolved settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root_dir: Utf8PathBuf,
    pub store: StoreConfig,
    pub run_mode: RunMode,
    pub edge_policy: EdgePolicy,
    pub abort_on_parser_failure: bool,
    pub workers: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub taxids: Vec<TaxId>,
}

impl RunConfig {
    /// Defaults rooted at `root_dir`, ignoring file and environment.
    pub fn with_root(root_dir: Utf8PathBuf) -> Self {
        Self {
            root_dir,
            store: StoreConfig {
                url: DEFAULT_STORE_URL.to_string(),
                user: DEFAULT_STORE_USER.to_string(),
                password: DEFAULT_STORE_PASSWORD.to_string(),
                database: DEFAULT_STORE_DATABASE.to_string(),
            },
            run_mode: RunMode::default(),
            edge_policy: EdgePolicy::default(),
            abort_on_parser_failure: false,
            workers: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            taxids: vec![TaxId::new(DEFAULT_TAXID)],
        }
    }

    pub fn artifact_store(&self) -> Store {
        Store::new(self.root_dir.clone())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file, then applies the process environment.
    pub fn resolve(path: Option<&str>) -> Result<RunConfig, KiraError> {
        let config = Self::load(path)?;
        Self::resolve_with_env(config, |name| std::env::var(name).ok())
    }

    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&str>) -> Result<Config, KiraError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_with_env<E>(config: Config, env: E) -> Result<RunConfig, KiraError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let root_dir = match env(ENV_ROOT_DIR).or(config.root_dir) {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Store::default_root()?,
        };
        let mut resolved = RunConfig::with_root(root_dir);

        let section = config.store;
        if let Some(url) = env(ENV_STORE_URL).or(section.url) {
            resolved.store.url = validate_store_url(url)?;
        }
        if let Some(user) = env(ENV_STORE_USER).or(section.user) {
            resolved.store.user = user;
        }
        if let Some(password) = env(ENV_STORE_PASSWORD).or(section.password) {
            resolved.store.password = password;
        }
        if let Some(database) = env(ENV_STORE_DATABASE).or(section.database) {
            resolved.store.database = database;
        }

        resolved.run_mode = match env(ENV_RUN_MODE) {
            Some(mode) => mode.parse()?,
            None => config.run_mode.unwrap_or_default(),
        };
        resolved.edge_policy = config.edge_policy.unwrap_or_default();
        resolved.abort_on_parser_failure = config.abort_on_parser_failure.unwrap_or(false);

        if let Some(workers) = config.workers {
            resolved.workers = positive("workers", workers)?;
        }
        if let Some(batch_size) = config.batch_size {
            resolved.batch_size = positive("batch_size", batch_size)?;
        }
        if let Some(max_attempts) = config.retry.max_attempts {
            resolved.retry.max_attempts = positive("retry.max_attempts", max_attempts)?;
        }
        if let Some(delay) = config.retry.base_delay_ms {
            if delay > MAX_BASE_DELAY_MS {
                return Err(KiraError::ConfigValue {
                    field: "retry.base_delay_ms".to_string(),
                    message: format!("must be at most {MAX_BASE_DELAY_MS}"),
                });
            }
            resolved.retry.base_delay = Duration::from_millis(delay);
        }
        if let Some(secs) = config.fetch_timeout_secs {
            resolved.fetch_timeout = Duration::from_secs(positive("fetch_timeout_secs", secs)?);
        }
        if let Some(secs) = config.store_timeout_secs {
            resolved.store_timeout = Duration::from_secs(positive("store_timeout_secs", secs)?);
        }

        if !config.taxids.is_empty() {
            let mut taxids = Vec::with_capacity(config.taxids.len());
            for raw in &config.taxids {
                let taxid: TaxId = raw.parse()?;
                annotation_file(taxid)?;
                if !taxids.contains(&taxid) {
                    taxids.push(taxid);
                }
            }
            resolved.taxids = taxids;
        }

        Ok(resolved)
    }
}

fn positive<T: Default + PartialEq>(field: &str, value: T) -> Result<T, KiraError> {
    if value == T::default() {
        return Err(KiraError::ConfigValue {
            field: field.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn validate_store_url(url: String) -> Result<String, KiraError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url);
    }
    let message = if url.starts_with("bolt") || url.starts_with("neo4j") {
        "only the HTTP endpoint is supported (e.g. http://localhost:7474)".to_string()
    } else {
        "expected an http:// or https:// URL".to_string()
    };
    Err(KiraError::ConfigValue {
        field: "store.url".to_string(),
        message,
    })
}
