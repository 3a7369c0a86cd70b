use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxId(String),

    #[error("no GO annotation file is published for taxonomy id {0}")]
    UnsupportedTaxId(u32),

    #[error("invalid run mode: {0} (expected prod|test)")]
    InvalidRunMode(String),

    #[error("invalid edge policy: {0} (expected skip|fail)")]
    InvalidEdgePolicy(String),

    #[error("invalid graph identifier: {0:?}")]
    #[diagnostic(help("labels, relationship types and property names must match [A-Za-z_][A-Za-z0-9_]*"))]
    InvalidIdentifier(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value for {field}: {message}")]
    ConfigValue { field: String, message: String },

    #[error("download of {source_id} failed: {message}")]
    Fetch { source_id: String, message: String },

    #[error("download of {source_id} returned status {status}: {message}")]
    FetchStatus {
        source_id: String,
        status: u16,
        message: String,
    },

    #[error("source {source_id} has no local instance at {path}")]
    #[diagnostic(help("run without --mode test so the source is downloaded first"))]
    MissingSource { source_id: String, path: String },

    #[error("{parser}: line {line}: {message}")]
    Parse {
        parser: String,
        line: usize,
        message: String,
    },

    #[error("record for label {label} has no usable key property {key}")]
    MissingKey { label: String, key: String },

    #[error("duplicate key {key} in node set {label}; keeping the last record")]
    DuplicateKey { label: String, key: String },

    #[error("{rel_type}: no {label} node with key {key}")]
    UnresolvedEndpoint {
        rel_type: String,
        label: String,
        key: String,
    },

    #[error("graph store request failed: {0}")]
    StoreHttp(String),

    #[error("graph store returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("graph store rejected statement ({code}): {message}")]
    StoreStatement { code: String, message: String },

    #[error("{operation} failed after {attempts} attempts: {message}")]
    StoreWrite {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("parser {parser} failed: {message}")]
    ParserFailed { parser: String, message: String },

    #[error("run cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Errors a store call may succeed on when repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            KiraError::StoreHttp(_) => true,
            KiraError::StoreStatus { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            KiraError::StoreStatement { code, .. } => code.contains("TransientError"),
            _ => false,
        }
    }
}
