use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::domain::RunMode;
use crate::error::KiraError;
use crate::graph::Container;
use crate::graphdb::{GraphStore, MemoryGraphStore};
use crate::loader::{GraphLoader, LoadReport, LoaderOptions, parallel_map};
use crate::fetch::Fetcher;
use crate::parsers::{Parser, default_parsers};
use crate::sources::{DownloadOptions, SourceContext, VersionedSource, default_sources};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Download every source even when its local instance is fresh.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Fresh,
    Refreshed,
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub id: String,
    pub version: String,
    pub status: SourceStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParserReport {
    pub name: String,
    pub status: ParserStatus,
    pub nodes: usize,
    pub relationships: usize,
    pub duplicates: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_mode: RunMode,
    pub sources: Vec<SourceReport>,
    pub parsers: Vec<ParserReport>,
    pub load: LoadReport,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// True when any source or parser failed even though the run finished.
    pub fn has_failures(&self) -> bool {
        self.sources
            .iter()
            .any(|source| source.status == SourceStatus::Failed)
            || self
                .parsers
                .iter()
                .any(|parser| parser.status == ParserStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub sources: Vec<SourceState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceState {
    pub id: String,
    pub current_version: String,
    pub local_version: Option<String>,
    pub upstream_version: Option<String>,
    pub downloaded_at: Option<String>,
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Shared flag a caller sets to stop a run at the next phase boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: &str) -> Result<(), KiraError> {
        if self.is_cancelled() {
            warn!(stage, "run cancelled");
            return Err(KiraError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

/// Refreshes sources, runs parsers and loads their output into `G`.
pub struct Pipeline<G: GraphStore> {
    config: RunConfig,
    artifacts: Store,
    graph: G,
    sources: Vec<(Box<dyn VersionedSource>, DownloadOptions)>,
    parsers: Vec<Box<dyn Parser>>,
    cancel: CancelFlag,
}

impl<G: GraphStore> Pipeline<G> {
    pub fn new(config: RunConfig, graph: G) -> Self {
        let artifacts = config.artifact_store();
        Self {
            config,
            artifacts,
            graph,
            sources: Vec::new(),
            parsers: Vec::new(),
            cancel: CancelFlag::default(),
        }
    }

    /// A pipeline with every bundled source and parser registered.
    pub fn bundled(config: RunConfig, graph: G, fetcher: Arc<dyn Fetcher>) -> Self {
        let mut pipeline = Self::new(config, graph);
        let taxids = pipeline.config.taxids.clone();
        let ctx = SourceContext::new(pipeline.artifacts.clone(), fetcher);
        for source in default_sources(&ctx, &taxids) {
            pipeline.register_source(
                source,
                DownloadOptions {
                    taxids: taxids.clone(),
                },
            );
        }
        for parser in default_parsers(&pipeline.artifacts, &taxids) {
            pipeline.register_parser(parser);
        }
        pipeline
    }

    pub fn register_source(&mut self, source: Box<dyn VersionedSource>, options: DownloadOptions) {
        self.sources.push((source, options));
    }

    pub fn register_parser(&mut self, parser: Box<dyn Parser>) {
        self.parsers.push(parser);
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn run(&self, options: RunOptions, sink: &dyn ProgressSink) -> Result<RunReport, KiraError> {
        let started = Instant::now();
        let mode = self.config.run_mode;
        info!(
            mode = %mode,
            sources = self.sources.len(),
            parsers = self.parsers.len(),
            "starting run"
        );

        let sources = self.refresh_sources(options, sink)?;
        let (containers, parsers) = self.run_parsers(sink)?;

        let load = if mode == RunMode::Test {
            let scratch = MemoryGraphStore::new();
            self.load(&scratch, &containers, sink)?
        } else {
            self.load(&self.graph, &containers, sink)?
        };

        let report = RunReport {
            run_mode: mode,
            sources,
            parsers,
            load,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        sink.event(ProgressEvent {
            message: "phase=Done; run complete".to_string(),
            elapsed: Some(started.elapsed()),
        });
        info!(
            failures = report.has_failures(),
            elapsed_ms = report.elapsed_ms,
            "run complete"
        );
        Ok(report)
    }

    /// Local freshness of every registered source. Never downloads.
    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; reading version markers".to_string(),
            elapsed: None,
        });
        let mut sources = Vec::with_capacity(self.sources.len());
        for (source, _) in &self.sources {
            let marker = self.artifacts.read_marker(source.id())?;
            sources.push(SourceState {
                id: source.id().to_string(),
                current_version: source.current_version(),
                local_version: marker.as_ref().map(|marker| marker.version.clone()),
                upstream_version: marker
                    .as_ref()
                    .and_then(|marker| marker.upstream_version.clone()),
                downloaded_at: marker.map(|marker| marker.downloaded_at),
                fresh: source.latest_local_instance(),
            });
        }
        Ok(StatusResult { sources })
    }

    fn refresh_sources(
        &self,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<SourceReport>, KiraError> {
        if self.config.workers <= 1 {
            let mut reports = Vec::with_capacity(self.sources.len());
            for (source, download) in &self.sources {
                self.cancel.check(&format!("refreshing {}", source.id()))?;
                reports.push(self.refresh_source(source.as_ref(), download, options, sink));
            }
            return Ok(reports);
        }

        self.cancel.check("source refresh")?;
        Ok(parallel_map(self.config.workers, self.sources.len(), |index| {
            let (source, download) = &self.sources[index];
            self.refresh_source(source.as_ref(), download, options, sink)
        }))
    }

    fn refresh_source(
        &self,
        source: &dyn VersionedSource,
        download: &DownloadOptions,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> SourceReport {
        let id = source.id().to_string();
        let version = source.current_version();
        let report = |status: SourceStatus, error: Option<String>| SourceReport {
            id: id.clone(),
            version: version.clone(),
            status,
            error,
        };

        if !options.force && source.latest_local_instance() {
            info!(source = %id, version = %version, "source is fresh");
            sink.event(ProgressEvent {
                message: format!("phase=Refresh; {id} fresh ({version})"),
                elapsed: None,
            });
            return report(SourceStatus::Fresh, None);
        }

        if self.config.run_mode == RunMode::Test {
            info!(source = %id, version = %version, "test mode; skipping download");
            sink.event(ProgressEvent {
                message: format!("phase=Refresh; {id} stale, download skipped"),
                elapsed: None,
            });
            return report(SourceStatus::Stale, None);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Refresh; downloading {id} ({version})"),
            elapsed: None,
        });
        let started = Instant::now();
        match source.download(download) {
            Ok(()) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Refresh; {id} refreshed"),
                    elapsed: Some(started.elapsed()),
                });
                report(SourceStatus::Refreshed, None)
            }
            Err(err) => {
                error!(source = %id, error = %err, "source refresh failed");
                report(SourceStatus::Failed, Some(err.to_string()))
            }
        }
    }

    fn run_parsers(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(Vec<Container>, Vec<ParserReport>), KiraError> {
        let outcomes = if self.config.workers <= 1 {
            let mut outcomes = Vec::with_capacity(self.parsers.len());
            for parser in &self.parsers {
                self.cancel.check(&format!("parser {}", parser.name()))?;
                let outcome = self.run_parser(parser.as_ref(), sink);
                let failed = outcome.is_err();
                outcomes.push(outcome);
                if failed && self.config.abort_on_parser_failure {
                    break;
                }
            }
            outcomes
        } else {
            self.cancel.check("parsers")?;
            parallel_map(self.config.workers, self.parsers.len(), |index| {
                self.run_parser(self.parsers[index].as_ref(), sink)
            })
        };

        let mut containers = Vec::with_capacity(outcomes.len());
        let mut reports = Vec::with_capacity(outcomes.len());
        for (parser, outcome) in self.parsers.iter().zip(outcomes) {
            match outcome {
                Ok(container) => {
                    reports.push(ParserReport {
                        name: parser.name().to_string(),
                        status: ParserStatus::Completed,
                        nodes: container.node_count(),
                        relationships: container.relationship_count(),
                        duplicates: container.duplicate_count(),
                        error: None,
                    });
                    containers.push(container);
                }
                Err(err) => {
                    if self.config.abort_on_parser_failure {
                        return Err(KiraError::ParserFailed {
                            parser: parser.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                    reports.push(ParserReport {
                        name: parser.name().to_string(),
                        status: ParserStatus::Failed,
                        nodes: 0,
                        relationships: 0,
                        duplicates: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok((containers, reports))
    }

    fn run_parser(&self, parser: &dyn Parser, sink: &dyn ProgressSink) -> Result<Container, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Parse; {}", parser.name()),
            elapsed: None,
        });
        let started = Instant::now();
        match parser.run() {
            Ok(container) => {
                info!(
                    parser = parser.name(),
                    nodes = container.node_count(),
                    relationships = container.relationship_count(),
                    "parser completed"
                );
                sink.event(ProgressEvent {
                    message: format!("phase=Parse; {} completed", parser.name()),
                    elapsed: Some(started.elapsed()),
                });
                Ok(container)
            }
            Err(err) => {
                error!(parser = parser.name(), error = %err, "parser failed");
                Err(err)
            }
        }
    }

    fn load<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        containers: &[Container],
        sink: &dyn ProgressSink,
    ) -> Result<LoadReport, KiraError> {
        let options = LoaderOptions {
            batch_size: self.config.batch_size,
            workers: self.config.workers,
            edge_policy: self.config.edge_policy,
            retry: self.config.retry,
        };

        self.cancel.check("index creation")?;
        sink.event(ProgressEvent {
            message: "phase=Index; ensuring unique indexes".to_string(),
            elapsed: None,
        });
        let indexed = GraphLoader::new(store, options, containers).create_indexes()?;

        self.cancel.check("node creation")?;
        sink.event(ProgressEvent {
            message: "phase=Nodes; merging nodes".to_string(),
            elapsed: None,
        });
        let nodes = indexed.create_nodes()?;

        self.cancel.check("relationship creation")?;
        sink.event(ProgressEvent {
            message: "phase=Relationships; merging relationships".to_string(),
            elapsed: None,
        });
        nodes.create_relationships()
    }
}
