use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ParserStatus, ProgressEvent, ProgressSink, RunReport, SourceStatus, StatusResult,
};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_status(status: &StatusResult) -> io::Result<()> {
        Self::print_json(status)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr and a colored summary on stdout.
pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &RunReport) {
        println!("{CYAN}kira-bg run ({}){RESET}", report.run_mode);
        for source in &report.sources {
            let color = match source.status {
                SourceStatus::Fresh | SourceStatus::Refreshed => GREEN,
                SourceStatus::Stale => YELLOW,
                SourceStatus::Failed => RED,
            };
            let status = serde_label(&source.status);
            println!("{color}  source {} {} [{status}]{RESET}", source.id, source.version);
            if let Some(error) = &source.error {
                println!("{RED}    {error}{RESET}");
            }
        }
        for parser in &report.parsers {
            match parser.status {
                ParserStatus::Completed => println!(
                    "{GREEN}  parser {} [completed] nodes={} relationships={} duplicates={}{RESET}",
                    parser.name, parser.nodes, parser.relationships, parser.duplicates
                ),
                ParserStatus::Failed => println!(
                    "{RED}  parser {} [failed] {}{RESET}",
                    parser.name,
                    parser.error.as_deref().unwrap_or_default()
                ),
            }
        }
        let load = &report.load;
        println!(
            "{CYAN}  load indexes={} nodes={} duplicates={} relationships={} skipped={}{RESET}",
            load.indexes,
            load.nodes_written,
            load.duplicate_keys,
            load.relationships_written,
            load.relationships_skipped
        );
        let color = if report.has_failures() { YELLOW } else { GREEN };
        println!("{color}  finished in {} ms{RESET}", report.elapsed_ms);
    }

    pub fn print_status(status: &StatusResult) {
        for source in &status.sources {
            let (color, state) = if source.fresh {
                (GREEN, "fresh")
            } else {
                (YELLOW, "stale")
            };
            println!(
                "{color}{} expected={} local={} [{state}]{RESET}",
                source.id,
                source.current_version,
                source.local_version.as_deref().unwrap_or("-")
            );
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

fn serde_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}
