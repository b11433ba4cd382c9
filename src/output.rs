use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::batch::BatchReport;
use crate::workflow::{ItemOutcome, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_item(outcome: &ItemOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_urls(urls: &[String]) -> io::Result<()> {
        Self::print_json(&urls)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
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

/// Reports every stage transition through `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        debug!(
            url = event.url.as_str(),
            stage = ?event.stage,
            elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64),
            "stage"
        );
    }
}

pub fn print_summary(report: &BatchReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}deltares-etl summary ({} workers){reset}", report.workers);
    println!("{green}Processed items: {}{reset}", report.succeeded.len());
    let color = if report.failed.is_empty() { yellow } else { red };
    println!("{color}Errors: {}{reset}", report.failed.len());

    for outcome in &report.succeeded {
        println!(
            "{green}  {} references={:?} stac={:?}{reset}",
            outcome.item_id, outcome.references, outcome.stac_item
        );
    }
    for failure in &report.failed {
        println!("{red}  {} {}{reset}", failure.url, failure.error);
    }
}
