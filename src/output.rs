use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CleanResult, CollectionsResult, ExtractResult, FetchResult, ProgressEvent, ProgressSink,
    RunResult,
};
use crate::catalog::PagingStop;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
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

/// Human-readable reports on stdout, progress lines on stderr.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

fn mark(available: bool) -> &'static str {
    if available { "yes" } else { "no" }
}

impl ConsoleOutput {
    pub fn print_collections(result: &CollectionsResult) {
        for item in &result.collections {
            println!(
                "  {}. {} ({} MOFs)  json: {}  tables: {}  curated: {}",
                item.index,
                item.name,
                item.declared_count,
                mark(item.documents_available),
                mark(item.tables_available),
                mark(item.curated_available)
            );
        }
    }

    pub fn print_fetch(result: &FetchResult) {
        println!("Download summary");
        for item in &result.items {
            println!("  {}", item.collection);
            println!("    total records: {}", item.persisted.total);
            println!("    JSON files:    {}", item.persisted.json_written);
            println!("    CIF files:     {}", item.persisted.cif_written);
            println!("    missing CIF:   {}", item.missing_cif);
            if item.persisted.failures > 0 {
                println!("    failed writes: {}", item.persisted.failures);
            }
            match item.paging.stop {
                PagingStop::RetriesExhausted { page } => {
                    println!("    stopped early: page {page} failed after retries")
                }
                PagingStop::UnknownShape { page } => {
                    println!("    stopped early: unexpected response on page {page}")
                }
                PagingStop::LastPage | PagingStop::EmptyPage { .. } => {}
            }
            println!("    saved to {} and {}", item.json_dir, item.cif_dir);
        }
    }

    pub fn print_extract(result: &ExtractResult) {
        println!("Extraction summary");
        for item in &result.items {
            match item.action.as_str() {
                "skipped" => println!("  {}: no JSON documents, skipped", item.collection),
                _ => println!(
                    "  {}: {} isotherm tables in {}",
                    item.collection, item.tables, item.table_dir
                ),
            }
        }
    }

    pub fn print_clean(result: &CleanResult) {
        println!("Cleaning summary");
        for item in &result.items {
            println!("  {}", item.collection);
            if let Some(error) = &item.error {
                println!("    failed: {error}");
                continue;
            }
            let Some(stats) = &item.result else {
                println!("    no tables, skipped");
                continue;
            };
            println!("    scanned: {}", stats.total_files);
            println!("    kept:    {}", stats.kept_files);
            println!("    removed: {}", stats.removed_files);
            match &stats.summary_path {
                Some(path) => println!("    summary: {}", path.display()),
                None => println!("    no entries retained (all surface areas were 0 or missing)"),
            }
        }
    }

    pub fn print_run(result: &RunResult) {
        Self::print_fetch(&result.fetch);
        Self::print_extract(&result.extract);
        Self::print_clean(&result.clean);
    }
}
