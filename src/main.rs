mod bulk;
mod config;
mod db;
mod engine;
mod error;
mod extract;
mod fetcher;
mod model;
mod retry;
mod strategy;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use config::Settings;
use db::Store;
use engine::{CrawlContext, DateRange, Provenance, RunAborted, RunReport};
use error::StorageError;
use fetcher::HttpFetcher;
use strategy::banks::{self, Source};
use strategy::Bank;

#[derive(Parser)]
#[command(name = "cb_scraper", about = "Incremental crawler for central bank publications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl one bank and append new documents to the store
    Crawl {
        bank: Bank,
        /// Skip documents published before this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Skip documents published after this date (YYYY-MM-DD)
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Max listing pages to read
        #[arg(long)]
        max_pages: Option<usize>,
        /// Max new documents to write
        #[arg(short = 'n', long)]
        max_documents: Option<usize>,
        /// Table prefix (overrides database.table)
        #[arg(long)]
        table: Option<String>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Crawl every registered bank, one after the other
    CrawlAll {
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// List registered banks
    Banks,
    /// Row counts per country
    Stats { bank: Option<Bank> },
    /// Convert every PDF in a directory to a .txt file next to it
    ExtractPdfs {
        dir: PathBuf,
        /// Worker threads (default: bulk.workers, 0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Crawl {
            bank,
            since,
            until,
            max_pages,
            max_documents,
            table,
            json,
        } => {
            if let Some(n) = max_pages {
                settings.crawl.max_pages = n;
            }
            if max_documents.is_some() {
                settings.crawl.max_documents = max_documents;
            }
            if let Some(t) = table {
                settings.database.table = t;
            }
            let range = DateRange { since, until };
            match crawl_bank(&settings, bank, range) {
                Ok(report) => print_report(&report, json),
                Err(e) => {
                    if let Some(report) = aborted_report(bank, &e) {
                        print_report(&report, json)?;
                    }
                    Err(e.context(format!("{} crawl aborted", bank.institution())))
                }
            }
        }
        Commands::CrawlAll { since, until, json } => {
            let range = DateRange { since, until };
            let mut aborted = 0;
            for bank in Bank::ALL {
                match crawl_bank(&settings, bank, range) {
                    Ok(report) => print_report(&report, json)?,
                    Err(e) => {
                        error!("{} crawl aborted: {:#}", bank.institution(), e);
                        aborted += 1;
                        if let Some(report) = aborted_report(bank, &e) {
                            print_report(&report, json)?;
                        }
                    }
                }
            }
            if aborted > 0 {
                println!("\n{} of {} banks aborted", aborted, Bank::ALL.len());
            }
            Ok(())
        }
        Commands::Banks => {
            println!(
                "{:<13} | {:<4} | {:<14} | {:<28} | {:<7} | {}",
                "Bank", "ISO", "Country", "Institution", "Source", "Table"
            );
            println!("{}", "-".repeat(100));
            for bank in Bank::ALL {
                let source = match &banks::profile(bank).source {
                    Source::Listing(_) => "listing",
                    Source::Feed(_) => "feed",
                };
                println!(
                    "{:<13} | {:<4} | {:<14} | {:<28} | {:<7} | {}",
                    bank.slug(),
                    bank.iso3(),
                    bank.country_name(),
                    bank.institution(),
                    source,
                    settings.database.table
                );
            }
            Ok(())
        }
        Commands::Stats { bank } => {
            let store = open_store(&settings)?;
            let rows: Vec<_> = store
                .stats()?
                .into_iter()
                .filter(|s| bank.map_or(true, |b| s.country_code == b.iso3()))
                .collect();
            if rows.is_empty() {
                println!("No documents stored in {}.", store.table());
                return Ok(());
            }
            println!(
                "{:<4} | {:<16} | {:>9} | {:>10} | {:>8} | {}",
                "ISO", "Country", "Documents", "Categories", "Links", "Latest"
            );
            println!("{}", "-".repeat(72));
            for s in &rows {
                println!(
                    "{:<4} | {:<16} | {:>9} | {:>10} | {:>8} | {}",
                    s.country_code,
                    truncate(&s.country_name, 16),
                    s.documents,
                    s.categories,
                    s.links,
                    s.latest_published.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::ExtractPdfs { dir, workers } => {
            let paths = bulk::collect_pdfs(&dir)?;
            if paths.is_empty() {
                println!("No PDFs in {}.", dir.display());
                return Ok(());
            }
            let workers = workers.unwrap_or(settings.bulk.workers);
            let results = bulk::extract_all(&paths, workers)?;
            let summary = bulk::write_outputs(&results)?;
            println!("Extracted {} PDFs ({} failed).", summary.extracted, summary.failed);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<Store> {
    let path: &Path = &settings.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Store::open(path, &settings.database.table)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn crawl_bank(settings: &Settings, bank: Bank, range: DateRange) -> anyhow::Result<RunReport> {
    let store = open_store(settings)?;
    let fetcher = HttpFetcher::new(&settings.http, settings.retry.clone())
        .context("Failed to build HTTP client")?;
    let ctx = CrawlContext {
        fetcher: Box::new(fetcher),
        store,
        settings: settings.crawl.clone(),
        range,
        provenance: Provenance::detect(&settings.provenance),
    };
    info!("Crawling {} ({})", bank.institution(), bank.iso3());
    let strategy = strategy::for_bank(bank);
    Ok(engine::run(strategy.as_ref(), &ctx)?)
}

/// Summary for a run that never finished, when the cause was the store.
fn aborted_report(bank: Bank, e: &anyhow::Error) -> Option<RunReport> {
    if let Some(aborted) = e.downcast_ref::<RunAborted>() {
        return Some(aborted.report.clone());
    }
    e.downcast_ref::<StorageError>().map(|se| RunReport::aborted(bank, se))
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("\n{} ({}) {:?}", report.bank.institution(), report.country_code, report.outcome);
    println!("Pages:      {}", report.pages_read);
    println!("Candidates: {}", report.candidates_found);
    println!("Known:      {}", report.already_known);
    println!("Out of range: {}", report.out_of_range);
    println!("Fetched:    {}", report.fetched);
    println!(
        "Failed:     {} listing, {} fetch, {} parse",
        report.listing_failed, report.fetch_failed, report.parse_failed
    );
    println!(
        "Written:    {} documents, {} categories, {} links",
        report.documents_written, report.categories_written, report.links_written
    );
    for e in report.errors.iter().take(10) {
        println!("  [{}:{}] {}", e.stage, e.reason, truncate(&e.message, 100));
    }
    if report.errors.len() > 10 {
        println!("  ... {} more", report.errors.len() - 10);
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
