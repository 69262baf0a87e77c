use std::collections::HashSet;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{CrawlSettings, ProvenanceSettings};
use crate::db::Store;
use crate::error::{FetchError, ParseError, StorageError};
use crate::fetcher::Fetcher;
use crate::model::{file_id, is_pdf_url, CategoryRow, DocumentRow, LinkRow, ParsedDocument};
use crate::strategy::{enumerate_candidates, Bank, CrawlStrategy};

/// Everything one crawl run needs. Lives for exactly one run.
pub struct CrawlContext {
    pub fetcher: Box<dyn Fetcher>,
    pub store: Store,
    pub settings: CrawlSettings,
    pub range: DateRange,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateRange {
    /// Undated documents are always in range.
    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        let Some(d) = date else {
            return true;
        };
        self.since.map_or(true, |s| d >= s) && self.until.map_or(true, |u| d <= u)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub machine: Option<String>,
    pub ip: Option<String>,
}

impl Provenance {
    pub fn detect(settings: &ProvenanceSettings) -> Self {
        let machine = settings
            .machine
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let ip = settings.ip.clone().or_else(outbound_ip);
        Self { machine, ip }
    }
}

/// Local address the OS would route external traffic through. Sends nothing.
fn outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    FetchingFrontier,
    Crawling,
    Flushing,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Some documents were skipped on fetch/parse errors; the rest was written.
    FailedPartial,
    /// A store error stopped the run; nothing was written.
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentError {
    pub url: String,
    pub stage: &'static str,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub bank: Bank,
    pub country_code: &'static str,
    pub outcome: RunOutcome,
    pub success: bool,
    pub pages_read: usize,
    pub candidates_found: usize,
    pub already_known: usize,
    pub out_of_range: usize,
    pub fetched: usize,
    pub listing_failed: usize,
    pub fetch_failed: usize,
    pub parse_failed: usize,
    pub documents_written: usize,
    pub categories_written: usize,
    pub links_written: usize,
    pub documents_skipped: usize,
    pub elapsed_secs: f64,
    pub errors: Vec<DocumentError>,
}

impl RunReport {
    fn new(bank: Bank) -> Self {
        Self {
            bank,
            country_code: bank.iso3(),
            outcome: RunOutcome::Completed,
            success: true,
            pages_read: 0,
            candidates_found: 0,
            already_known: 0,
            out_of_range: 0,
            fetched: 0,
            listing_failed: 0,
            fetch_failed: 0,
            parse_failed: 0,
            documents_written: 0,
            categories_written: 0,
            links_written: 0,
            documents_skipped: 0,
            elapsed_secs: 0.0,
            errors: Vec::new(),
        }
    }

    /// Summary for a run that stopped on a store error.
    pub fn aborted(bank: Bank, error: &StorageError) -> Self {
        let mut report = Self::new(bank);
        report.outcome = RunOutcome::Aborted;
        report.success = false;
        report.errors.push(store_error(error));
        report
    }

    fn record_listing_failure(&mut self, e: &FetchError) {
        self.listing_failed += 1;
        self.errors.push(fetch_error("listing", e));
    }

    fn record_fetch_failure(&mut self, e: &FetchError) {
        self.fetch_failed += 1;
        self.errors.push(fetch_error("fetch", e));
    }

    fn record_parse_failure(&mut self, e: &ParseError) {
        self.parse_failed += 1;
        self.errors.push(DocumentError {
            url: e.url.clone(),
            stage: "parse",
            reason: "parse_error",
            message: e.message.clone(),
        });
    }

    fn abort(mut self, error: StorageError, elapsed: Duration) -> RunAborted {
        self.finish(elapsed);
        self.outcome = RunOutcome::Aborted;
        self.success = false;
        self.errors.push(store_error(&error));
        warn!("{}: run aborted: {}", self.bank.institution(), error);
        RunAborted { report: self, error }
    }

    fn finish(&mut self, elapsed: Duration) {
        self.documents_skipped = self.already_known + self.out_of_range + self.fetch_failed + self.parse_failed;
        self.outcome = if self.errors.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::FailedPartial
        };
        self.success = true;
        self.elapsed_secs = elapsed.as_secs_f64();
    }
}

fn store_error(e: &StorageError) -> DocumentError {
    DocumentError {
        url: String::new(),
        stage: "store",
        reason: if e.is_transient() { "transient" } else { "fatal" },
        message: e.to_string(),
    }
}

fn fetch_error(stage: &'static str, e: &FetchError) -> DocumentError {
    let url = match e {
        FetchError::Timeout { url }
        | FetchError::Http { url, .. }
        | FetchError::Connection { url, .. }
        | FetchError::Parse { url, .. } => url.clone(),
    };
    DocumentError {
        url,
        stage,
        reason: e.reason(),
        message: e.to_string(),
    }
}

/// Rows waiting for the single end-of-run write.
#[derive(Default)]
struct StagedBatch {
    documents: Vec<DocumentRow>,
    categories: Vec<CategoryRow>,
    links: Vec<LinkRow>,
    urls: HashSet<String>,
}

impl StagedBatch {
    fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    /// Categories and links are deduplicated against `seen_*`, which hold both the
    /// store's pairs for this country and everything staged earlier in this run.
    fn stage(
        &mut self,
        document: DocumentRow,
        parsed: ParsedDocument,
        seen_categories: &mut HashSet<(String, String)>,
        seen_links: &mut HashSet<(String, String)>,
    ) {
        let url = document.file_url.clone();
        let country = document.country_code.clone();

        for name in parsed.categories {
            let name = name.trim().to_string();
            if name.is_empty() || !seen_categories.insert((url.clone(), name.clone())) {
                continue;
            }
            self.categories.push(CategoryRow {
                country_code: country.clone(),
                file_url: url.clone(),
                category_name: name,
            });
        }

        for (link_url, link_name) in parsed.links {
            if link_url.is_empty() || link_url == url || !seen_links.insert((url.clone(), link_url.clone())) {
                continue;
            }
            let link_id = is_pdf_url(&link_url).then(|| file_id(&link_url));
            self.links.push(LinkRow {
                country_code: country.clone(),
                file_url: url.clone(),
                link_url,
                link_name,
                file_id: link_id,
            });
        }

        self.urls.insert(url);
        self.documents.push(document);
    }
}

/// A store failure stopped the run. Nothing was written; `report` holds the counts
/// gathered up to that point.
#[derive(Debug, Error)]
#[error("crawl aborted, nothing written")]
pub struct RunAborted {
    pub report: RunReport,
    #[source]
    pub error: StorageError,
}

/// Keys already stored for one country.
struct Frontier {
    known: HashSet<String>,
    categories: HashSet<(String, String)>,
    links: HashSet<(String, String)>,
    cutoff: Option<NaiveDate>,
}

fn load_frontier(ctx: &CrawlContext, country: &str) -> Result<Frontier, StorageError> {
    Ok(Frontier {
        known: ctx.store.existing_document_urls(country)?,
        categories: ctx.store.existing_category_pairs(country)?,
        links: ctx.store.existing_link_pairs(country)?,
        cutoff: enumeration_cutoff(ctx, country)?,
    })
}

/// One crawl run for one bank: frontier, crawl, single atomic flush.
///
/// Only store failures are returned as errors; per-document failures end up in the report.
pub fn run(strategy: &dyn CrawlStrategy, ctx: &CrawlContext) -> Result<RunReport, RunAborted> {
    let started = Instant::now();
    let bank = strategy.bank();
    let country = bank.iso3();
    let mut report = RunReport::new(bank);

    debug!(?bank, state = ?RunState::FetchingFrontier);
    let Frontier {
        known,
        categories: mut seen_categories,
        links: mut seen_links,
        cutoff,
    } = match load_frontier(ctx, country) {
        Ok(f) => f,
        Err(e) => return Err(report.abort(e, started.elapsed())),
    };
    info!(
        "{}: {} documents already stored for {}",
        bank.institution(),
        known.len(),
        country
    );

    debug!(?bank, state = ?RunState::Crawling);
    let pb = spinner();
    let mut batch = StagedBatch::default();
    let mut candidates = enumerate_candidates(strategy, ctx, &known, cutoff);

    for candidate in candidates.by_ref() {
        report.candidates_found += 1;
        pb.inc(1);

        if known.contains(&candidate.url) || batch.contains(&candidate.url) {
            debug!(url = %candidate.url, "already known, skipping");
            report.already_known += 1;
            continue;
        }
        if !ctx.range.contains(candidate.approximate_date) {
            debug!(url = %candidate.url, "outside date range, skipping");
            report.out_of_range += 1;
            continue;
        }

        pb.set_message(candidate.url.clone());
        let content = match ctx.fetcher.fetch(&candidate.url) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping {}: {}", candidate.url, e);
                report.record_fetch_failure(&e);
                continue;
            }
        };
        report.fetched += 1;

        let parsed = match strategy.parse(&candidate, content) {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping {}", e);
                report.record_parse_failure(&e);
                continue;
            }
        };
        let published = parsed
            .date_published
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        if !ctx.range.contains(published) {
            debug!(url = %candidate.url, "published outside date range, skipping");
            report.out_of_range += 1;
            continue;
        }

        let document = document_row(ctx, bank, &candidate.url, &parsed);
        batch.stage(document, parsed, &mut seen_categories, &mut seen_links);

        if ctx.settings.max_documents.is_some_and(|max| batch.len() >= max) {
            info!("{}: document limit reached", bank.institution());
            break;
        }
    }
    report.pages_read = candidates.pages_read();
    for e in candidates.take_listing_errors() {
        report.record_listing_failure(&e);
    }
    pb.finish_and_clear();

    if batch.documents.is_empty() {
        info!("{}: nothing new to write", bank.institution());
    } else {
        debug!(?bank, state = ?RunState::Flushing, documents = batch.len());
        let counts = match ctx
            .store
            .atomic_append(&batch.documents, &batch.categories, &batch.links)
        {
            Ok(c) => c,
            Err(e) => return Err(report.abort(e, started.elapsed())),
        };
        report.documents_written = counts.documents;
        report.categories_written = counts.categories;
        report.links_written = counts.links;
    }

    report.finish(started.elapsed());
    debug!(?bank, state = ?RunState::Idle, outcome = ?report.outcome);
    info!(
        "{}: {} found, {} known, {} fetched, {} fetch errors, {} parse errors, {} written",
        bank.institution(),
        report.candidates_found,
        report.already_known,
        report.fetched,
        report.fetch_failed,
        report.parse_failed,
        report.documents_written
    );
    Ok(report)
}

/// Oldest date worth paging towards: the requested start date and, when enabled,
/// the newest date already stored.
fn enumeration_cutoff(ctx: &CrawlContext, country: &str) -> Result<Option<NaiveDate>, StorageError> {
    let latest_known = if ctx.settings.stop_at_known_date {
        ctx.store
            .latest_date_published(country)?
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
    } else {
        None
    };
    Ok(match (latest_known, ctx.range.since) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    })
}

fn document_row(ctx: &CrawlContext, bank: Bank, url: &str, parsed: &ParsedDocument) -> DocumentRow {
    DocumentRow {
        file_url: url.to_string(),
        file_id: file_id(url),
        date_published: parsed.date_published.clone(),
        scraping_time: Utc::now(),
        country_code: bank.iso3().to_string(),
        country_name: bank.country_name().to_string(),
        extracted_text: parsed.text.clone(),
        scraping_machine: ctx.provenance.machine.clone(),
        scraping_ip: ctx.provenance.ip.clone(),
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} candidates {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    use super::*;
    use crate::extract::{ContentKind, ExtractedContent};

    /// In-memory fetcher. Records every URL it is asked for.
    #[derive(Default)]
    pub struct MockFetcher {
        pages: HashMap<String, ExtractedContent>,
        failing: HashSet<String>,
        serve_any: bool,
        pub calls: Rc<RefCell<Vec<String>>>,
    }

    impl MockFetcher {
        /// Answers every URL with a small HTML page.
        pub fn serving_all() -> Self {
            Self {
                serve_any: true,
                ..Self::default()
            }
        }

        pub fn with_page(mut self, url: &str, content: ExtractedContent) -> Self {
            self.pages.insert(url.to_string(), content);
            self
        }

        pub fn failing(mut self, url: &str) -> Self {
            self.failing.insert(url.to_string());
            self
        }
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, url: &str) -> Result<ExtractedContent, FetchError> {
            self.calls.borrow_mut().push(url.to_string());
            if self.failing.contains(url) {
                return Err(FetchError::Timeout { url: url.to_string() });
            }
            if let Some(page) = self.pages.get(url) {
                return Ok(page.clone());
            }
            if self.serve_any {
                return Ok(ExtractedContent {
                    url: url.to_string(),
                    kind: ContentKind::Html,
                    title: None,
                    text: format!("text of {url}"),
                    links: Vec::new(),
                });
            }
            Err(FetchError::Http {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    pub fn context(fetcher: MockFetcher) -> CrawlContext {
        CrawlContext {
            fetcher: Box::new(fetcher),
            store: Store::open_in_memory("docs").unwrap(),
            settings: CrawlSettings::default(),
            range: DateRange::default(),
            provenance: Provenance {
                machine: Some("test-host".into()),
                ip: Some("10.0.0.1".into()),
            },
        }
    }
}
