pub mod banks;
pub mod feed;
pub mod heuristics;
pub mod listing;

use std::collections::{HashSet, VecDeque};

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::CrawlContext;
use crate::error::{FetchError, ParseError};
use crate::extract::ExtractedContent;
use crate::model::{Candidate, ParsedDocument};
use banks::Source;
use feed::FeedStrategy;
use listing::ListingStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bank {
    Australia,
    Canada,
    Ecb,
    England,
    Fed,
    Japan,
    Norway,
    Sweden,
    Switzerland,
    NewZealand,
}

impl Bank {
    pub const ALL: [Bank; 10] = [
        Bank::Australia,
        Bank::Canada,
        Bank::Ecb,
        Bank::England,
        Bank::Fed,
        Bank::Japan,
        Bank::Norway,
        Bank::Sweden,
        Bank::Switzerland,
        Bank::NewZealand,
    ];

    /// ISO-3 code of the country partition. The euro area uses `EMU`.
    pub fn iso3(self) -> &'static str {
        match self {
            Bank::Australia => "AUS",
            Bank::Canada => "CAN",
            Bank::Ecb => "EMU",
            Bank::England => "GBR",
            Bank::Fed => "USA",
            Bank::Japan => "JPN",
            Bank::Norway => "NOR",
            Bank::Sweden => "SWE",
            Bank::Switzerland => "CHE",
            Bank::NewZealand => "NZL",
        }
    }

    pub fn country_name(self) -> &'static str {
        match self {
            Bank::Australia => "Australia",
            Bank::Canada => "Canada",
            Bank::Ecb => "Euro Area",
            Bank::England => "United Kingdom",
            Bank::Fed => "United States",
            Bank::Japan => "Japan",
            Bank::Norway => "Norway",
            Bank::Sweden => "Sweden",
            Bank::Switzerland => "Switzerland",
            Bank::NewZealand => "New Zealand",
        }
    }

    pub fn institution(self) -> &'static str {
        match self {
            Bank::Australia => "Reserve Bank of Australia",
            Bank::Canada => "Bank of Canada",
            Bank::Ecb => "European Central Bank",
            Bank::England => "Bank of England",
            Bank::Fed => "Federal Reserve Board",
            Bank::Japan => "Bank of Japan",
            Bank::Norway => "Norges Bank",
            Bank::Sweden => "Sveriges Riksbank",
            Bank::Switzerland => "Swiss National Bank",
            Bank::NewZealand => "Reserve Bank of New Zealand",
        }
    }

    /// Name accepted on the command line.
    pub fn slug(self) -> String {
        self.to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default()
    }
}

/// Per-bank enumeration and parsing.
pub trait CrawlStrategy {
    fn bank(&self) -> Bank;

    /// Candidates listed on index page `page` (0 = newest), or `None` past the last page.
    fn listing_page(&self, ctx: &CrawlContext, page: usize) -> Result<Option<Vec<Candidate>>, FetchError>;

    /// Whether an empty page means there is nothing older. Archives split by year can
    /// have an empty year in the middle, or a current year with nothing published yet.
    fn empty_page_ends_listing(&self) -> bool {
        true
    }

    fn parse(&self, candidate: &Candidate, content: ExtractedContent) -> Result<ParsedDocument, ParseError>;
}

/// Registry: one constructor per bank, chosen by its profile's source kind.
pub fn for_bank(bank: Bank) -> Box<dyn CrawlStrategy> {
    let profile = banks::profile(bank);
    match &profile.source {
        Source::Listing(pagination) => Box::new(ListingStrategy::new(profile, pagination)),
        Source::Feed(url) => Box::new(FeedStrategy::new(profile, url)),
    }
}

/// Lazy, finite, single-pass sequence of candidates across listing pages.
///
/// Paging stops after the last page, at the first empty page (unless the strategy allows
/// empty pages), at a page made only of known URLs, at a page
/// whose dates are all older than `cutoff`, after `max_pages` pages, or when a listing
/// page cannot be fetched.
pub struct Candidates<'a> {
    strategy: &'a dyn CrawlStrategy,
    ctx: &'a CrawlContext,
    known: &'a HashSet<String>,
    cutoff: Option<NaiveDate>,
    buffer: VecDeque<Candidate>,
    next_page: usize,
    exhausted: bool,
    listing_errors: Vec<FetchError>,
}

pub fn enumerate_candidates<'a>(
    strategy: &'a dyn CrawlStrategy,
    ctx: &'a CrawlContext,
    known: &'a HashSet<String>,
    cutoff: Option<NaiveDate>,
) -> Candidates<'a> {
    Candidates {
        strategy,
        ctx,
        known,
        cutoff,
        buffer: VecDeque::new(),
        next_page: 0,
        exhausted: false,
        listing_errors: Vec::new(),
    }
}

impl Candidates<'_> {
    pub fn pages_read(&self) -> usize {
        self.next_page
    }

    pub fn take_listing_errors(&mut self) -> Vec<FetchError> {
        std::mem::take(&mut self.listing_errors)
    }

    fn load_next_page(&mut self) {
        let page = self.next_page;
        if page >= self.ctx.settings.max_pages {
            debug!(page, "listing page limit reached");
            self.exhausted = true;
            return;
        }
        self.next_page += 1;

        let candidates = match self.strategy.listing_page(self.ctx, page) {
            Ok(Some(c)) => c,
            Ok(None) => {
                debug!(page, "past the last listing page");
                self.exhausted = true;
                return;
            }
            Err(e) => {
                warn!(page, "listing page failed, stopping enumeration: {}", e);
                self.listing_errors.push(e);
                self.exhausted = true;
                return;
            }
        };

        if candidates.is_empty() {
            debug!(page, "empty listing page");
            if self.strategy.empty_page_ends_listing() {
                self.exhausted = true;
            }
            return;
        }
        if candidates.iter().all(|c| self.known.contains(&c.url)) {
            debug!(page, "listing page entirely known");
            self.exhausted = true;
        }
        if let Some(cutoff) = self.cutoff {
            let stale = candidates
                .iter()
                .all(|c| c.approximate_date.is_some_and(|d| d < cutoff));
            if stale {
                debug!(page, %cutoff, "listing page older than cutoff");
                self.exhausted = true;
            }
        }
        self.buffer.extend(candidates);
    }
}

impl Iterator for Candidates<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            if let Some(c) = self.buffer.pop_front() {
                return Some(c);
            }
            if self.exhausted {
                return None;
            }
            self.load_next_page();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedStrategy;
    use super::*;
    use crate::engine::testing::{context, MockFetcher};

    fn urls(c: &mut Candidates) -> Vec<String> {
        c.by_ref().map(|c| c.url).collect()
    }

    #[test]
    fn pages_until_empty() {
        let strategy = ScriptedStrategy::new(Bank::Fed, vec![vec!["a", "b"], vec!["c"], vec![]]);
        let ctx = context(MockFetcher::default());
        let known = HashSet::new();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a", "b", "c"]);
        assert_eq!(strategy.listing_calls.get(), 3);
        assert_eq!(c.pages_read(), 3);
    }

    #[test]
    fn stops_after_last_page() {
        let strategy = ScriptedStrategy::new(Bank::Fed, vec![vec!["a"], vec!["b"]]);
        let ctx = context(MockFetcher::default());
        let known = HashSet::new();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a", "b"]);
        assert_eq!(strategy.listing_calls.get(), 3);
    }

    #[test]
    fn empty_pages_can_be_skipped() {
        let mut strategy = ScriptedStrategy::new(Bank::Japan, vec![vec![], vec![], vec!["a"], vec!["b"]]);
        strategy.empty_pages_end = false;
        let ctx = context(MockFetcher::default());
        let known = HashSet::new();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a", "b"]);
        assert_eq!(c.pages_read(), 5);
    }

    #[test]
    fn stops_after_fully_known_page() {
        let strategy = ScriptedStrategy::new(Bank::Fed, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
        let ctx = context(MockFetcher::default());
        let known: HashSet<String> = ["c", "d"].iter().map(|s| s.to_string()).collect();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a", "b", "c", "d"]);
        assert_eq!(strategy.listing_calls.get(), 2);
    }

    #[test]
    fn stops_at_page_limit() {
        let strategy = ScriptedStrategy::new(Bank::Fed, vec![vec!["a"], vec!["b"], vec!["c"]]);
        let mut ctx = context(MockFetcher::default());
        ctx.settings.max_pages = 2;
        let known = HashSet::new();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a", "b"]);
        assert_eq!(strategy.listing_calls.get(), 2);
    }

    #[test]
    fn listing_failure_ends_enumeration_and_is_recorded() {
        let mut strategy = ScriptedStrategy::new(Bank::Fed, vec![vec!["a"]]);
        strategy.pages.push(Err(503));
        strategy.pages.push(Ok(vec![Candidate::new("z")]));
        let ctx = context(MockFetcher::default());
        let known = HashSet::new();
        let mut c = enumerate_candidates(&strategy, &ctx, &known, None);
        assert_eq!(urls(&mut c), vec!["a"]);
        let errors = c.take_listing_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason(), "http_error");
    }

    #[test]
    fn stops_after_page_older_than_cutoff() {
        let dated = |url: &str, day: u32| Candidate {
            url: url.into(),
            title: None,
            approximate_date: NaiveDate::from_ymd_opt(2024, 1, day),
        };
        let mut strategy = ScriptedStrategy::new(Bank::Fed, vec![]);
        strategy.pages = vec![
            Ok(vec![dated("new", 20), dated("old", 2)]),
            Ok(vec![dated("older", 1)]),
            Ok(vec![dated("never", 1)]),
        ];
        let ctx = context(MockFetcher::default());
        let known = HashSet::new();
        let cutoff = NaiveDate::from_ymd_opt(2024, 1, 10);
        let mut c = enumerate_candidates(&strategy, &ctx, &known, cutoff);
        assert_eq!(urls(&mut c), vec!["new", "old", "older"]);
        assert_eq!(strategy.listing_calls.get(), 2);
    }

    #[test]
    fn registry_covers_every_bank() {
        for bank in Bank::ALL {
            let s = for_bank(bank);
            assert_eq!(s.bank(), bank);
            assert_eq!(bank.iso3().len(), 3);
        }
        let codes: HashSet<_> = Bank::ALL.iter().map(|b| b.iso3()).collect();
        assert_eq!(codes.len(), Bank::ALL.len());
        assert_eq!(Bank::NewZealand.slug(), "new-zealand");
        assert_eq!(Bank::from_str("ecb", true).unwrap(), Bank::Ecb);
    }
}
