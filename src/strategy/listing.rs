use chrono::{Datelike, Utc};

use super::banks::{BankProfile, Pagination};
use super::heuristics;
use super::{Bank, CrawlStrategy};
use crate::engine::CrawlContext;
use crate::error::{FetchError, ParseError};
use crate::extract::ExtractedContent;
use crate::model::{Candidate, ParsedDocument};

/// Paginated HTML index pages.
pub struct ListingStrategy {
    profile: &'static BankProfile,
    pagination: &'static Pagination,
}

impl ListingStrategy {
    pub fn new(profile: &'static BankProfile, pagination: &'static Pagination) -> Self {
        Self { profile, pagination }
    }
}

impl CrawlStrategy for ListingStrategy {
    fn bank(&self) -> Bank {
        self.profile.bank
    }

    fn listing_page(&self, ctx: &CrawlContext, page: usize) -> Result<Option<Vec<Candidate>>, FetchError> {
        let Some(url) = self.pagination.url_for(page, Utc::now().year()) else {
            return Ok(None);
        };
        let content = ctx.fetcher.fetch(&url)?;
        Ok(Some(heuristics::candidates_from(
            &content,
            self.profile.document_link,
            self.profile.url_date.map(|re| &**re),
        )))
    }

    fn empty_page_ends_listing(&self) -> bool {
        !matches!(self.pagination, Pagination::Yearly { .. })
    }

    fn parse(&self, candidate: &Candidate, content: ExtractedContent) -> Result<ParsedDocument, ParseError> {
        heuristics::parse_document(
            candidate,
            content,
            self.profile.categories,
            self.profile.default_category,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{context, MockFetcher};
    use crate::extract::{Anchor, ContentKind};
    use crate::strategy::{banks, enumerate_candidates};
    use std::collections::HashSet;

    fn html(url: &str, links: Vec<Anchor>) -> ExtractedContent {
        ExtractedContent {
            url: url.into(),
            kind: ContentKind::Html,
            title: None,
            text: String::new(),
            links,
        }
    }

    fn listing_strategy(bank: Bank) -> ListingStrategy {
        let profile = banks::profile(bank);
        let banks::Source::Listing(pagination) = &profile.source else {
            panic!("{bank:?} is a listing source");
        };
        ListingStrategy::new(profile, pagination)
    }

    #[test]
    fn empty_current_year_does_not_end_the_archive() {
        let year = Utc::now().year();
        let this_year = format!("https://www.rba.gov.au/media-releases/{year}/");
        let last_year = format!("https://www.rba.gov.au/media-releases/{}/", year - 1);
        let release = format!("https://www.rba.gov.au/media-releases/{}/mr-{:02}-01.html", year - 1, (year - 1) % 100);
        let fetcher = MockFetcher::default()
            .with_page(&this_year, html(&this_year, Vec::new()))
            .with_page(
                &last_year,
                html(
                    &last_year,
                    vec![Anchor {
                        url: release.clone(),
                        text: "Statement by the Governor".into(),
                        date_hint: None,
                    }],
                ),
            );
        let mut ctx = context(fetcher);
        ctx.settings.max_pages = 2;
        let strategy = listing_strategy(Bank::Australia);
        assert!(!strategy.empty_page_ends_listing());

        let known = HashSet::new();
        let found: Vec<String> = enumerate_candidates(&strategy, &ctx, &known, None)
            .map(|c| c.url)
            .collect();
        assert_eq!(found, vec![release]);
    }

    #[test]
    fn yearly_listing_ends_before_earliest_year() {
        let strategy = listing_strategy(Bank::Japan);
        let ctx = context(MockFetcher::default());
        let past_earliest = (Utc::now().year() - 2005 + 1) as usize;
        assert!(strategy.listing_page(&ctx, past_earliest).unwrap().is_none());
        assert!(listing_strategy(Bank::Canada).empty_page_ends_listing());
    }

    #[test]
    fn first_listing_page_is_fetched_and_filtered() {
        let profile = banks::profile(Bank::Canada);
        let banks::Source::Listing(pagination) = &profile.source else {
            panic!("Canada is a listing source");
        };
        let strategy = ListingStrategy::new(profile, pagination);

        let listing = "https://www.bankofcanada.ca/press/press-releases/?mt_page=1";
        let fetcher = MockFetcher::default().with_page(
            listing,
            ExtractedContent {
                url: listing.into(),
                kind: ContentKind::Html,
                title: Some("Press releases".into()),
                text: String::new(),
                links: vec![
                    Anchor {
                        url: "https://www.bankofcanada.ca/2024/01/policy-rate-announcement/".into(),
                        text: "Bank of Canada maintains policy rate January 24, 2024".into(),
                        date_hint: None,
                    },
                    Anchor {
                        url: "https://www.bankofcanada.ca/press/press-releases/?mt_page=2".into(),
                        text: "Next".into(),
                        date_hint: None,
                    },
                ],
            },
        );
        let ctx = context(fetcher);

        let candidates = strategy.listing_page(&ctx, 0).unwrap().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].approximate_date,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 24)
        );

        let err = strategy.listing_page(&ctx, 1).unwrap_err();
        assert_eq!(err.reason(), "http_error");
    }
}
