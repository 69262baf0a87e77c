use super::banks::BankProfile;
use super::heuristics;
use super::{Bank, CrawlStrategy};
use crate::engine::CrawlContext;
use crate::error::{FetchError, ParseError};
use crate::extract::{ContentKind, ExtractedContent};
use crate::model::{Candidate, ParsedDocument};

/// A single RSS/Atom feed; there is no page after the first.
pub struct FeedStrategy {
    profile: &'static BankProfile,
    feed_url: &'static str,
}

impl FeedStrategy {
    pub fn new(profile: &'static BankProfile, feed_url: &'static str) -> Self {
        Self { profile, feed_url }
    }
}

impl CrawlStrategy for FeedStrategy {
    fn bank(&self) -> Bank {
        self.profile.bank
    }

    fn listing_page(&self, ctx: &CrawlContext, page: usize) -> Result<Option<Vec<Candidate>>, FetchError> {
        if page > 0 {
            return Ok(None);
        }
        let content = ctx.fetcher.fetch(self.feed_url)?;
        if content.kind != ContentKind::Feed {
            return Err(FetchError::Parse {
                url: self.feed_url.to_string(),
                message: "feed URL did not return RSS or Atom".into(),
            });
        }
        Ok(Some(heuristics::candidates_from(
            &content,
            self.profile.document_link,
            self.profile.url_date.map(|re| &**re),
        )))
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
