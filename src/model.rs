use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use url::Url;

// ── Stored rows ──

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub file_url: String,
    pub file_id: String,
    pub date_published: Option<String>,
    pub scraping_time: DateTime<Utc>,
    pub country_code: String,
    pub country_name: String,
    pub extracted_text: String,
    pub scraping_machine: Option<String>,
    pub scraping_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub country_code: String,
    pub file_url: String,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub country_code: String,
    pub file_url: String,
    pub link_url: String,
    pub link_name: String,
    pub file_id: Option<String>,
}

// ── Crawl intermediates ──

/// A document URL discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub title: Option<String>,
    pub approximate_date: Option<NaiveDate>,
}

#[cfg(test)]
impl Candidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            approximate_date: None,
        }
    }
}

/// What a strategy extracts from one fetched document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub text: String,
    pub date_published: Option<String>,
    pub categories: Vec<String>,
    /// (link_url, link_name)
    pub links: Vec<(String, String)>,
}

// ── URL identity ──

/// Resolve `raw` against `base`, drop the fragment and re-serialize.
/// Only http(s) URLs survive.
pub fn normalize_url(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = match base {
        Some(b) => b.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Stable identifier derived from the normalized URL.
pub fn file_id(url: &str) -> String {
    let normalized = normalize_url(None, url).unwrap_or_else(|| url.trim().to_string());
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..16])
}

pub fn is_pdf_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".pdf")
}
