use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

use crate::error::ParseError;
use crate::extract::{ContentKind, ExtractedContent};
use crate::model::{Candidate, ParsedDocument};

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})-(\d{2})-(\d{2})\b").unwrap());
static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+((?:19|20)\d{2})\b").unwrap()
});
static MONTH_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+((?:19|20)\d{2})\b").unwrap()
});
static COMPACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(\d{2})(\d{2})(?:\D|$)").unwrap());

const TITLE_DATE_SCAN: usize = 600;

/// Keyword rule: a document gets `category` when any keyword occurs in its URL or title.
pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
}

// ── Dates ──

/// Best-effort publication date from free text, a feed timestamp or a URL.
pub fn find_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    if let Some(c) = ISO_RE.captures(trimmed) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }
    for c in DAY_MONTH_RE.captures_iter(trimmed) {
        if let Some(d) = month_number(&c[2]).and_then(|m| ymd_num(&c[3], m, &c[1])) {
            return Some(d);
        }
    }
    for c in MONTH_DAY_RE.captures_iter(trimmed) {
        if let Some(d) = month_number(&c[1]).and_then(|m| ymd_num(&c[3], m, &c[2])) {
            return Some(d);
        }
    }
    for c in COMPACT_RE.captures_iter(trimmed) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }
    None
}

/// Two-digit-year dates embedded in URLs (`ko240131a.htm`, `ecb.mp240125`).
/// `re` must capture yy, mm, dd as groups 1..=3.
pub fn short_url_date(re: &Regex, url: &str) -> Option<NaiveDate> {
    let c = re.captures(url)?;
    let yy: i32 = c[1].parse().ok()?;
    let year = if yy >= 90 { 1900 + yy } else { 2000 + yy };
    NaiveDate::from_ymd_opt(year, c[2].parse().ok()?, c[3].parse().ok()?)
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn ymd_num(y: &str, m: u32, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m, d.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let known = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    known
        .iter()
        .position(|m| *m == lower || (lower.len() >= 3 && m.starts_with(&lower) && lower.len() <= 4))
        .map(|i| i as u32 + 1)
}

// ── Categories ──

pub fn categorize(rules: &[CategoryRule], default: &str, haystacks: &[&str]) -> Vec<String> {
    let lowered: Vec<String> = haystacks.iter().map(|h| h.to_lowercase()).collect();
    let mut out: Vec<String> = rules
        .iter()
        .filter(|r| {
            r.keywords
                .iter()
                .any(|k| lowered.iter().any(|h| h.contains(k)))
        })
        .map(|r| r.category.to_string())
        .collect();
    out.dedup();
    if out.is_empty() {
        out.push(default.to_string());
    }
    out
}

// ── Listing pages ──

/// Document candidates among the anchors of a listing page, in page order.
pub fn candidates_from(
    content: &ExtractedContent,
    document_link: &Regex,
    url_date: Option<&Regex>,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    content
        .links
        .iter()
        .filter(|a| document_link.is_match(&a.url) && seen.insert(a.url.as_str()))
        .map(|a| {
            let approximate_date = a
                .date_hint
                .as_deref()
                .and_then(find_date)
                .or_else(|| find_date(&a.text))
                .or_else(|| url_date.and_then(|re| short_url_date(re, &a.url)))
                .or_else(|| find_date(&a.url));
            Candidate {
                url: a.url.clone(),
                title: Some(a.text.clone()).filter(|t| !t.is_empty()),
                approximate_date,
            }
        })
        .collect()
}

// ── Documents ──

/// Shared document parsing: text, date, categories and outbound links.
pub fn parse_document(
    candidate: &Candidate,
    content: ExtractedContent,
    rules: &[CategoryRule],
    default_category: &str,
) -> Result<ParsedDocument, ParseError> {
    if content.kind == ContentKind::Feed {
        return Err(ParseError::new(&candidate.url, "expected a document, got a feed"));
    }
    let text = content.text.trim().to_string();
    if text.is_empty() {
        return Err(ParseError::new(&candidate.url, "no text extracted"));
    }

    let head: String = text.chars().take(TITLE_DATE_SCAN).collect();
    let date = candidate
        .approximate_date
        .or_else(|| content.title.as_deref().and_then(find_date))
        .or_else(|| find_date(&head));

    let title = candidate.title.as_deref().unwrap_or("");
    let page_title = content.title.as_deref().unwrap_or("");
    let categories = categorize(rules, default_category, &[&candidate.url, title, page_title]);

    let links = content
        .links
        .into_iter()
        .filter(|a| a.url != candidate.url && a.url != content.url)
        .map(|a| (a.url, a.text))
        .collect();

    Ok(ParsedDocument {
        text,
        date_published: date.map(|d| d.format("%Y-%m-%d").to_string()),
        categories,
        links,
    })
}
