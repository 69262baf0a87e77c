use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::error::ExtractError;
use crate::model::normalize_url;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Pdf,
    Feed,
}

/// An outbound reference found in fetched content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub url: String,
    pub text: String,
    /// Date carried by the source itself (feed `pubDate`/`updated`).
    pub date_hint: Option<String>,
}

/// Plain text plus the anchors needed for link extraction, whatever the source format.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub url: String,
    pub kind: ContentKind,
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<Anchor>,
}

// ── HTML ──

pub fn from_html(url: &Url, html: &str) -> ExtractedContent {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|t| collapse(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let text = match doc.select(&BODY_SEL).next() {
        Some(body) => visible_text(body),
        None => visible_text(doc.root_element()),
    };

    let mut seen = HashSet::new();
    let links = doc
        .select(&ANCHOR_SEL)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let target = normalize_url(Some(url), href)?;
            if !seen.insert(target.clone()) {
                return None;
            }
            Some(Anchor {
                url: target,
                text: collapse(&a.text().collect::<String>()),
                date_hint: None,
            })
        })
        .collect();

    ExtractedContent {
        url: url.to_string(),
        kind: ContentKind::Html,
        title,
        text,
        links,
    }
}

/// Text nodes under `root`, skipping scripts and styles, one line per node.
fn visible_text(root: ElementRef) -> String {
    let mut lines = Vec::new();
    for node in root.descendants() {
        let Node::Text(t) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let line = collapse(t);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn collapse(s: &str) -> String {
    SPACES_RE.replace_all(s, " ").trim().to_string()
}

// ── PDF ──

/// Text of every page, in page order.
pub fn pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed files
    let result = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match result {
        Ok(Ok(text)) => Ok(BLANKS_RE.replace_all(text.trim(), "\n\n").to_string()),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("extractor panicked".into())),
    }
}

pub fn from_pdf(url: &Url, bytes: &[u8]) -> Result<ExtractedContent, ExtractError> {
    Ok(ExtractedContent {
        url: url.to_string(),
        kind: ContentKind::Pdf,
        title: None,
        text: pdf_text(bytes)?,
        links: Vec::new(),
    })
}

// ── RSS / Atom ──

#[derive(Default)]
struct FeedItem {
    title: String,
    link: Option<String>,
    date: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Title,
    Link,
    Date,
}

/// Parse `<item>` (RSS) and `<entry>` (Atom) elements into anchors.
pub fn from_feed(url: &Url, xml: &str) -> Result<ExtractedContent, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field = Field::None;
    let mut feed_title: Option<String> = None;
    let mut in_channel_title = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" | b"entry" => current = Some(FeedItem::default()),
                b"title" if current.is_some() => field = Field::Title,
                b"title" if feed_title.is_none() => in_channel_title = true,
                b"link" if current.is_some() => {
                    field = Field::Link;
                    atom_href(&e, &mut current);
                }
                b"pubDate" | b"updated" | b"published" | b"date" if current.is_some() => {
                    field = Field::Date
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"link" => atom_href(&e, &mut current),
            Event::Text(e) => {
                let text = e.unescape()?.trim().to_string();
                if in_channel_title {
                    feed_title = Some(text);
                } else if let Some(item) = current.as_mut() {
                    push_field(item, field, text);
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                if let Some(item) = current.as_mut() {
                    push_field(item, field, text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
                b"title" => {
                    in_channel_title = false;
                    field = Field::None;
                }
                _ => field = Field::None,
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut seen = HashSet::new();
    let links: Vec<Anchor> = items
        .into_iter()
        .filter_map(|item| {
            let target = normalize_url(Some(url), item.link.as_deref()?)?;
            if !seen.insert(target.clone()) {
                return None;
            }
            Some(Anchor {
                url: target,
                text: collapse(&item.title),
                date_hint: item.date,
            })
        })
        .collect();

    let text = links.iter().map(|a| a.text.as_str()).collect::<Vec<_>>().join("\n");
    Ok(ExtractedContent {
        url: url.to_string(),
        kind: ContentKind::Feed,
        title: feed_title,
        text,
        links,
    })
}

fn atom_href(e: &quick_xml::events::BytesStart, current: &mut Option<FeedItem>) {
    let Some(item) = current.as_mut() else {
        return;
    };
    if item.link.is_some() {
        return;
    }
    let href = e
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"href")
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()));
    if href.is_some() {
        item.link = href;
    }
}

fn push_field(item: &mut FeedItem, field: Field, text: String) {
    if text.is_empty() {
        return;
    }
    match field {
        Field::Title => item.title.push_str(&text),
        Field::Link if item.link.is_none() => item.link = Some(text),
        Field::Date if item.date.is_none() => item.date = Some(text),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.bankofcanada.ca/press/").unwrap()
    }

    #[test]
    fn html_text_skips_scripts_and_collects_anchors() {
        let html = r#"<html><head><title> Press
            releases </title><style>.x{}</style></head>
            <body><h1>Monetary   policy</h1>
            <script>var tracking = 1;</script>
            <p>Rates unchanged.</p>
            <a href="/2024/01/rate-decision/">Rate   decision</a>
            <a href="/2024/01/rate-decision/#details">again</a>
            <a href="mailto:info@bank.ca">mail</a>
            <a href="https://other.org/report.pdf">PDF</a>
            </body></html>"#;
        let c = from_html(&base(), html);
        assert_eq!(c.kind, ContentKind::Html);
        assert_eq!(c.title.as_deref(), Some("Press releases"));
        assert!(c.text.contains("Monetary policy"));
        assert!(c.text.contains("Rates unchanged."));
        assert!(!c.text.contains("tracking"));
        assert_eq!(c.links.len(), 2);
        assert_eq!(c.links[0].url, "https://www.bankofcanada.ca/2024/01/rate-decision/");
        assert_eq!(c.links[0].text, "Rate decision");
        assert_eq!(c.links[1].url, "https://other.org/report.pdf");
    }

    #[test]
    fn rss_items_become_anchors() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>Press releases</title>
            <item><title>FOMC statement</title>
              <link>https://www.federalreserve.gov/newsevents/pressreleases/monetary20240131a.htm</link>
              <pubDate>Wed, 31 Jan 2024 19:00:00 GMT</pubDate></item>
            <item><title><![CDATA[Minutes & notes]]></title>
              <link>/newsevents/pressreleases/monetary20240221a.htm</link></item>
            </channel></rss>"#;
        let url = Url::parse("https://www.federalreserve.gov/feeds/press_all.xml").unwrap();
        let c = from_feed(&url, xml).unwrap();
        assert_eq!(c.kind, ContentKind::Feed);
        assert_eq!(c.title.as_deref(), Some("Press releases"));
        assert_eq!(c.links.len(), 2);
        assert_eq!(c.links[0].text, "FOMC statement");
        assert_eq!(c.links[0].date_hint.as_deref(), Some("Wed, 31 Jan 2024 19:00:00 GMT"));
        assert_eq!(c.links[1].text, "Minutes & notes");
        assert_eq!(
            c.links[1].url,
            "https://www.federalreserve.gov/newsevents/pressreleases/monetary20240221a.htm"
        );
    }

    #[test]
    fn atom_entries_use_href() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>News</title>
            <entry><title>Speech</title><link href="https://www.snb.ch/en/speech-1"/>
            <updated>2024-03-01T10:00:00Z</updated></entry></feed>"#;
        let url = Url::parse("https://www.snb.ch/feed").unwrap();
        let c = from_feed(&url, xml).unwrap();
        assert_eq!(c.links.len(), 1);
        assert_eq!(c.links[0].url, "https://www.snb.ch/en/speech-1");
        assert_eq!(c.links[0].date_hint.as_deref(), Some("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn garbage_pdf_is_an_error() {
        assert!(matches!(pdf_text(b"not a pdf"), Err(ExtractError::Pdf(_))));
    }
}
