use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpSettings;
use crate::error::FetchError;
use crate::extract::{self, ContentKind, ExtractedContent};
use crate::model::is_pdf_url;
use crate::retry::RetryPolicy;

/// URL in, text out.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<ExtractedContent, FetchError>;
}

/// One blocking HTTP session used sequentially, with a fixed pause between requests.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    delay: Duration,
    last_request: Cell<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(http: &HttpSettings, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            retry,
            delay: Duration::from_millis(http.request_delay_ms),
            last_request: Cell::new(None),
        })
    }

    fn throttle(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }

    fn fetch_once(&self, url: &Url) -> Result<ExtractedContent, FetchError> {
        self.throttle();
        let start = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().map_err(|e| request_error(url, e))?;
        debug!(
            url = %final_url,
            content_type = %content_type,
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );

        decode(&final_url, &content_type, &body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<ExtractedContent, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: format!("bad url: {e}"),
        })?;

        with_retry(&self.retry, || self.fetch_once(&parsed))
    }
}

/// Run `op` until it succeeds, fails for good, or `policy` runs out of attempts.
pub fn with_retry<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T, FetchError>) -> Result<T, FetchError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "{} (attempt {}/{}), backing off {:.1}s",
                    e,
                    attempt + 1,
                    policy.max_attempts,
                    backoff.as_secs_f64()
                );
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Which extractor a response body goes to. `content_type` is lower-cased.
fn content_kind(content_type: &str, url: &Url, body: &[u8]) -> Option<ContentKind> {
    let looks_like_pdf = body.starts_with(b"%PDF-") || is_pdf_url(url.as_str());
    let untyped = content_type.is_empty() || content_type.contains("octet-stream");
    if content_type.contains("pdf") || (untyped && looks_like_pdf) {
        return Some(ContentKind::Pdf);
    }
    let is_feed = content_type.contains("rss")
        || content_type.contains("atom")
        || (content_type.contains("xml") && !content_type.contains("xhtml"));
    if is_feed {
        return Some(ContentKind::Feed);
    }
    if content_type.contains("html") || content_type.is_empty() {
        return Some(ContentKind::Html);
    }
    None
}

fn decode(url: &Url, content_type: &str, body: &[u8]) -> Result<ExtractedContent, FetchError> {
    let parse_err = |message: String| FetchError::Parse {
        url: url.to_string(),
        message,
    };
    match content_kind(content_type, url, body) {
        Some(ContentKind::Pdf) => extract::from_pdf(url, body).map_err(|e| parse_err(e.to_string())),
        Some(ContentKind::Feed) => {
            extract::from_feed(url, &String::from_utf8_lossy(body)).map_err(|e| parse_err(e.to_string()))
        }
        Some(ContentKind::Html) => Ok(extract::from_html(url, &String::from_utf8_lossy(body))),
        None => Err(parse_err(format!("unsupported content type {content_type:?}"))),
    }
}

fn request_error(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else if e.is_decode() {
        FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
