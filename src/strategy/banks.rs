//! Per-bank crawl profiles: where the listings live, which anchors are documents,
//! and how documents are categorized.

use std::sync::LazyLock;

use regex::Regex;

use super::heuristics::CategoryRule;
use super::Bank;

pub struct BankProfile {
    pub bank: Bank,
    pub source: Source,
    pub document_link: &'static LazyLock<Regex>,
    /// Two-digit-year date embedded in document URLs, captured as (yy, mm, dd).
    pub url_date: Option<&'static LazyLock<Regex>>,
    pub categories: &'static [CategoryRule],
    pub default_category: &'static str,
}

pub enum Source {
    Listing(Pagination),
    Feed(&'static str),
}

pub enum Pagination {
    /// `{page}` is replaced by `first + page`.
    Numbered { template: &'static str, first: usize },
    /// One listing per calendar year, newest first; `{year}` is replaced.
    Yearly { template: &'static str, earliest: i32 },
}

impl Pagination {
    pub fn url_for(&self, page: usize, current_year: i32) -> Option<String> {
        match self {
            Pagination::Numbered { template, first } => {
                Some(template.replace("{page}", &(first + page).to_string()))
            }
            Pagination::Yearly { template, earliest } => {
                let year = current_year - i32::try_from(page).ok()?;
                (year >= *earliest).then(|| template.replace("{year}", &year.to_string()))
            }
        }
    }
}

const COMMON_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "monetary_policy",
        keywords: &["monetary", "policy rate", "interest rate", "cash rate", "rate decision", "fomc"],
    },
    CategoryRule {
        category: "speech",
        keywords: &["speech", "remarks", "address", "koen", "testimony"],
    },
    CategoryRule {
        category: "financial_stability",
        keywords: &["financial stability", "financial-stability", "macroprudential", "stress test"],
    },
    CategoryRule {
        category: "minutes",
        keywords: &["minutes", "summary of opinions", "account of the"],
    },
    CategoryRule {
        category: "report",
        keywords: &["report", "bulletin", "review", "outlook"],
    },
    CategoryRule {
        category: "markets",
        keywords: &["market operations", "foreign exchange", "liquidity", "repo"],
    },
];

const PRESS_RELEASE: &str = "press_release";

// ── Australia ──

static RBA_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.rba\.gov\.au/(media-releases|speeches)/\d{4}/[a-z]+-\d{2}-\d{2}\.html$").unwrap()
});

static AUSTRALIA: BankProfile = BankProfile {
    bank: Bank::Australia,
    source: Source::Listing(Pagination::Yearly {
        template: "https://www.rba.gov.au/media-releases/{year}/",
        earliest: 1998,
    }),
    document_link: &RBA_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: "media_release",
};

// ── Canada ──

static BOC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.bankofcanada\.ca/\d{4}/\d{2}/[a-z0-9-]+/$").unwrap()
});

static CANADA: BankProfile = BankProfile {
    bank: Bank::Canada,
    source: Source::Listing(Pagination::Numbered {
        template: "https://www.bankofcanada.ca/press/press-releases/?mt_page={page}",
        first: 1,
    }),
    document_link: &BOC_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: PRESS_RELEASE,
};

// ── Euro area ──

static ECB_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://www\.ecb\.europa\.eu/press/[^?#]+\.html$").unwrap());
static ECB_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(?:pr|mp|sp|is|in|ip|ds)(\d{2})(\d{2})(\d{2})").unwrap());

static ECB: BankProfile = BankProfile {
    bank: Bank::Ecb,
    source: Source::Feed("https://www.ecb.europa.eu/rss/press.html"),
    document_link: &ECB_LINK,
    url_date: Some(&ECB_DATE),
    categories: COMMON_RULES,
    default_category: PRESS_RELEASE,
};

// ── England ──

static BOE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://www\.bankofengland\.co\.uk/(news|speech|minutes|monetary-policy-summary-and-minutes|financial-stability-report|statement)/\d{4}/[^?#]+$",
    )
    .unwrap()
});

static ENGLAND: BankProfile = BankProfile {
    bank: Bank::England,
    source: Source::Feed("https://www.bankofengland.co.uk/rss/news"),
    document_link: &BOE_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: "news",
};

// ── United States ──

static FED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.federalreserve\.gov/newsevents/(pressreleases|speech|testimony)/[a-z0-9-]+\.htm$")
        .unwrap()
});

static FED: BankProfile = BankProfile {
    bank: Bank::Fed,
    source: Source::Feed("https://www.federalreserve.gov/feeds/press_all.xml"),
    document_link: &FED_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: PRESS_RELEASE,
};

// ── Japan ──

static BOJ_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.boj\.or\.jp/en/about/press/koen_\d{4}/ko\d{6}[a-z]?\.(htm|pdf)$").unwrap()
});
static BOJ_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/ko(\d{2})(\d{2})(\d{2})[a-z]?\.(?:htm|pdf)$").unwrap());

static JAPAN: BankProfile = BankProfile {
    bank: Bank::Japan,
    source: Source::Listing(Pagination::Yearly {
        template: "https://www.boj.or.jp/en/about/press/koen_{year}/index.htm",
        earliest: 2005,
    }),
    document_link: &BOJ_LINK,
    url_date: Some(&BOJ_DATE),
    categories: COMMON_RULES,
    default_category: "speech",
};

// ── Norway ──

static NORGES_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.norges-bank\.no/en/news-events/(news-publications|speeches)/[^?#]+$").unwrap()
});

static NORWAY: BankProfile = BankProfile {
    bank: Bank::Norway,
    source: Source::Listing(Pagination::Numbered {
        template: "https://www.norges-bank.no/en/news-events/news-publications/?page={page}",
        first: 1,
    }),
    document_link: &NORGES_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: "news",
};

// ── Sweden ──

static RIKSBANK_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://www\.riksbank\.se/en-gb/press-and-published/(notices-and-press-releases/press-releases|speeches-and-presentations)/\d{4}/[^?#]+$",
    )
    .unwrap()
});

static SWEDEN: BankProfile = BankProfile {
    bank: Bank::Sweden,
    source: Source::Listing(Pagination::Numbered {
        template: "https://www.riksbank.se/en-gb/press-and-published/notices-and-press-releases/press-releases/?page={page}",
        first: 1,
    }),
    document_link: &RIKSBANK_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: PRESS_RELEASE,
};

// ── Switzerland ──

static SNB_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.snb\.ch/en/publications/communication/(press-releases|speeches)[^?#]*/[^/?#]+$")
        .unwrap()
});

static SWITZERLAND: BankProfile = BankProfile {
    bank: Bank::Switzerland,
    source: Source::Feed("https://www.snb.ch/public/en/rss/news"),
    document_link: &SNB_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: PRESS_RELEASE,
};

// ── New Zealand ──

static RBNZ_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.rbnz\.govt\.nz/hub/(news|publications)/\d{4}/\d{2}/[^?#]+$").unwrap()
});

static NEW_ZEALAND: BankProfile = BankProfile {
    bank: Bank::NewZealand,
    source: Source::Listing(Pagination::Numbered {
        template: "https://www.rbnz.govt.nz/news-and-events/news?page={page}",
        first: 1,
    }),
    document_link: &RBNZ_LINK,
    url_date: None,
    categories: COMMON_RULES,
    default_category: "news",
};

pub fn profile(bank: Bank) -> &'static BankProfile {
    match bank {
        Bank::Australia => &AUSTRALIA,
        Bank::Canada => &CANADA,
        Bank::Ecb => &ECB,
        Bank::England => &ENGLAND,
        Bank::Fed => &FED,
        Bank::Japan => &JAPAN,
        Bank::Norway => &NORWAY,
        Bank::Sweden => &SWEDEN,
        Bank::Switzerland => &SWITZERLAND,
        Bank::NewZealand => &NEW_ZEALAND,
    }
}
