use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::retry::RetryPolicy;

const CONFIG_FILE: &str = "cb_scraper";
const ENV_PREFIX: &str = "CB";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub http: HttpSettings,
    pub retry: RetryPolicy,
    pub crawl: CrawlSettings,
    pub bulk: BulkSettings,
    pub provenance: ProvenanceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    /// Prefix of the three tables: `<table>`, `<table>_categories`, `<table>_links`.
    pub table: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/central_banks.sqlite"),
            table: "central_bank_documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Pause between two consecutive requests on the shared session.
    pub request_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("cb_scraper/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            request_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub max_pages: usize,
    pub max_documents: Option<usize>,
    pub stop_at_known_date: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_documents: None,
            stop_at_known_date: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    /// 0 lets rayon size the pool from the number of CPUs.
    pub workers: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvenanceSettings {
    pub machine: Option<String>,
    pub ip: Option<String>,
}

impl Settings {
    /// Defaults, then `cb_scraper.toml` if present, then `CB_*` environment variables
    /// (`CB_DATABASE__PATH`, `CB_RETRY__MAX_ATTEMPTS`, ...).
    pub fn load() -> Result<Self> {
        Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
}
