use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::model::{CategoryRow, DocumentRow, LinkRow};

static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

type Result<T> = std::result::Result<T, StorageError>;

/// One document source: `<table>`, `<table>_categories` and `<table>_links`.
pub struct Store {
    conn: Connection,
    table: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendCounts {
    pub documents: usize,
    pub categories: usize,
    pub links: usize,
}

pub struct CountryStats {
    pub country_code: String,
    pub country_name: String,
    pub documents: usize,
    pub categories: usize,
    pub links: usize,
    pub latest_published: Option<String>,
}

impl Store {
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, table)
    }

    #[cfg(test)]
    pub fn open_in_memory(table: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        if !TABLE_NAME_RE.is_match(table) {
            return Err(StorageError::InvalidTable(table.to_string()));
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn,
            table: table.to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn categories_table(&self) -> String {
        format!("{}_categories", self.table)
    }

    fn links_table(&self) -> String {
        format!("{}_links", self.table)
    }

    fn init_schema(&self) -> Result<()> {
        let t = &self.table;
        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {t} (
                id               INTEGER PRIMARY KEY,
                file_url         TEXT NOT NULL,
                file_id          TEXT NOT NULL,
                date_published   TEXT,
                scraping_time    TEXT NOT NULL,
                country_code     TEXT NOT NULL,
                country_name     TEXT NOT NULL,
                extracted_text   TEXT,
                scraping_machine TEXT,
                scraping_ip      TEXT,
                UNIQUE(country_code, file_url)
            );
            CREATE INDEX IF NOT EXISTS idx_{t}_country ON {t}(country_code);

            CREATE TABLE IF NOT EXISTS {t}_categories (
                id            INTEGER PRIMARY KEY,
                country_code  TEXT NOT NULL,
                file_url      TEXT NOT NULL,
                category_name TEXT NOT NULL,
                UNIQUE(country_code, file_url, category_name),
                FOREIGN KEY (country_code, file_url) REFERENCES {t}(country_code, file_url)
            );

            CREATE TABLE IF NOT EXISTS {t}_links (
                id           INTEGER PRIMARY KEY,
                country_code TEXT NOT NULL,
                file_url     TEXT NOT NULL,
                link_url     TEXT NOT NULL,
                link_name    TEXT NOT NULL DEFAULT '',
                file_id      TEXT,
                UNIQUE(country_code, file_url, link_url),
                FOREIGN KEY (country_code, file_url) REFERENCES {t}(country_code, file_url)
            );
            CREATE INDEX IF NOT EXISTS idx_{t}_links_target ON {t}_links(link_url);
            "
        ))?;
        Ok(())
    }

    // ── Frontier queries ──

    pub fn existing_document_urls(&self, country_code: &str) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT file_url FROM {} WHERE country_code = ?1",
            self.table
        ))?;
        let rows = stmt
            .query_map([country_code], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(rows)
    }

    pub fn existing_category_pairs(&self, country_code: &str) -> Result<HashSet<(String, String)>> {
        let sql = format!(
            "SELECT file_url, category_name FROM {} WHERE country_code = ?1",
            self.categories_table()
        );
        self.pairs(&sql, country_code)
    }

    pub fn existing_link_pairs(&self, country_code: &str) -> Result<HashSet<(String, String)>> {
        let sql = format!(
            "SELECT file_url, link_url FROM {} WHERE country_code = ?1",
            self.links_table()
        );
        self.pairs(&sql, country_code)
    }

    fn pairs(&self, sql: &str, country_code: &str) -> Result<HashSet<(String, String)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([country_code], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent stored publication date. A skip-ahead hint only.
    pub fn latest_date_published(&self, country_code: &str) -> Result<Option<String>> {
        let latest = self.conn.query_row(
            &format!(
                "SELECT MAX(date_published) FROM {} WHERE country_code = ?1",
                self.table
            ),
            [country_code],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    // ── Writes ──

    /// Insert a whole crawl batch in one transaction. Any failure rolls back all three tables.
    pub fn atomic_append(
        &self,
        documents: &[DocumentRow],
        categories: &[CategoryRow],
        links: &[LinkRow],
    ) -> Result<AppendCounts> {
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = AppendCounts::default();
        {
            let mut d_stmt = tx.prepare(&format!(
                "INSERT INTO {}
                 (file_url, file_id, date_published, scraping_time, country_code,
                  country_name, extracted_text, scraping_machine, scraping_ip)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                self.table
            ))?;
            for d in documents {
                counts.documents += d_stmt.execute(params![
                    d.file_url,
                    d.file_id,
                    d.date_published,
                    d.scraping_time.to_rfc3339(),
                    d.country_code,
                    d.country_name,
                    d.extracted_text,
                    d.scraping_machine,
                    d.scraping_ip,
                ])?;
            }

            let mut c_stmt = tx.prepare(&format!(
                "INSERT INTO {} (country_code, file_url, category_name) VALUES (?1, ?2, ?3)",
                self.categories_table()
            ))?;
            for c in categories {
                counts.categories += c_stmt.execute(params![c.country_code, c.file_url, c.category_name])?;
            }

            let mut l_stmt = tx.prepare(&format!(
                "INSERT INTO {} (country_code, file_url, link_url, link_name, file_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.links_table()
            ))?;
            for l in links {
                counts.links += l_stmt.execute(params![
                    l.country_code,
                    l.file_url,
                    l.link_url,
                    l.link_name,
                    l.file_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(counts)
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<Vec<CountryStats>> {
        let mut by_country: BTreeMap<String, CountryStats> = BTreeMap::new();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT country_code, MAX(country_name), COUNT(*), MAX(date_published)
             FROM {} GROUP BY country_code",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(CountryStats {
                country_code: row.get(0)?,
                country_name: row.get(1)?,
                documents: row.get(2)?,
                categories: 0,
                links: 0,
                latest_published: row.get(3)?,
            })
        })?;
        for r in rows {
            let r = r?;
            by_country.insert(r.country_code.clone(), r);
        }

        for (child, is_links) in [(self.categories_table(), false), (self.links_table(), true)] {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT country_code, COUNT(*) FROM {child} GROUP BY country_code"
            ))?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?;
            for r in rows {
                let (code, n) = r?;
                if let Some(s) = by_country.get_mut(&code) {
                    if is_links {
                        s.links = n;
                    } else {
                        s.categories = n;
                    }
                }
            }
        }

        Ok(by_country.into_values().collect())
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(url: &str, country: &str) -> DocumentRow {
        DocumentRow {
            file_url: url.to_string(),
            file_id: crate::model::file_id(url),
            date_published: Some("2024-01-31".into()),
            scraping_time: Utc::now(),
            country_code: country.to_string(),
            country_name: "Testland".into(),
            extracted_text: "body".into(),
            scraping_machine: Some("host".into()),
            scraping_ip: None,
        }
    }

    fn cat(country: &str, url: &str, name: &str) -> CategoryRow {
        CategoryRow {
            country_code: country.into(),
            file_url: url.into(),
            category_name: name.into(),
        }
    }

    fn link(country: &str, url: &str, target: &str) -> LinkRow {
        LinkRow {
            country_code: country.into(),
            file_url: url.into(),
            link_url: target.into(),
            link_name: "anchor".into(),
            file_id: None,
        }
    }

    fn count(store: &Store, table: &str) -> usize {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(matches!(
            Store::open_in_memory("docs; DROP TABLE x"),
            Err(StorageError::InvalidTable(_))
        ));
        assert!(Store::open_in_memory("fed_docs").is_ok());
    }

    #[test]
    fn existing_keys_are_partitioned_by_country() {
        let store = Store::open_in_memory("docs").unwrap();
        store
            .atomic_append(
                &[doc("https://a/1", "USA"), doc("https://a/2", "CAN")],
                &[cat("USA", "https://a/1", "speech"), cat("CAN", "https://a/2", "press")],
                &[link("USA", "https://a/1", "https://a/1.pdf")],
            )
            .unwrap();

        let usa = store.existing_document_urls("USA").unwrap();
        assert_eq!(usa.len(), 1);
        assert!(usa.contains("https://a/1"));

        let cats = store.existing_category_pairs("USA").unwrap();
        assert!(cats.contains(&("https://a/1".to_string(), "speech".to_string())));
        assert!(!cats.contains(&("https://a/2".to_string(), "press".to_string())));

        assert_eq!(store.existing_link_pairs("USA").unwrap().len(), 1);
        assert!(store.existing_link_pairs("CAN").unwrap().is_empty());
    }

    #[test]
    fn append_counts_rows() {
        let store = Store::open_in_memory("docs").unwrap();
        let counts = store
            .atomic_append(
                &[doc("https://a/1", "USA")],
                &[cat("USA", "https://a/1", "speech"), cat("USA", "https://a/1", "policy")],
                &[link("USA", "https://a/1", "https://b")],
            )
            .unwrap();
        assert_eq!(
            counts,
            AppendCounts {
                documents: 1,
                categories: 2,
                links: 1
            }
        );
    }

    #[test]
    fn failure_mid_batch_leaves_no_rows() {
        let store = Store::open_in_memory("docs").unwrap();
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER fail_links BEFORE INSERT ON docs_links
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
            )
            .unwrap();

        let err = store
            .atomic_append(
                &[doc("https://a/1", "USA")],
                &[cat("USA", "https://a/1", "speech")],
                &[link("USA", "https://a/1", "https://b")],
            )
            .unwrap_err();
        assert!(!err.is_transient());

        assert_eq!(count(&store, "docs"), 0);
        assert_eq!(count(&store, "docs_categories"), 0);
        assert_eq!(count(&store, "docs_links"), 0);
    }

    #[test]
    fn duplicate_document_is_rejected_and_stored_once() {
        let store = Store::open_in_memory("docs").unwrap();
        store.atomic_append(&[doc("https://a/1", "USA")], &[], &[]).unwrap();
        let err = store
            .atomic_append(&[doc("https://a/2", "USA"), doc("https://a/1", "USA")], &[], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::Fatal(_)));
        assert_eq!(count(&store, "docs"), 1);
    }

    #[test]
    fn latest_date_and_stats() {
        let store = Store::open_in_memory("docs").unwrap();
        let mut old = doc("https://a/old", "USA");
        old.date_published = Some("2019-05-01".into());
        store
            .atomic_append(
                &[old, doc("https://a/new", "USA"), doc("https://b/1", "JPN")],
                &[cat("USA", "https://a/new", "speech")],
                &[link("USA", "https://a/new", "https://x"), link("USA", "https://a/old", "https://y")],
            )
            .unwrap();

        assert_eq!(store.latest_date_published("USA").unwrap().as_deref(), Some("2024-01-31"));
        assert_eq!(store.latest_date_published("NOR").unwrap(), None);

        let stats = store.stats().unwrap();
        assert_eq!(stats.len(), 2);
        let usa = stats.iter().find(|s| s.country_code == "USA").unwrap();
        assert_eq!((usa.documents, usa.categories, usa.links), (2, 1, 2));
        let jpn = stats.iter().find(|s| s.country_code == "JPN").unwrap();
        assert_eq!((jpn.documents, jpn.categories, jpn.links), (1, 0, 0));
    }

    #[test]
    fn same_url_is_independent_per_country() {
        let store = Store::open_in_memory("docs").unwrap();
        let url = "https://www.bis.org/review/r240131a.htm";
        store
            .atomic_append(&[doc(url, "USA")], &[cat("USA", url, "speech")], &[link("USA", url, "https://b")])
            .unwrap();

        assert!(store.existing_category_pairs("CAN").unwrap().is_empty());
        let counts = store
            .atomic_append(&[doc(url, "CAN")], &[cat("CAN", url, "speech")], &[link("CAN", url, "https://b")])
            .unwrap();
        assert_eq!((counts.documents, counts.categories, counts.links), (1, 1, 1));
        assert_eq!(store.existing_category_pairs("CAN").unwrap().len(), 1);
        assert_eq!(count(&store, "docs_categories"), 2);

        let stats = store.stats().unwrap();
        assert!(stats.iter().all(|s| (s.documents, s.categories, s.links) == (1, 1, 1)));
    }

    #[test]
    fn child_rows_need_a_stored_document() {
        let store = Store::open_in_memory("docs").unwrap();
        let err = store
            .atomic_append(&[doc("https://a/1", "USA")], &[cat("CAN", "https://a/1", "speech")], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::Fatal(_)));
        assert_eq!(count(&store, "docs"), 0);
    }
}
