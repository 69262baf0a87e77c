//! Offline PDF-to-text conversion for a directory of downloaded PDFs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::extract;

pub struct Extraction {
    pub path: PathBuf,
    pub result: std::result::Result<String, ExtractError>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub extracted: usize,
    pub failed: usize,
}

/// `*.pdf` files directly inside `dir`, sorted by path.
pub fn collect_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Extract every file on a pool of `workers` threads (0 = one per CPU).
/// The result at index `i` belongs to `paths[i]`.
pub fn extract_all(paths: &[PathBuf], workers: usize) -> Result<Vec<Extraction>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build extraction pool")?;
    info!("Extracting {} PDFs on {} threads", paths.len(), pool.current_num_threads());

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let results = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                let result = extract_file(path);
                pb.inc(1);
                Extraction {
                    path: path.clone(),
                    result,
                }
            })
            .collect::<Vec<_>>()
    });

    pb.finish_and_clear();
    Ok(results)
}

fn extract_file(path: &Path) -> std::result::Result<String, ExtractError> {
    let bytes = fs::read(path)?;
    extract::pdf_text(&bytes)
}

/// Write `<name>.txt` next to each successfully extracted PDF.
pub fn write_outputs(results: &[Extraction]) -> Result<BulkSummary> {
    let mut summary = BulkSummary::default();
    for e in results {
        match &e.result {
            Ok(text) => {
                let out = e.path.with_extension("txt");
                fs::write(&out, text).with_context(|| format!("Failed to write {}", out.display()))?;
                summary.extracted += 1;
            }
            Err(err) => {
                warn!("{}: {}", e.path.display(), err);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
