//! Paper selection for prompt building.
//!
//! A paper is included when it is recent enough (on or after the priority
//! date) or, failing that, cited often enough. Recency wins over citations:
//! a new paper with zero citations is still included.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::layers::naming::{date_string_to_date, decode};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCriteria {
    pub priority_date: Option<NaiveDate>,
    pub min_citations: i64,
    /// Share of the selection to drop at random, in percent.
    pub skip_percentage: f64,
}

impl SelectionCriteria {
    pub fn admits(&self, file_name: &str) -> bool {
        let decoded = decode(file_name);
        if decoded.is_fallback() {
            tracing::debug!("No metadata in {:?}, treating as undated and uncited", file_name);
        }
        let meta = decoded.into_inner();
        let published = date_string_to_date(&meta.date).into_inner();
        match self.priority_date {
            Some(priority) if published >= priority => true,
            _ => meta.citations >= self.min_citations,
        }
    }
}

/// `*.txt` files directly inside `dir`, in lexicographic filename order.
pub fn list_texts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut texts: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    texts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(texts)
}

/// Files in `dir` that pass `criteria`, in filename order. Sampling is a
/// separate step, see [`sample`].
pub fn select(dir: &Path, criteria: &SelectionCriteria) -> Result<Vec<PathBuf>> {
    let selected = list_texts(dir)?
        .into_iter()
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            let keep = criteria.admits(&name);
            tracing::debug!(file = %name, keep, "Selection");
            keep
        })
        .collect();
    Ok(selected)
}

/// Number of papers kept after dropping `skip_percentage` percent of `n`.
/// Never below one; a NaN percentage keeps one.
pub fn keep_count(n: usize, skip_percentage: f64) -> usize {
    if skip_percentage.is_nan() {
        return 1;
    }
    let keep_ratio = 1.0 - skip_percentage / 100.0;
    let kept = (n as f64 * keep_ratio).trunc();
    if kept < 1.0 {
        1
    } else {
        kept as usize
    }
}

/// Randomly drops `skip_percentage` percent of `papers`. The result comes in
/// sampling order, not filename order.
pub fn sample<R: Rng + ?Sized>(papers: Vec<PathBuf>, skip_percentage: f64, rng: &mut R) -> Vec<PathBuf> {
    if skip_percentage.is_nan() || skip_percentage <= 0.0 || papers.is_empty() {
        return papers;
    }
    let amount = keep_count(papers.len(), skip_percentage);
    papers.choose_multiple(rng, amount).cloned().collect()
}
