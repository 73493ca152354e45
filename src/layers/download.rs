use anyhow::Result;
use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, write};

use crate::layers::naming::{encode_record, slug, BULK_SLUG_LEN, TARGETED_SLUG_LEN};
use crate::layers::resolution::Resolver;
use crate::layers::waterfall::Waterfall;
use crate::layers::PaperRecord;

/// Titles fetched by `download-specific` when no list is supplied.
pub const DEFAULT_TITLES: &[&str] = &[
    "Do-PFN: In-Context Learning for Causal Effect Estimation",
    "CausalPFN: Amortized Causal Effect Estimation via In-Context Learning",
    "Foundation Models for Causal Inference via Prior-Data Fitted Networks",
    "FairPFN: A Tabular Foundation Model for Causal Fairness",
    "MapPFN: Learning Causal Perturbation Maps in Context",
    "Use What You Know: Causal Foundation Models with Partial Graphs",
    "Amortized Causal Discovery with Prior-Fitted Networks",
    "Integrating Causal Foundation Model in Prescriptive Maintenance Framework",
    "Position: Foundation Models for Tabular Data within Systemic Contexts Need Grounding",
];

pub const DEFAULT_PRIORITY_YEAR: i32 = 2026;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadTally {
    pub downloaded: usize,
    pub no_oa: usize,
    pub not_found: usize,
    pub skipped: usize,
}

impl DownloadTally {
    pub fn print_summary(&self, out_dir: &Path) {
        println!("\n{}", "-".repeat(60));
        println!("Downloaded  : {}", self.downloaded);
        println!("No OA found : {}", self.no_oa);
        if self.not_found > 0 {
            println!("Not found   : {}", self.not_found);
        }
        println!("Skipped     : {}", self.skipped);
        println!("Saved to    : {}", out_dir.display());
    }
}

/// Recent papers first, then most cited. Ties keep API order.
pub fn prioritize(papers: &mut [PaperRecord], priority_year: i32) {
    papers.sort_by(|a, b| {
        let key = |p: &PaperRecord| (p.year == Some(priority_year), p.citation_count.unwrap_or(0));
        key(b).cmp(&key(a))
    });
}

pub struct Downloader {
    base_dir: PathBuf,
    waterfall: Waterfall,
    pacing: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl Downloader {
    /// Downloads are paced to one PDF resolution per second.
    pub fn new(base_dir: impl Into<PathBuf>, waterfall: Waterfall) -> Self {
        Self::with_quota(base_dir, waterfall, Quota::per_second(nonzero!(1u32)))
    }

    pub fn with_quota(base_dir: impl Into<PathBuf>, waterfall: Waterfall, quota: Quota) -> Self {
        tracing::debug!(sources = ?waterfall.source_names(), "PDF source order");
        Self {
            base_dir: base_dir.into(),
            waterfall,
            pacing: RateLimiter::direct(quota),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves `paper` through the waterfall and writes it to `dest`.
    /// Returns the winning source, or `None` when no source had a PDF.
    async fn fetch_into(&self, paper: &PaperRecord, dest: &Path) -> Option<&'static str> {
        self.pacing.until_ready().await;
        let resolved = self.waterfall.resolve(paper).await?;
        match write(dest, &resolved.bytes).await {
            Ok(()) => Some(resolved.source),
            Err(e) => {
                tracing::error!("Failed to write {:?}: {}", dest, e);
                None
            }
        }
    }

    /// Bulk mode: every paper is named from its metadata.
    pub async fn download_all(&self, papers: &[PaperRecord]) -> Result<DownloadTally> {
        create_dir_all(&self.base_dir).await?;
        let mut tally = DownloadTally::default();
        let total = papers.len();

        for (i, paper) in papers.iter().enumerate() {
            let filename = format!("{}.pdf", encode_record(paper, BULK_SLUG_LEN));
            let dest = self.base_dir.join(&filename);

            if dest.exists() {
                println!("[{:>4}/{}] skip      {}", i + 1, total, filename);
                tally.skipped += 1;
                continue;
            }

            match self.fetch_into(paper, &dest).await {
                Some(source) => {
                    println!("[{:>4}/{}] ok ({:<10}) {}", i + 1, total, source, filename);
                    tally.downloaded += 1;
                }
                None => {
                    println!("[{:>4}/{}] no OA     {}", i + 1, total, filename);
                    tally.no_oa += 1;
                }
            }
        }
        Ok(tally)
    }

    /// Targeted mode: each title is searched, and the file is named after the
    /// requested title so existing downloads are skipped without a search.
    pub async fn download_titles(&self, resolver: &Resolver<'_>, titles: &[String]) -> Result<DownloadTally> {
        create_dir_all(&self.base_dir).await?;
        let mut tally = DownloadTally::default();
        let total = titles.len();

        for (i, title) in titles.iter().enumerate() {
            let dest = self.base_dir.join(format!("{}.pdf", slug(title, TARGETED_SLUG_LEN)));
            let shown = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

            if dest.exists() {
                println!("[{:>2}/{}] skip {}", i + 1, total, shown);
                tally.skipped += 1;
                continue;
            }

            println!("[{:>2}/{}] searching {}", i + 1, total, title);
            let found = match resolver.resolve(title).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!("Search for {:?} failed: {}", title, e);
                    None
                }
            };
            let Some(found) = found else {
                println!("           not found on Semantic Scholar");
                tally.not_found += 1;
                continue;
            };
            let note = if found.is_doubtful() { ", doubtful" } else { "" };
            println!("           found: {} (distance {}{})", found.paper.title, found.distance, note);
            println!("           by {}", found.paper.author_line());

            match self.fetch_into(&found.paper, &dest).await {
                Some(source) => {
                    println!("           ok ({}) saved as {}", source, shown);
                    tally.downloaded += 1;
                }
                None => {
                    println!("           no open-access PDF found");
                    tally.no_oa += 1;
                }
            }
        }
        Ok(tally)
    }
}
