//! Prompt assembly: truncate each selected paper, join them with a fixed
//! separator, count tokens and name the result after the parameters used.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tiktoken_rs::CoreBPE;

use crate::layers::selection::{sample, select, SelectionCriteria};

/// Placed between papers. Downstream consumers split on it, so it must not
/// change.
pub const SEPARATOR: &str = "\n\n=====\nNEW PAPER\n=====\n\n";
pub const ENCODING: &str = "cl100k_base";

pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` BPE counts.
pub struct Cl100k {
    bpe: CoreBPE,
}

impl Cl100k {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| anyhow!("failed to load {}: {}", ENCODING, e))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100k {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Unicode whitespace plus the ASCII information separators (U+001C..U+001F),
/// which PDF text extraction can leave between words.
fn is_word_break(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// First `n_words` whitespace-separated words of `text`, joined by single
/// spaces.
pub fn truncate_words(text: &str, n_words: usize) -> String {
    text.split(is_word_break)
        .filter(|w| !w.is_empty())
        .take(n_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads a file as UTF-8, dropping invalid byte sequences.
pub fn read_text_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    Ok(text)
}

pub fn output_name(
    n_words: usize,
    criteria: &SelectionCriteria,
    n_papers: usize,
    tokens: usize,
) -> String {
    let mut parts = vec![format!("w{}", n_words)];
    if let Some(date) = criteria.priority_date {
        parts.push(format!("from{}", date.format("%Y%m%d")));
    }
    parts.push(format!("cit{}", criteria.min_citations));
    if criteria.skip_percentage > 0.0 {
        parts.push(format!("skip{}pct", criteria.skip_percentage.trunc() as i64));
    }
    parts.push(format!("{}papers", n_papers));
    parts.push(format!("{}tok", tokens));
    format!("{}.txt", parts.join("_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDocument {
    pub text: String,
    pub tokens: usize,
    pub papers: usize,
    pub file_name: String,
}

/// Truncates and joins `files` in the order given.
pub fn assemble(
    files: &[PathBuf],
    words_per_file: usize,
    criteria: &SelectionCriteria,
    counter: &dyn TokenCounter,
) -> Result<PromptDocument> {
    let chunks = files
        .iter()
        .map(|p| read_text_lossy(p).map(|raw| truncate_words(&raw, words_per_file)))
        .collect::<Result<Vec<_>>>()?;

    let text = chunks.join(SEPARATOR);
    let tokens = counter.count(&text);
    let file_name = output_name(words_per_file, criteria, files.len(), tokens);
    Ok(PromptDocument {
        text,
        tokens,
        papers: files.len(),
        file_name,
    })
}

/// Conditions that stop a prompt build without writing anything.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("'{0}' not found. Run the convert step first.")]
    MissingDir(PathBuf),
    #[error("--priority_date must be YYYY-MM-DD, got '{0}'")]
    InvalidDate(String),
    #[error("No papers matched the given filters.")]
    NoMatches,
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub txt_dir: PathBuf,
    pub out_dir: PathBuf,
    pub n_words: usize,
    pub priority_date: Option<String>,
    pub min_citations: i64,
    pub skip_percentage: f64,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Written { path: PathBuf, document: PromptDocument },
    Aborted(PromptError),
}

pub fn parse_priority_date(raw: Option<&str>) -> Result<Option<NaiveDate>, PromptError> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| PromptError::InvalidDate(s.to_string()))
    })
    .transpose()
}

/// Runs select, sample, assemble and write for one request.
pub fn build<R: Rng + ?Sized>(
    request: &PromptRequest,
    counter: &dyn TokenCounter,
    rng: &mut R,
) -> Result<BuildOutcome> {
    if !request.txt_dir.exists() {
        return Ok(BuildOutcome::Aborted(PromptError::MissingDir(request.txt_dir.clone())));
    }

    let priority_date = match parse_priority_date(request.priority_date.as_deref()) {
        Ok(date) => date,
        Err(e) => return Ok(BuildOutcome::Aborted(e)),
    };
    let criteria = SelectionCriteria {
        priority_date,
        min_citations: request.min_citations,
        skip_percentage: request.skip_percentage,
    };

    let mut papers = select(&request.txt_dir, &criteria)?;
    if papers.is_empty() {
        return Ok(BuildOutcome::Aborted(PromptError::NoMatches));
    }
    println!(
        "Selected {} papers (priority_date={}, min_citations={})",
        papers.len(),
        priority_date.map(|d| d.to_string()).unwrap_or_else(|| "None".to_string()),
        criteria.min_citations
    );

    if criteria.skip_percentage > 0.0 {
        papers = sample(papers, criteria.skip_percentage, rng);
        println!(
            "After {}% random skip: {} papers remain",
            criteria.skip_percentage,
            papers.len()
        );
    }

    let document = assemble(&papers, request.n_words, &criteria, counter)?;
    tracing::info!(tokens = document.tokens, papers = document.papers, "Assembled prompt");

    fs::create_dir_all(&request.out_dir)
        .with_context(|| format!("failed to create {}", request.out_dir.display()))?;
    let path = request.out_dir.join(&document.file_name);
    fs::write(&path, &document.text).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(BuildOutcome::Written { path, document })
}
