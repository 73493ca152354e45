mod layers;

use crate::layers::convert::{convert_dir, ConvertOutcome};
use crate::layers::discovery::{RetryPolicy, SemanticScholarClient};
use crate::layers::download::{prioritize, Downloader, DEFAULT_PRIORITY_YEAR, DEFAULT_TITLES};
use crate::layers::prompt::{build, BuildOutcome, Cl100k, PromptRequest};
use crate::layers::resolution::Resolver;
use crate::layers::waterfall::Waterfall;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Contact address sent to Unpaywall when neither `--email` nor
/// `UNPAYWALL_EMAIL` is set.
pub const DEFAULT_CONTACT_EMAIL: &str = "citeprompt@users.noreply.github.com";

#[derive(Parser)]
#[command(name = "citeprompt", version, about = "Collect papers citing a seed work and pack them into one prompt")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download all open-access papers citing a DOI.
    Download(DownloadArgs),
    /// Download a fixed list of papers by title.
    DownloadSpecific(SpecificArgs),
    /// Convert downloaded PDFs to plain text.
    Convert(ConvertArgs),
    /// Combine converted papers into a single prompt file.
    BuildPrompt(PromptArgs),
}

#[derive(Args)]
struct ApiArgs {
    /// Semantic Scholar API key (falls back to SEMANTIC_SCHOLAR_API_KEY)
    #[arg(long = "api-key")]
    api_key: Option<String>,
    /// Contact email for Unpaywall (falls back to UNPAYWALL_EMAIL)
    #[arg(long)]
    email: Option<String>,
    /// Rate-limited attempts before giving up
    #[arg(long = "max-retries", default_value_t = 1000)]
    max_retries: u32,
    /// Seconds to wait after a rate-limit response
    #[arg(long = "backoff-secs", default_value_t = 15)]
    backoff_secs: u64,
}

impl ApiArgs {
    fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| env::var("SEMANTIC_SCHOLAR_API_KEY").ok())
    }

    fn email(&self) -> String {
        self.email
            .clone()
            .or_else(|| env::var("UNPAYWALL_EMAIL").ok())
            .unwrap_or_else(|| DEFAULT_CONTACT_EMAIL.to_string())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs(self.backoff_secs),
            max_attempts: self.max_retries.max(1),
            max_elapsed: None,
        }
    }
}

#[derive(Args)]
struct DownloadArgs {
    /// DOI of the seed paper, e.g. 10.1038/s41586-024-08328-6
    #[arg(long)]
    doi: String,
    #[command(flatten)]
    api: ApiArgs,
    /// Only download the first N papers after sorting
    #[arg(long)]
    top: Option<usize>,
    /// Folder to save PDFs
    #[arg(long = "out-dir", default_value = "pdfs")]
    out_dir: PathBuf,
    /// Papers from this year are downloaded first regardless of citations
    #[arg(long = "priority-year", default_value_t = DEFAULT_PRIORITY_YEAR)]
    priority_year: i32,
}

#[derive(Args)]
struct SpecificArgs {
    #[command(flatten)]
    api: ApiArgs,
    /// Folder to save PDFs
    #[arg(long = "out-dir", default_value = "pdfs_specific")]
    out_dir: PathBuf,
    /// File with one title per line, replacing the built-in list
    #[arg(long = "titles-file")]
    titles_file: Option<PathBuf>,
}

#[derive(Args)]
struct ConvertArgs {
    /// Folder containing PDFs
    #[arg(long = "pdf-dir", default_value = "pdfs")]
    pdf_dir: PathBuf,
    /// Folder to write .txt files
    #[arg(long = "txt-dir", default_value = "pdfs_txt")]
    txt_dir: PathBuf,
}

#[derive(Args)]
struct PromptArgs {
    /// Words to take from each paper
    #[arg(long = "n_words")]
    n_words: usize,
    /// Always include papers on or after this date (YYYY-MM-DD)
    #[arg(long = "priority_date")]
    priority_date: Option<String>,
    /// Minimum citation count for non-priority papers
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    citations: i64,
    /// Folder with .txt papers
    #[arg(long = "txt-dir", default_value = "pdfs_txt")]
    txt_dir: PathBuf,
    /// Randomly skip this percentage of selected papers (0-100)
    #[arg(long = "skip_percentage", default_value_t = 0.0)]
    skip_percentage: f64,
    /// Folder for the combined prompt
    #[arg(long = "out-dir", default_value = "paper_prompts")]
    out_dir: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Download(args) => download(args).await,
        Command::DownloadSpecific(args) => download_specific(args).await,
        Command::Convert(args) => convert(args),
        Command::BuildPrompt(args) => build_prompt(args),
    }
}

async fn download(args: DownloadArgs) -> Result<()> {
    let client = SemanticScholarClient::new(args.api.api_key(), args.api.retry_policy());

    // 1. Resolve the seed paper
    let seed = client.lookup_doi(&args.doi).await?;
    println!("Seed: {}", seed.title);
    println!("Total citations: {}\n", seed.citation_count);

    // 2. Walk the citation graph
    let mut papers = client.fetch_citations(&seed.paper_id).await?;

    // 3. Order and cap
    prioritize(&mut papers, args.priority_year);
    if let Some(top) = args.top {
        papers.truncate(top);
    }

    // 4. Download
    println!("\nDownloading {} papers to '{}'...\n", papers.len(), args.out_dir.display());
    let downloader = Downloader::new(&args.out_dir, Waterfall::standard(&args.api.email())?);
    let tally = downloader.download_all(&papers).await?;
    tally.print_summary(downloader.base_dir());
    Ok(())
}

fn read_titles(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

async fn download_specific(args: SpecificArgs) -> Result<()> {
    let titles = match &args.titles_file {
        Some(path) => read_titles(path)?,
        None => DEFAULT_TITLES.iter().map(|t| t.to_string()).collect(),
    };

    let client = SemanticScholarClient::new(args.api.api_key(), args.api.retry_policy());
    let resolver = Resolver::new(&client);
    let downloader = Downloader::new(&args.out_dir, Waterfall::standard(&args.api.email())?);

    println!("Searching & downloading {} papers to '{}'\n", titles.len(), args.out_dir.display());
    let tally = downloader.download_titles(&resolver, &titles).await?;
    tally.print_summary(downloader.base_dir());
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    match convert_dir(&args.pdf_dir, &args.txt_dir)? {
        ConvertOutcome::NoPdfs => println!("No PDFs found in '{}'.", args.pdf_dir.display()),
        ConvertOutcome::Finished(tally) => {
            println!("\n{}", "-".repeat(60));
            println!("Converted : {}", tally.converted);
            println!("Failed    : {}", tally.failed);
            println!("Skipped   : {}", tally.skipped);
            println!("Saved to  : {}", args.txt_dir.display());
        }
    }
    Ok(())
}

fn build_prompt(args: PromptArgs) -> Result<()> {
    let request = PromptRequest {
        txt_dir: args.txt_dir,
        out_dir: args.out_dir,
        n_words: args.n_words,
        priority_date: args.priority_date,
        min_citations: args.citations,
        skip_percentage: args.skip_percentage,
    };
    let counter = Cl100k::new()?;

    match build(&request, &counter, &mut rand::thread_rng())? {
        BuildOutcome::Aborted(reason) => println!("Error: {}", reason),
        BuildOutcome::Written { path, document } => {
            println!("Total tokens: {}", document.tokens);
            println!("Saved -> {}", path.display());
            println!("  Papers     : {}", document.papers);
            println!("  Tokens     : {}", document.tokens);
            println!("  Words/paper: {}", request.n_words);
        }
    }
    Ok(())
}
