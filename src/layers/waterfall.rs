//! Open-access PDF resolution.
//!
//! Sources are tried in a fixed order:
//! 1. Semantic Scholar's own open-access URL
//! 2. arXiv, from the preprint id
//! 3. bioRxiv / medRxiv, from the DOI prefix
//! 4. ACL Anthology, from the anthology id
//! 5. Unpaywall, looked up by DOI and contact email
//!
//! The first source that returns bytes starting with `%PDF` wins.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::layers::PaperRecord;

pub const PDF_MAGIC: &[u8; 4] = b"%PDF";
pub const UNPAYWALL_BASE: &str = "https://api.unpaywall.org/v2";

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Fetches candidate URLs and keeps only real PDFs.
pub struct PdfFetcher {
    client: Client,
}

impl PdfFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!("Request to {} failed: {}", url, e);
                return None;
            }
        };
        if resp.status() != StatusCode::OK {
            tracing::debug!("{} returned {}", url, resp.status());
            return None;
        }
        match resp.bytes().await {
            Ok(body) if looks_like_pdf(&body) => Some(body.to_vec()),
            Ok(_) => {
                tracing::debug!("{} did not return a PDF", url);
                None
            }
            Err(e) => {
                tracing::debug!("Reading body from {} failed: {}", url, e);
                None
            }
        }
    }
}

/// One place a PDF might be found.
#[async_trait]
pub trait PdfSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>>;
}

pub fn arxiv_pdf_url(arxiv_id: &str) -> String {
    format!("https://arxiv.org/pdf/{}.pdf", arxiv_id)
}

pub fn acl_pdf_url(acl_id: &str) -> String {
    format!("https://aclanthology.org/{}.pdf", acl_id)
}

/// bioRxiv DOIs share the `10.1101/` prefix; medRxiv ones are recognised by
/// name.
pub fn preprint_pdf_url(doi: &str) -> Option<String> {
    if doi.starts_with("10.1101/") {
        Some(format!("https://www.biorxiv.org/content/{}v1.full.pdf", doi))
    } else if doi.contains("medrxiv") {
        Some(format!("https://www.medrxiv.org/content/{}v1.full.pdf", doi))
    } else {
        None
    }
}

pub struct OpenAccessUrl;

#[async_trait]
impl PdfSource for OpenAccessUrl {
    fn name(&self) -> &'static str {
        "S2"
    }

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>> {
        fetcher.fetch(paper.open_access_url.as_deref()?).await
    }
}

pub struct Arxiv;

#[async_trait]
impl PdfSource for Arxiv {
    fn name(&self) -> &'static str {
        "arXiv"
    }

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>> {
        let id = paper.external_ids.arxiv.as_deref()?;
        fetcher.fetch(&arxiv_pdf_url(id)).await
    }
}

pub struct Biorxiv;

#[async_trait]
impl PdfSource for Biorxiv {
    fn name(&self) -> &'static str {
        "bioRxiv"
    }

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>> {
        let url = preprint_pdf_url(paper.external_ids.doi.as_deref()?)?;
        fetcher.fetch(&url).await
    }
}

pub struct AclAnthology;

#[async_trait]
impl PdfSource for AclAnthology {
    fn name(&self) -> &'static str {
        "ACL"
    }

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>> {
        let id = paper.external_ids.acl.as_deref()?;
        fetcher.fetch(&acl_pdf_url(id)).await
    }
}

#[derive(Deserialize)]
struct UnpaywallResponse {
    best_oa_location: Option<OaLocation>,
}

#[derive(Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
}

pub struct Unpaywall {
    client: Client,
    base_url: String,
    email: String,
}

impl Unpaywall {
    pub fn new(email: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(UNPAYWALL_BASE, email)
    }

    pub fn with_base_url(base_url: impl Into<String>, email: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
        })
    }

    /// The best open-access PDF location Unpaywall knows for `doi`.
    pub async fn lookup(&self, doi: &str) -> Option<String> {
        if doi.is_empty() || self.email.is_empty() {
            return None;
        }
        let url = Url::parse_with_params(&format!("{}/{}", self.base_url, doi), &[("email", &self.email)]).ok()?;
        let resp = match self.client.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => resp,
            Ok(resp) => {
                tracing::debug!("Unpaywall returned {} for {}", resp.status(), doi);
                return None;
            }
            Err(e) => {
                tracing::debug!("Unpaywall lookup for {} failed: {}", doi, e);
                return None;
            }
        };
        let body: UnpaywallResponse = resp.json().await.ok()?;
        body.best_oa_location?.url_for_pdf.filter(|u| !u.is_empty())
    }
}

#[async_trait]
impl PdfSource for Unpaywall {
    fn name(&self) -> &'static str {
        "Unpaywall"
    }

    async fn attempt(&self, paper: &PaperRecord, fetcher: &PdfFetcher) -> Option<Vec<u8>> {
        let url = self.lookup(paper.external_ids.doi.as_deref()?).await?;
        fetcher.fetch(&url).await
    }
}

#[derive(Debug)]
pub struct ResolvedPdf {
    pub source: &'static str,
    pub bytes: Vec<u8>,
}

pub struct Waterfall {
    sources: Vec<Box<dyn PdfSource>>,
    fetcher: PdfFetcher,
}

impl Waterfall {
    pub fn new(sources: Vec<Box<dyn PdfSource>>, fetcher: PdfFetcher) -> Self {
        Self { sources, fetcher }
    }

    /// The standard five-source order, with Unpaywall keyed by `email`.
    pub fn standard(email: &str) -> anyhow::Result<Self> {
        let sources: Vec<Box<dyn PdfSource>> = vec![
            Box::new(OpenAccessUrl),
            Box::new(Arxiv),
            Box::new(Biorxiv),
            Box::new(AclAnthology),
            Box::new(Unpaywall::new(email)?),
        ];
        Ok(Self::new(sources, PdfFetcher::new()?))
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, paper: &PaperRecord) -> Option<ResolvedPdf> {
        tracing::debug!(paper_id = ?paper.paper_id, venue = ?paper.venue, "Resolving {:?}", paper.title);
        for source in &self.sources {
            if let Some(bytes) = source.attempt(paper, &self.fetcher).await {
                tracing::debug!(paper_id = ?paper.paper_id, "{} resolved {:?}", source.name(), paper.title);
                return Some(ResolvedPdf {
                    source: source.name(),
                    bytes,
                });
            }
        }
        None
    }
}
