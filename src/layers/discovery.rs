use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::layers::{ExternalIds, PaperRecord};

pub const SEMANTIC_SCHOLAR_BASE: &str = "https://api.semanticscholar.org/graph/v1";
pub const PAPER_FIELDS: &str =
    "title,authors,year,publicationDate,citationCount,externalIds,venue,openAccessPdf";
const CITATION_PAGE_SIZE: usize = 1000;
const SEARCH_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error("Semantic Scholar API error: {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

/// How long to wait after a 429 and when to give up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: u32,
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(15),
            max_attempts: 1000,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` rate-limited tries
    /// that started at `started`.
    pub fn allows_retry(&self, attempts: u32, started: Instant) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        match self.max_elapsed {
            Some(limit) => started.elapsed() + self.backoff <= limit,
            None => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSPaper {
    paper_id: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    publication_date: Option<String>,
    citation_count: Option<u64>,
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<SSAuthor>,
    external_ids: Option<SSExternalIds>,
    open_access_pdf: Option<SSOpenAccessPdf>,
}

#[derive(Deserialize)]
struct SSAuthor {
    name: Option<String>,
}

#[derive(Deserialize)]
struct SSExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(rename = "ACL")]
    acl: Option<String>,
}

#[derive(Deserialize)]
struct SSOpenAccessPdf {
    url: Option<String>,
}

#[derive(Deserialize)]
struct SSCitationPage {
    #[serde(default)]
    data: Vec<SSCitation>,
    total: Option<usize>,
    next: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSCitation {
    citing_paper: SSPaper,
}

#[derive(Deserialize)]
struct SSSearchResult {
    #[serde(default)]
    data: Vec<SSPaper>,
}

/// Seed paper summary returned by a DOI lookup.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SeedPaper {
    pub paper_id: String,
    pub title: String,
    #[serde(default)]
    pub citation_count: u64,
}

impl SSPaper {
    fn into_record(self) -> PaperRecord {
        let ids = self.external_ids.map(|ids| ExternalIds {
            doi: ids.doi.filter(|s| !s.is_empty()),
            arxiv: ids.arxiv.filter(|s| !s.is_empty()),
            acl: ids.acl.filter(|s| !s.is_empty()),
        });
        PaperRecord {
            paper_id: self.paper_id,
            title: self.title.unwrap_or_default(),
            authors: self.authors.into_iter().filter_map(|a| a.name).collect(),
            year: self.year,
            publication_date: self
                .publication_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            citation_count: self.citation_count,
            venue: self.venue,
            external_ids: ids.unwrap_or_default(),
            open_access_url: self
                .open_access_pdf
                .and_then(|pdf| pdf.url)
                .filter(|u| !u.is_empty()),
        }
    }
}

pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    page_delay: Duration,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>, retry: RetryPolicy) -> Self {
        Self::with_base_url(SEMANTIC_SCHOLAR_BASE, api_key, retry)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            retry,
            page_delay: Duration::from_millis(500),
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Sends a GET, sleeping and retrying while the API answers 429.
    async fn get_with_retry(&self, url: &Url) -> Result<Response, ApiError> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut request = self.client.get(url.clone());
            if let Some(key) = &self.api_key {
                request = request.header("x-api-key", key);
            }
            let resp = request.send().await?;
            if resp.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(resp);
            }
            if !self.retry.allows_retry(attempts, started) {
                return Err(ApiError::RateLimited { attempts });
            }
            tracing::warn!(
                attempt = attempts,
                "Rate limited, waiting {}s...",
                self.retry.backoff.as_secs_f32()
            );
            tokio::time::sleep(self.retry.backoff).await;
        }
    }

    fn ensure_success(resp: Response) -> Result<Response, ApiError> {
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp)
    }

    /// Resolves a DOI to the Semantic Scholar paper id.
    pub async fn lookup_doi(&self, doi: &str) -> Result<SeedPaper, ApiError> {
        let mut url = Url::parse(&format!("{}/paper/DOI:{}", self.base_url, doi))?;
        url.query_pairs_mut()
            .append_pair("fields", "paperId,title,citationCount");
        tracing::info!("Looking up seed paper: {}", url);
        let resp = Self::ensure_success(self.get_with_retry(&url).await?)?;
        Ok(resp.json().await?)
    }

    /// Collects every paper citing `paper_id`, one page of up to 1000 at a
    /// time.
    pub async fn fetch_citations(&self, paper_id: &str) -> Result<Vec<PaperRecord>, ApiError> {
        let mut papers = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut url = Url::parse(&format!("{}/paper/{}/citations", self.base_url, paper_id))?;
            url.query_pairs_mut()
                .append_pair("fields", PAPER_FIELDS)
                .append_pair("limit", &CITATION_PAGE_SIZE.to_string())
                .append_pair("offset", &offset.to_string());

            tracing::debug!("Fetching citations page: {}", url);
            let resp = Self::ensure_success(self.get_with_retry(&url).await?)?;
            let page: SSCitationPage = resp.json().await?;
            if page.data.is_empty() {
                break;
            }

            offset += page.data.len();
            papers.extend(page.data.into_iter().map(|c| c.citing_paper.into_record()));

            let exhausted = match page.total {
                Some(total) => offset >= total,
                None => page.next.is_none(),
            };
            tracing::info!(fetched = papers.len(), total = ?page.total, "Fetched citations page");
            if exhausted {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }
        Ok(papers)
    }

    /// Returns the top-ranked search hit for `title`. Non-success statuses
    /// other than 429 are treated as "not found".
    pub async fn search_title(&self, title: &str) -> Result<Option<PaperRecord>, ApiError> {
        let url = Url::parse(&format!(
            "{}/paper/search?query={}&fields={}&limit={}",
            self.base_url,
            urlencoding::encode(title),
            PAPER_FIELDS,
            SEARCH_LIMIT
        ))?;

        tracing::info!("Querying Semantic Scholar: {}", url);
        let resp = self.get_with_retry(&url).await?;
        if !resp.status().is_success() {
            tracing::warn!("Search for {:?} returned {}", title, resp.status());
            return Ok(None);
        }
        let results: SSSearchResult = resp.json().await?;
        Ok(results.data.into_iter().next().map(SSPaper::into_record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::ZERO,
            max_attempts,
            max_elapsed: None,
        }
    }

    fn client(server: &mockito::Server, retry: RetryPolicy) -> SemanticScholarClient {
        SemanticScholarClient::with_base_url(server.url(), Some("key".to_string()), retry)
            .with_page_delay(Duration::ZERO)
    }

    #[test]
    fn test_retry_policy_bounds() {
        let policy = fast_retry(3);
        let now = Instant::now();
        assert!(policy.allows_retry(1, now));
        assert!(policy.allows_retry(2, now));
        assert!(!policy.allows_retry(3, now));

        let timed = RetryPolicy {
            backoff: Duration::from_secs(15),
            max_attempts: u32::MAX,
            max_elapsed: Some(Duration::from_secs(10)),
        };
        assert!(!timed.allows_retry(1, now));
    }

    #[test]
    fn test_paper_record_from_api_shape() {
        let raw = r#"{
            "paperId": "abc",
            "title": "A Paper",
            "year": 2025,
            "publicationDate": "2025-03-14",
            "citationCount": 12,
            "authors": [{"authorId": "1", "name": "Ada"}, {"authorId": null, "name": null}],
            "externalIds": {"DOI": "10.1/x", "ArXiv": "2501.00001", "CorpusId": 99},
            "openAccessPdf": {"url": "", "status": null}
        }"#;
        let paper = serde_json::from_str::<SSPaper>(raw).unwrap().into_record();
        assert_eq!(paper.paper_id.as_deref(), Some("abc"));
        assert_eq!(paper.title, "A Paper");
        assert_eq!(paper.authors, vec!["Ada".to_string()]);
        assert_eq!(paper.publication_date, NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(paper.external_ids.arxiv.as_deref(), Some("2501.00001"));
        assert_eq!(paper.external_ids.acl, None);
        assert_eq!(paper.open_access_url, None);
    }

    #[tokio::test]
    async fn test_fetch_citations_paginates_until_total() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .match_header("x-api-key", "key")
            .with_status(200)
            .with_body(r#"{"total": 3, "data": [
                {"citingPaper": {"title": "One", "citationCount": 1}},
                {"citingPaper": {"title": "Two", "citationCount": 2}}
            ]}"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::UrlEncoded("offset".into(), "2".into()))
            .with_status(200)
            .with_body(r#"{"total": 3, "data": [{"citingPaper": {"title": "Three"}}]}"#)
            .create_async()
            .await;

        let papers = client(&server, fast_retry(3)).fetch_citations("seed").await.unwrap();
        let titles: Vec<_> = papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_citations_follows_next_without_total() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(r#"{"offset": 0, "next": 1, "data": [{"citingPaper": {"title": "One"}}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::UrlEncoded("offset".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"offset": 1, "data": [{"citingPaper": {"title": "Two"}}]}"#)
            .create_async()
            .await;

        let papers = client(&server, fast_retry(3)).fetch_citations("seed").await.unwrap();
        assert_eq!(papers.len(), 2);
    }

    #[tokio::test]
    async fn test_hard_error_status_aborts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let err = client(&server, fast_retry(3)).fetch_citations("seed").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_rate_limit_retries_are_bounded() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let err = client(&server, fast_retry(3)).fetch_citations("seed").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { attempts: 3 }));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/paper/seed/citations")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total": 1, "data": [{"citingPaper": {"title": "After Backoff"}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let papers = client(&server, fast_retry(3)).fetch_citations("seed").await.unwrap();
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "After Backoff");
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_lookup_doi() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/paper/DOI:10.1038/s41586-024-08328-6")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"paperId": "p1", "title": "TabPFN", "citationCount": 321}"#)
            .create_async()
            .await;

        let seed = client(&server, fast_retry(1))
            .lookup_doi("10.1038/s41586-024-08328-6")
            .await
            .unwrap();
        assert_eq!(seed.paper_id, "p1");
        assert_eq!(seed.citation_count, 321);
    }

    #[tokio::test]
    async fn test_search_title_returns_top_hit_or_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/paper/search")
            .match_query(Matcher::UrlEncoded("query".into(), "Do-PFN".into()))
            .with_status(200)
            .with_body(r#"{"data": [{"title": "Do-PFN: first"}, {"title": "second"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/paper/search")
            .match_query(Matcher::UrlEncoded("query".into(), "missing".into()))
            .with_status(200)
            .with_body(r#"{"total": 0, "data": []}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/paper/search")
            .match_query(Matcher::UrlEncoded("query".into(), "broken".into()))
            .with_status(404)
            .create_async()
            .await;

        let c = client(&server, fast_retry(1));
        let top = c.search_title("Do-PFN").await.unwrap().unwrap();
        assert_eq!(top.title, "Do-PFN: first");
        assert!(c.search_title("missing").await.unwrap().is_none());
        assert!(c.search_title("broken").await.unwrap().is_none());
    }
}
