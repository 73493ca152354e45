use strsim::levenshtein;

use crate::layers::discovery::{ApiError, SemanticScholarClient};
use crate::layers::PaperRecord;

/// Edit distance above which a search hit is reported as a doubtful match.
pub const DOUBTFUL_DISTANCE: usize = 10;

#[derive(Debug, Clone)]
pub struct TitleMatch {
    pub paper: PaperRecord,
    pub distance: usize,
}

impl TitleMatch {
    pub fn is_doubtful(&self) -> bool {
        self.distance > DOUBTFUL_DISTANCE
    }
}

/// Resolves free-text titles to a single metadata record.
pub struct Resolver<'a> {
    client: &'a SemanticScholarClient,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a SemanticScholarClient) -> Self {
        Self { client }
    }

    /// The API's top-ranked hit for `title`, scored against the requested
    /// title. Ranking is left to the API.
    pub async fn resolve(&self, title: &str) -> Result<Option<TitleMatch>, ApiError> {
        let found = self.client.search_title(title).await?;
        Ok(found.map(|paper| Self::score(title, paper)))
    }

    pub fn score(query_title: &str, paper: PaperRecord) -> TitleMatch {
        let distance = levenshtein(&query_title.to_lowercase(), &paper.title.to_lowercase());
        tracing::debug!("Candidate: {} (Distance: {})", paper.title, distance);
        if distance > DOUBTFUL_DISTANCE {
            tracing::warn!("Top hit {:?} is far from requested title {:?}", paper.title, query_title);
        }
        TitleMatch { paper, distance }
    }
}
