use chrono::NaiveDate;

/// A paper as returned by the metadata API, flattened to the fields the
/// pipeline needs. Lives only for the duration of one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperRecord {
    pub paper_id: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub publication_date: Option<NaiveDate>,
    pub citation_count: Option<u64>,
    pub venue: Option<String>,
    pub external_ids: ExternalIds,
    pub open_access_url: Option<String>,
}

impl PaperRecord {
    /// Authors for display, shortened to the first three plus "et al.".
    pub fn author_line(&self) -> String {
        match self.authors.len() {
            0 => "unknown authors".to_string(),
            n if n <= 3 => self.authors.join(", "),
            _ => format!("{} et al.", self.authors[..3].join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalIds {
    pub doi: Option<String>,
    pub arxiv: Option<String>,
    pub acl: Option<String>,
}

pub mod naming;
pub mod discovery;
pub mod resolution;
pub mod waterfall;
pub mod download;
pub mod convert;
pub mod selection;
pub mod prompt;
