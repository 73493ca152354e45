//! Filename metadata codec.
//!
//! Downloaded papers carry their metadata in the filename:
//! `<year>_<YYYYMMDD>_<citations:05>_<slug>`. The prompt builder reads the
//! date and citation count back out of the converted `.txt` names.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

use crate::layers::PaperRecord;

/// Slug length used by the bulk (citation graph) downloader.
pub const BULK_SLUG_LEN: usize = 60;
/// Slug length used by the targeted (title list) downloader.
pub const TARGETED_SLUG_LEN: usize = 80;

pub const SENTINEL_DATE: &str = "00000000";

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Result of a lenient parse: either the parsed value or the sentinel that
/// stands in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<T> {
    Parsed(T),
    Fallback(T),
}

impl<T> Decoded<T> {
    pub fn into_inner(self) -> T {
        match self {
            Decoded::Parsed(v) | Decoded::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Raw `YYYYMMDD` segment, not validated.
    pub date: String,
    pub citations: i64,
}

impl FileMetadata {
    fn sentinel() -> Self {
        Self {
            date: SENTINEL_DATE.to_string(),
            citations: 0,
        }
    }
}

pub fn slug(title: &str, max_len: usize) -> String {
    let title = if title.is_empty() { "untitled" } else { title };
    let cleaned = UNSAFE_CHARS.replace_all(title, "");
    let joined = WHITESPACE_RUN.replace_all(&cleaned, "_");
    joined.trim_matches('_').chars().take(max_len).collect()
}

/// Builds `<year>_<YYYYMMDD>_<citations:05>_<slug>` without an extension.
///
/// A missing year renders as `0000`; a missing publication date renders as
/// `<year>0000`.
pub fn encode(
    title: &str,
    year: Option<i32>,
    date: Option<NaiveDate>,
    citations: Option<u64>,
    max_len: usize,
) -> String {
    let year = year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "0000".to_string());
    let date = date
        .map(|d| format!("{:04}{:02}{:02}", d.year(), d.month(), d.day()))
        .unwrap_or_else(|| format!("{}0000", year));
    format!(
        "{}_{}_{:05}_{}",
        year,
        date,
        citations.unwrap_or(0),
        slug(title, max_len)
    )
}

pub fn encode_record(paper: &PaperRecord, max_len: usize) -> String {
    encode(
        &paper.title,
        paper.year,
        paper.publication_date,
        paper.citation_count,
        max_len,
    )
}

/// Reads the date string and citation count out of an encoded filename.
/// Anything short of three segments with an integer third segment falls back
/// to `("00000000", 0)` as a whole.
pub fn decode(file_name: &str) -> Decoded<FileMetadata> {
    let parts: Vec<&str> = file_name.split('_').collect();
    if parts.len() < 3 {
        return Decoded::Fallback(FileMetadata::sentinel());
    }
    match parts[2].parse::<i64>() {
        Ok(citations) => Decoded::Parsed(FileMetadata {
            date: parts[1].to_string(),
            citations,
        }),
        Err(_) => Decoded::Fallback(FileMetadata::sentinel()),
    }
}

/// Parses the first 4/2/2 characters of `s` as year/month/day. Anything that
/// is not a real calendar date maps to `NaiveDate::MIN`, so it sorts as the
/// oldest possible paper.
pub fn date_string_to_date(s: &str) -> Decoded<NaiveDate> {
    let field = |start: usize, end: usize| -> Option<u32> {
        s.get(start..end.min(s.len()))
            .and_then(|part| part.parse::<u32>().ok())
    };

    let parsed = field(0, 4)
        .zip(field(4, 6))
        .zip(field(6, 8))
        .filter(|((year, _), _)| (1..=9999).contains(year))
        .and_then(|((year, month), day)| NaiveDate::from_ymd_opt(year as i32, month, day));

    match parsed {
        Some(date) => Decoded::Parsed(date),
        None => Decoded::Fallback(NaiveDate::MIN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_slug_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(
            slug("  Attention: Is All   You Need?! ", 60),
            "Attention_Is_All_You_Need"
        );
        assert_eq!(slug("Do-PFN: In-Context", 60), "Do-PFN_In-Context");
    }

    #[test]
    fn test_slug_truncates_and_defaults() {
        let long = "word ".repeat(40);
        assert_eq!(slug(&long, 60).chars().count(), 60);
        assert_eq!(slug(&long, 80).chars().count(), 80);
        assert_eq!(slug("", 60), "untitled");
    }

    #[test]
    fn test_encode_full_record() {
        let name = encode(
            "TabPFN: a foundation model",
            Some(2026),
            Some(ymd(2026, 2, 15)),
            Some(42),
            BULK_SLUG_LEN,
        );
        assert_eq!(name, "2026_20260215_00042_TabPFN_a_foundation_model");
    }

    #[test]
    fn test_encode_missing_fields() {
        assert_eq!(encode("X", Some(2024), None, None, 60), "2024_20240000_00000_X");
        assert_eq!(encode("X", None, None, Some(7), 60), "0000_00000000_00007_X");
    }

    #[test]
    fn test_decode_encoded_name() {
        let decoded = decode("2026_20260215_00042_Title_words.txt");
        assert_eq!(
            decoded,
            Decoded::Parsed(FileMetadata {
                date: "20260215".to_string(),
                citations: 42,
            })
        );
    }

    #[test]
    fn test_decode_round_trips_encode() {
        let name = format!("{}.txt", encode("Some Paper", Some(2025), Some(ymd(2025, 6, 1)), Some(1234), 60));
        let meta = decode(&name).into_inner();
        assert_eq!(meta.date, "20250601");
        assert_eq!(meta.citations, 1234);
    }

    #[test]
    fn test_decode_falls_back_on_short_names() {
        for name in ["plain.txt", "one_two.txt", ""] {
            let decoded = decode(name);
            assert!(decoded.is_fallback(), "{name}");
            assert_eq!(decoded.into_inner(), FileMetadata::sentinel());
        }
    }

    #[test]
    fn test_decode_falls_back_as_a_whole_on_bad_citations() {
        // The date segment is discarded too, not kept alongside a zero count.
        let decoded = decode("2026_20260215_many_Title.txt");
        assert!(decoded.is_fallback());
        assert_eq!(decoded.into_inner().date, SENTINEL_DATE);
    }

    #[test]
    fn test_date_string_to_date_valid() {
        assert_eq!(date_string_to_date("20260215"), Decoded::Parsed(ymd(2026, 2, 15)));
    }

    #[test]
    fn test_date_string_to_date_malformed_is_min() {
        for s in ["20261301", "2026ab01", "20260230", "00000000", "2026", "", "20240000"] {
            let decoded = date_string_to_date(s);
            assert!(decoded.is_fallback(), "{s}");
            let date = decoded.into_inner();
            assert_eq!(date, NaiveDate::MIN);
            assert!(date < ymd(1, 1, 1));
        }
    }
}
