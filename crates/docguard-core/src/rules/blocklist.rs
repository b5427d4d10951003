use std::path::Path;

use regex::Regex;

/// Terms that reject a document outright when they appear as whole words.
const DEFAULT_TERMS: &[&str] = &[
    "cheap essays",
    "buy essays",
    "buy essay",
    "essay writing service",
    "write my essay",
    "pay someone to take",
    "exam answers leaked",
    "leaked exam",
    "test bank download",
    "free money",
    "online casino",
    "click here to win",
    "viagra",
    "cialis",
    "porn",
    "xxx",
];

const NEAR_MISS_MIN_LEN: usize = 5;
const NEAR_MISS_SIMILARITY: f64 = 0.8;

pub struct BlocklistTerm {
    pub term: String,
    regex: Regex,
}

impl BlocklistTerm {
    pub fn new(term: &str) -> Result<Self, regex::Error> {
        let term = term.trim().to_lowercase();
        let words: Vec<String> = term.split_whitespace().map(regex::escape).collect();
        let pattern = format!(r"(?i)\b{}\b", words.join(r"\s+"));

        Ok(Self {
            regex: Regex::new(&pattern)?,
            term,
        })
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    fn is_single_word(&self) -> bool {
        !self.term.contains(char::is_whitespace)
    }
}

pub struct Blocklist {
    terms: Vec<BlocklistTerm>,
}

impl Blocklist {
    #[must_use]
    pub const fn empty() -> Self {
        Self { terms: Vec::new() }
    }

    /// Blank terms are skipped; terms that fail to compile are logged and skipped.
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::empty();
        for term in terms {
            let term = term.as_ref();
            if term.trim().is_empty() {
                continue;
            }
            match BlocklistTerm::new(term) {
                Ok(t) => list.terms.push(t),
                Err(e) => tracing::warn!(term, error = %e, "skipping blocklist term"),
            }
        }
        list
    }

    /// Newline-delimited file; `#` starts a comment line.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let list = Self::from_terms(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );
        tracing::info!(path = %path.display(), terms = list.len(), "loaded blocklist");
        Ok(list)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Distinct terms found as whole words in `text`, in blocklist order.
    #[must_use]
    pub fn find_matches(&self, text: &str) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| t.matches(text))
            .map(|t| t.term.as_str())
            .collect()
    }

    /// Whether any token is a close but inexact spelling of a single-word term.
    #[must_use]
    pub fn has_near_miss(&self, text: &str) -> bool {
        let candidates: Vec<&str> = self
            .terms
            .iter()
            .filter(|t| t.is_single_word() && t.term.chars().count() >= NEAR_MISS_MIN_LEN)
            .map(|t| t.term.as_str())
            .collect();
        if candidates.is_empty() {
            return false;
        }

        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= NEAR_MISS_MIN_LEN)
            .map(str::to_lowercase)
            .any(|token| {
                candidates.iter().any(|term| {
                    token != *term
                        && strsim::normalized_damerau_levenshtein(&token, term)
                            >= NEAR_MISS_SIMILARITY
                })
            })
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::from_terms(DEFAULT_TERMS)
    }
}
