use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::blocklist::Blocklist;
use crate::document::{DocumentMetadata, Flags};
use crate::extract::FileType;

pub const FLAG_BLOCKLISTED: &str = "blocklisted_terms";
pub const FLAG_BLOCKLIST_HITS: &str = "blocklist_hits";
pub const FLAG_NEAR_MISS: &str = "blocklist_near_miss";
pub const FLAG_EXECUTABLE: &str = "disguised_executable";
pub const FLAG_EXTENSION_MISMATCH: &str = "extension_mismatch";
pub const FLAG_NEAR_EMPTY: &str = "near_empty_text";
pub const FLAG_EXCESSIVE_CAPS: &str = "excessive_caps";
pub const FLAG_EXCESSIVE_LINKS: &str = "excessive_links";
pub const FLAG_REPEATED_CHARS: &str = "repeated_characters";

const NEAR_MISS_PENALTY: f64 = 0.25;
const EXTENSION_MISMATCH_PENALTY: f64 = 0.3;
const NEAR_EMPTY_PENALTY: f64 = 0.2;
const EXCESSIVE_CAPS_PENALTY: f64 = 0.1;
const EXCESSIVE_LINKS_PENALTY: f64 = 0.2;
const REPEATED_CHARS_PENALTY: f64 = 0.1;

const CAPS_MIN_LETTERS: usize = 20;
const CAPS_RATIO: f64 = 0.7;
const MAX_LINKS: usize = 5;
const REPEAT_RUN: usize = 10;

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "msi", "dll", "js", "vbs", "ps1", "sh", "jar", "apk",
];

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid regex"));

/// Outcome of the deterministic checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    /// Confidence of safety in [0, 1]; 1.0 means no concerns
    pub score: f64,
    /// One entry per check, always fully populated
    pub flags: Flags,
    pub should_reject: bool,
}

pub struct RuleFilter {
    blocklist: Blocklist,
    min_text_chars: usize,
}

impl RuleFilter {
    #[must_use]
    pub fn new(min_text_chars: usize) -> Self {
        Self {
            blocklist: Blocklist::default(),
            min_text_chars,
        }
    }

    #[must_use]
    pub fn with_blocklist(mut self, blocklist: Blocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn from_terms<I, S>(terms: I, min_text_chars: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(min_text_chars).with_blocklist(Blocklist::from_terms(terms))
    }

    pub fn evaluate(&self, excerpt: &str, metadata: &DocumentMetadata) -> RuleVerdict {
        let hits = self.blocklist.find_matches(excerpt);
        let blocklisted = !hits.is_empty();
        let near_miss = !blocklisted && self.blocklist.has_near_miss(excerpt);

        let extension = metadata.extension();
        let executable = extension
            .as_deref()
            .is_some_and(|ext| EXECUTABLE_EXTENSIONS.contains(&ext));
        let mismatch = extension_mismatch(metadata.file_type.as_str(), extension.as_deref());

        let near_empty = excerpt.trim().chars().count() < self.min_text_chars;
        let caps = excessive_caps(excerpt);
        let links = LINK.find_iter(excerpt).count() > MAX_LINKS;
        let repeated = has_repeated_run(excerpt);

        let mut flags = Flags::new();
        flags.insert(FLAG_BLOCKLISTED.into(), blocklisted.into());
        flags.insert(FLAG_BLOCKLIST_HITS.into(), hits.len().into());
        flags.insert(FLAG_NEAR_MISS.into(), near_miss.into());
        flags.insert(FLAG_EXECUTABLE.into(), executable.into());
        flags.insert(FLAG_EXTENSION_MISMATCH.into(), mismatch.into());
        flags.insert(FLAG_NEAR_EMPTY.into(), near_empty.into());
        flags.insert(FLAG_EXCESSIVE_CAPS.into(), caps.into());
        flags.insert(FLAG_EXCESSIVE_LINKS.into(), links.into());
        flags.insert(FLAG_REPEATED_CHARS.into(), repeated.into());

        let should_reject = blocklisted || executable;
        if should_reject {
            tracing::debug!(?hits, executable, "rule filter rejected document");
            return RuleVerdict {
                score: 0.0,
                flags,
                should_reject,
            };
        }

        let penalties = [
            (near_miss, NEAR_MISS_PENALTY),
            (mismatch, EXTENSION_MISMATCH_PENALTY),
            (near_empty, NEAR_EMPTY_PENALTY),
            (caps, EXCESSIVE_CAPS_PENALTY),
            (links, EXCESSIVE_LINKS_PENALTY),
            (repeated, REPEATED_CHARS_PENALTY),
        ];
        let score = penalties
            .iter()
            .filter(|(tripped, _)| *tripped)
            .fold(1.0, |score, (_, penalty)| score - penalty)
            .clamp(0.0, 1.0);

        RuleVerdict {
            score,
            flags,
            should_reject,
        }
    }
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self::new(10)
    }
}

fn extension_mismatch(declared: &str, extension: Option<&str>) -> bool {
    let (Some(file_type), Some(ext)) = (FileType::from_declared(declared), extension) else {
        return false;
    };
    !file_type.extensions().contains(&ext)
}

fn excessive_caps(text: &str) -> bool {
    let (letters, upper) = text
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(letters, upper), c| {
            (letters + 1, upper + usize::from(c.is_uppercase()))
        });
    letters >= CAPS_MIN_LETTERS && upper as f64 / letters as f64 > CAPS_RATIO
}

fn has_repeated_run(text: &str) -> bool {
    let mut previous = None;
    let mut run = 0;
    for c in text.chars() {
        if c.is_alphanumeric() && Some(c) == previous {
            run += 1;
            if run >= REPEAT_RUN {
                return true;
            }
        } else {
            run = usize::from(c.is_alphanumeric());
        }
        previous = Some(c);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_meta() -> DocumentMetadata {
        DocumentMetadata::new("pdf").with_file_name("lecture.pdf")
    }

    fn flag(verdict: &RuleVerdict, key: &str) -> bool {
        verdict.flags[key].as_bool().unwrap()
    }

    #[test]
    fn test_clean_document_scores_one() {
        let verdict = RuleFilter::default().evaluate(
            "Photosynthesis converts light energy into chemical energy.",
            &pdf_meta(),
        );
        assert!(!verdict.should_reject);
        assert!((verdict.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(verdict.flags.len(), 9);
        assert!(verdict
            .flags
            .values()
            .all(|v| v.as_bool() == Some(false) || v.as_f64() == Some(0.0)));
    }

    #[test]
    fn test_blocklisted_phrase_rejects() {
        let verdict = RuleFilter::default().evaluate("buy cheap essays now", &pdf_meta());
        assert!(verdict.should_reject);
        assert!(flag(&verdict, FLAG_BLOCKLISTED));
        assert_eq!(verdict.flags[FLAG_BLOCKLIST_HITS].as_f64(), Some(1.0));
        assert!(verdict.score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_disguised_executable_rejects() {
        let meta = DocumentMetadata::new("pdf").with_file_name("notes.pdf.exe");
        let verdict = RuleFilter::default().evaluate("Chapter one of my notes", &meta);
        assert!(verdict.should_reject);
        assert!(flag(&verdict, FLAG_EXECUTABLE));
        assert!(flag(&verdict, FLAG_EXTENSION_MISMATCH));
    }

    #[test]
    fn test_extension_mismatch_penalized() {
        let meta = DocumentMetadata::new("application/pdf").with_file_name("slides.pptx");
        let verdict = RuleFilter::default().evaluate("Week three lecture slides", &meta);
        assert!(!verdict.should_reject);
        assert!(flag(&verdict, FLAG_EXTENSION_MISMATCH));
        assert!((verdict.score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_near_empty_uses_metadata_only() {
        let verdict = RuleFilter::default().evaluate("hi   ", &pdf_meta());
        assert!(!verdict.should_reject);
        assert!(flag(&verdict, FLAG_NEAR_EMPTY));
        assert!((verdict.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_structural_heuristics() {
        let filter = RuleFilter::default();

        let shouting = filter.evaluate("THIS IS THE BEST STUDY GUIDE EVER WRITTEN", &pdf_meta());
        assert!(flag(&shouting, FLAG_EXCESSIVE_CAPS));

        let links = "see https://a.io https://b.io www.c.io http://d.io https://e.io https://f.io";
        let linky = filter.evaluate(links, &pdf_meta());
        assert!(flag(&linky, FLAG_EXCESSIVE_LINKS));

        let repeated = filter.evaluate("aaaaaaaaaaaa wow", &pdf_meta());
        assert!(flag(&repeated, FLAG_REPEATED_CHARS));

        let separator = filter.evaluate("Section\n----------------\nBody text", &pdf_meta());
        assert!(!flag(&separator, FLAG_REPEATED_CHARS));
    }

    #[test]
    fn test_penalties_accumulate_and_clamp() {
        let meta = DocumentMetadata::new("docx").with_file_name("x.pdf");
        let verdict = RuleFilter::default().evaluate("ZZZZZZZZZZZZ", &meta);
        assert!(flag(&verdict, FLAG_EXTENSION_MISMATCH));
        assert!(flag(&verdict, FLAG_REPEATED_CHARS));
        assert!(verdict.score >= 0.0 && verdict.score < 1.0);
    }

    #[test]
    fn test_near_miss_penalized_not_rejected() {
        let verdict = RuleFilter::default().evaluate("discount v1agra for students", &pdf_meta());
        assert!(!verdict.should_reject);
        assert!(flag(&verdict, FLAG_NEAR_MISS));
        assert!((verdict.score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let filter = RuleFilter::default();
        let a = filter.evaluate("Some ordinary text about rivers", &pdf_meta());
        let b = filter.evaluate("Some ordinary text about rivers", &pdf_meta());
        assert_eq!(a, b);
    }
}
