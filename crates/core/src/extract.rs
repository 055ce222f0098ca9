use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::store::{ArtifactStore, StoreError};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no chapter headings recognised (tried: {tried})")]
    NoChapters { tried: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Name of the artifact holding the `number`-th extracted chapter segment.
pub fn extracted_chapter_name(number: usize) -> String {
    format!("chapter_{number}")
}

/// Finds the byte offsets where chapters start in a narrative.
pub trait BoundaryMatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Start offsets of every chapter heading, ascending.
    fn boundaries(&self, text: &str) -> Vec<usize>;
}

pub struct RegexBoundaryMatcher {
    name: String,
    regex: Regex,
}

impl RegexBoundaryMatcher {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }

    /// `Chapter 3:`, `Ch. 3:`, `Section 3:` or `Part 3:`, optionally bulleted.
    pub fn formal_headings() -> Self {
        Self {
            name: "formal headings".to_string(),
            regex: formal_heading_regex().clone(),
        }
    }

    /// Bulleted lines such as `- Chapter 3.` or `* chapter 3 -`.
    pub fn bulleted_headings() -> Self {
        Self {
            name: "bulleted headings".to_string(),
            regex: bulleted_heading_regex().clone(),
        }
    }
}

impl BoundaryMatcher for RegexBoundaryMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn boundaries(&self, text: &str) -> Vec<usize> {
        self.regex.find_iter(text).map(|m| m.start()).collect()
    }
}

/// Chapters found in a narrative and the matcher that found them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedChapters {
    pub matcher: String,
    pub chapters: Vec<String>,
}

impl ExtractedChapters {
    /// Saves every chapter as `chapter_<n>`, 1-based, in document order.
    pub fn persist(&self, store: &ArtifactStore) -> Result<(), ExtractionError> {
        for (index, chapter) in self.chapters.iter().enumerate() {
            store.write(&extracted_chapter_name(index + 1), chapter)?;
        }
        Ok(())
    }
}

/// Splits a narrative into chapters with the first matcher that recognises
/// any heading. Results of different matchers are never merged.
pub struct ChapterExtractor {
    matchers: Vec<Box<dyn BoundaryMatcher>>,
}

impl Default for ChapterExtractor {
    fn default() -> Self {
        Self::with_matchers(vec![
            Box::new(RegexBoundaryMatcher::formal_headings()),
            Box::new(RegexBoundaryMatcher::bulleted_headings()),
        ])
    }
}

impl ChapterExtractor {
    pub fn with_matchers(matchers: Vec<Box<dyn BoundaryMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|matcher| matcher.name()).collect()
    }

    /// Each chapter runs from its heading up to the next heading or the end of
    /// the text and is trimmed. Text before the first heading is dropped.
    pub fn split(&self, narrative: &str) -> Result<ExtractedChapters, ExtractionError> {
        for matcher in &self.matchers {
            let mut starts = matcher.boundaries(narrative);
            starts.retain(|start| narrative.is_char_boundary(*start));
            starts.sort_unstable();
            starts.dedup();
            if starts.is_empty() {
                continue;
            }

            let mut ends: Vec<usize> = starts.iter().skip(1).copied().collect();
            ends.push(narrative.len());

            let chapters = starts
                .iter()
                .zip(ends)
                .map(|(&start, end)| narrative[start..end].trim().to_string())
                .collect();

            return Ok(ExtractedChapters {
                matcher: matcher.name().to_string(),
                chapters,
            });
        }

        Err(ExtractionError::NoChapters {
            tried: self.matcher_names().join(", "),
        })
    }

    /// Splits the narrative and saves every chapter as `chapter_<n>`, 1-based,
    /// in document order. Nothing is written when no heading is found.
    pub fn extract_into(
        &self,
        narrative: &str,
        store: &ArtifactStore,
    ) -> Result<ExtractedChapters, ExtractionError> {
        let extracted = self.split(narrative)?;
        extracted.persist(store)?;
        Ok(extracted)
    }
}

fn formal_heading_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)(?:^[ \t]*[-.*•][ \t]*)?\b(?:chapter|ch\.|section|part)\s+\d+\s*:")
            .expect("invalid formal heading regex")
    })
}

fn bulleted_heading_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*[-*•][ \t]*chapter\s*\d+\s*[:.)\-–]")
            .expect("invalid bulleted heading regex")
    })
}
