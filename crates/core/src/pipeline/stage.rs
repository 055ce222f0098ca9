use std::fmt;

pub const COMPILED_BOOK_NAME: &str = "compiled_book";

/// Single-artifact stages that run before chapter extraction, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BookStage {
    Premise,
    Title,
    TableOfContents,
    ContentTypes,
    RefinedContentTypes,
    DeepenedNarrative,
}

impl BookStage {
    pub const ALL: [BookStage; 6] = [
        BookStage::Premise,
        BookStage::Title,
        BookStage::TableOfContents,
        BookStage::ContentTypes,
        BookStage::RefinedContentTypes,
        BookStage::DeepenedNarrative,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Premise => "premise",
            Self::Title => "title",
            Self::TableOfContents => "table of contents",
            Self::ContentTypes => "initial content types",
            Self::RefinedContentTypes => "refined content types",
            Self::DeepenedNarrative => "deepened narrative",
        }
    }

    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::Premise => "premise",
            Self::Title => "title",
            Self::TableOfContents => "toc",
            Self::ContentTypes => "content_types",
            Self::RefinedContentTypes => "refined_content_types",
            Self::DeepenedNarrative => "deepened_narrative",
        }
    }

    pub fn prompt_key(&self) -> &'static str {
        match self {
            Self::Premise => "premise",
            Self::Title => "title",
            Self::TableOfContents => "table_of_contents",
            Self::ContentTypes => "content_types",
            Self::RefinedContentTypes => "refine_content_types",
            Self::DeepenedNarrative => "deepen_narrative",
        }
    }

    pub fn dependencies(&self) -> &'static [BookStage] {
        match self {
            Self::Premise => &[],
            Self::Title => &[BookStage::Premise],
            Self::TableOfContents => &[BookStage::Premise],
            Self::ContentTypes => &[BookStage::Premise, BookStage::TableOfContents],
            Self::RefinedContentTypes => &[BookStage::Premise, BookStage::ContentTypes],
            Self::DeepenedNarrative => &[BookStage::Premise, BookStage::RefinedContentTypes],
        }
    }
}

impl fmt::Display for BookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn outline_name(chapter: usize) -> String {
    format!("outline_chapter_{chapter}")
}

/// Prose for chapter `n` is always `chapter_0` followed by `n` in decimal:
/// chapter 3 is `chapter_03`, chapter 10 is `chapter_010`. Extracted segments
/// never start their number with `0`, so the two name sets cannot overlap.
pub fn prose_name(chapter: usize) -> String {
    format!("chapter_0{chapter}")
}
