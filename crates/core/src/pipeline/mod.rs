mod compile;
mod stage;

pub use compile::{compile_book, display_title};
pub use stage::{outline_name, prose_name, BookStage, COMPILED_BOOK_NAME};

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::{CacheError, RetryPolicy, StageCache};
use crate::config::GenerationMode;
use crate::extract::{extracted_chapter_name, ChapterExtractor, ExtractionError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::prompts::{PromptError, PromptRegistry};
use crate::review::{FeedbackLoop, ReviewError, Reviewer};
use crate::store::{ArtifactStore, StoreError};

const FIRST_OUTLINE_KEY: &str = "first_outline";
const NEXT_OUTLINE_KEY: &str = "next_outline";
const FIRST_CHAPTER_KEY: &str = "first_chapter";
const NEXT_CHAPTER_KEY: &str = "next_chapter";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid book settings: {0}")]
    InvalidSettings(String),
    #[error("failed to render prompt for {stage}: {source}")]
    Prompt {
        stage: String,
        #[source]
        source: PromptError,
    },
    #[error("stage {stage} failed: {source}")]
    Generation {
        stage: String,
        #[source]
        source: CacheError,
    },
    #[error("chapter extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("the narrative contains {found} chapter(s) but {expected} were requested")]
    InsufficientChapters { expected: usize, found: usize },
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Inputs of one run; fixed once the run starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookSettings {
    pub story_idea: String,
    pub tone: String,
    pub num_chapters: u32,
    pub mode: GenerationMode,
}

impl BookSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.num_chapters == 0 {
            return Err(PipelineError::InvalidSettings(
                "chapter count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn chapter_count(&self) -> usize {
        self.num_chapters as usize
    }
}

/// Everything a stage needs besides the collaborators held by [`BookPipeline`].
#[derive(Clone, Debug)]
pub struct ProjectContext {
    pub store: ArtifactStore,
    pub settings: BookSettings,
    /// Write reviewed revisions back into the stage artifact.
    pub persist_revisions: bool,
}

impl ProjectContext {
    pub fn new(store: ArtifactStore, settings: BookSettings) -> Self {
        Self {
            store,
            settings,
            persist_revisions: false,
        }
    }

    /// Opens (creating if needed) `<output_root>/<sanitized title>`.
    pub fn open(
        output_root: impl AsRef<Path>,
        title: &str,
        settings: BookSettings,
    ) -> Result<Self, PipelineError> {
        let store = ArtifactStore::for_project(output_root, title)?;
        Ok(Self::new(store, settings))
    }

    pub fn with_persist_revisions(mut self, persist: bool) -> Self {
        self.persist_revisions = persist;
        self
    }
}

#[derive(Clone, Debug)]
pub struct BookOutcome {
    pub title: String,
    pub toc: String,
    pub chapters: Vec<String>,
    pub compiled_path: PathBuf,
}

/// Which artifacts of a project already exist. Per-chapter counts only
/// include the contiguous run starting at chapter 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectStatus {
    pub stages: Vec<(BookStage, bool)>,
    pub extracted_chapters: usize,
    pub outlines: usize,
    pub prose_chapters: usize,
    pub compiled: bool,
}

impl ProjectStatus {
    pub fn inspect(store: &ArtifactStore) -> Self {
        let count = |name: fn(usize) -> String| {
            (1..).take_while(|&index| store.exists(&name(index))).count()
        };

        Self {
            stages: BookStage::ALL
                .iter()
                .map(|stage| (*stage, store.exists(stage.artifact_name())))
                .collect(),
            extracted_chapters: count(extracted_chapter_name),
            outlines: count(outline_name),
            prose_chapters: count(prose_name),
            compiled: store.exists(COMPILED_BOOK_NAME),
        }
    }
}

pub struct BookPipeline<'a> {
    prompts: &'a PromptRegistry,
    model: &'a dyn LanguageModel,
    sink: &'a dyn LogSink,
    reviewer: Option<&'a dyn Reviewer>,
    extractor: ChapterExtractor,
    retry: RetryPolicy,
}

impl<'a> BookPipeline<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        model: &'a dyn LanguageModel,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            prompts,
            model,
            sink,
            reviewer: None,
            extractor: ChapterExtractor::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Required when the settings ask for manual mode.
    pub fn with_reviewer(mut self, reviewer: &'a dyn Reviewer) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_extractor(mut self, extractor: ChapterExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run(&self, ctx: &ProjectContext) -> Result<BookOutcome, PipelineError> {
        ctx.settings.validate()?;
        if ctx.settings.mode.is_manual() && self.reviewer.is_none() {
            return Err(PipelineError::InvalidSettings(
                "manual mode needs a reviewer".to_string(),
            ));
        }

        self.log(
            LogLevel::Info,
            format!(
                "generating {} chapter(s) in {} mode into {}",
                ctx.settings.num_chapters,
                ctx.settings.mode,
                ctx.store.dir().display()
            ),
        );

        let premise = self.generate_premise(ctx)?;
        let title = self.generate_title(ctx, &premise)?;
        let toc = self.generate_toc(ctx, &premise)?;
        let content_types = self.identify_content_types(ctx, &premise, &toc)?;
        let refined = self.refine_content_types(ctx, &premise, &content_types)?;
        let narrative = self.deepen_narrative(ctx, &premise, &refined)?;
        self.extract_chapters(ctx, &narrative)?;
        let outlines = self.generate_outlines(ctx, &premise)?;
        let chapters = self.generate_chapters(ctx, &premise, &outlines)?;
        let compiled_path = self.compile(ctx, &title, &toc, &chapters)?;

        self.log(
            LogLevel::Info,
            format!("book compiled to {}", compiled_path.display()),
        );
        Ok(BookOutcome {
            title,
            toc,
            chapters,
            compiled_path,
        })
    }

    pub fn generate_premise(&self, ctx: &ProjectContext) -> Result<String, PipelineError> {
        let settings = &ctx.settings;
        let premise = self.generate_stage(
            ctx,
            BookStage::Premise,
            [
                ("story_idea", settings.story_idea.as_str()),
                ("tone", settings.tone.as_str()),
            ],
        )?;
        self.gate(
            ctx,
            BookStage::Premise.artifact_name(),
            premise,
            format!("Story idea: {}", settings.story_idea),
        )
    }

    pub fn generate_title(
        &self,
        ctx: &ProjectContext,
        premise: &str,
    ) -> Result<String, PipelineError> {
        let settings = &ctx.settings;
        let title = self.generate_stage(
            ctx,
            BookStage::Title,
            [
                ("premise", premise),
                ("story_idea", settings.story_idea.as_str()),
                ("tone", settings.tone.as_str()),
            ],
        )?;
        self.gate(ctx, BookStage::Title.artifact_name(), title, String::new())
    }

    pub fn generate_toc(&self, ctx: &ProjectContext, premise: &str) -> Result<String, PipelineError> {
        let settings = &ctx.settings;
        let num_chapters = settings.num_chapters.to_string();
        let toc = self.generate_stage(
            ctx,
            BookStage::TableOfContents,
            [
                ("premise", premise),
                ("story_idea", settings.story_idea.as_str()),
                ("tone", settings.tone.as_str()),
                ("num_chapters", num_chapters.as_str()),
            ],
        )?;
        self.gate(
            ctx,
            BookStage::TableOfContents.artifact_name(),
            toc,
            format!("Premise: {premise}"),
        )
    }

    pub fn identify_content_types(
        &self,
        ctx: &ProjectContext,
        premise: &str,
        toc: &str,
    ) -> Result<String, PipelineError> {
        let settings = &ctx.settings;
        let content_types = self.generate_stage(
            ctx,
            BookStage::ContentTypes,
            [
                ("toc", toc),
                ("story_idea", settings.story_idea.as_str()),
                ("premise", premise),
                ("tone", settings.tone.as_str()),
            ],
        )?;
        self.gate(
            ctx,
            BookStage::ContentTypes.artifact_name(),
            content_types,
            format!("Table of contents: {toc}"),
        )
    }

    pub fn refine_content_types(
        &self,
        ctx: &ProjectContext,
        premise: &str,
        content_types: &str,
    ) -> Result<String, PipelineError> {
        let refined = self.generate_stage(
            ctx,
            BookStage::RefinedContentTypes,
            [
                ("content_types", content_types),
                ("premise", premise),
                ("tone", ctx.settings.tone.as_str()),
            ],
        )?;
        self.gate(
            ctx,
            BookStage::RefinedContentTypes.artifact_name(),
            refined,
            format!("Initial content types: {content_types}"),
        )
    }

    pub fn deepen_narrative(
        &self,
        ctx: &ProjectContext,
        premise: &str,
        refined: &str,
    ) -> Result<String, PipelineError> {
        let narrative = self.generate_stage(
            ctx,
            BookStage::DeepenedNarrative,
            [
                ("refined_content_types", refined),
                ("premise", premise),
                ("tone", ctx.settings.tone.as_str()),
            ],
        )?;
        self.gate(
            ctx,
            BookStage::DeepenedNarrative.artifact_name(),
            narrative,
            format!("Refined content types: {refined}"),
        )
    }

    /// Splits the narrative into `chapter_<n>` artifacts. Rewritten on every
    /// run since the narrative may have been revised. Nothing is written when
    /// fewer chapters than requested are found.
    pub fn extract_chapters(
        &self,
        ctx: &ProjectContext,
        narrative: &str,
    ) -> Result<Vec<String>, PipelineError> {
        self.log(LogLevel::Info, "extracting chapters from the deepened narrative");
        let extracted = self.extractor.split(narrative)?;

        let expected = ctx.settings.chapter_count();
        let found = extracted.chapters.len();
        if found < expected {
            return Err(PipelineError::InsufficientChapters { expected, found });
        }
        extracted.persist(&ctx.store)?;
        if found > expected {
            self.log(
                LogLevel::Warn,
                format!("found {found} chapters, only the first {expected} are used"),
            );
        } else {
            self.log(
                LogLevel::Info,
                format!("found {found} chapters using {}", extracted.matcher),
            );
        }
        Ok(extracted.chapters)
    }

    /// Outlines chapter by chapter; each one sees the (reviewed) outline of
    /// the chapter before it.
    pub fn generate_outlines(
        &self,
        ctx: &ProjectContext,
        premise: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let mut outlines: Vec<String> = Vec::with_capacity(ctx.settings.chapter_count());
        for number in 1..=ctx.settings.chapter_count() {
            let chapter_content = ctx.store.require(&extracted_chapter_name(number))?;
            let artifact = outline_name(number);
            let outline = match outlines.last() {
                None => self.generate_artifact(
                    ctx,
                    &artifact,
                    FIRST_OUTLINE_KEY,
                    [("chapter_content", chapter_content.as_str())],
                )?,
                Some(previous) => {
                    let chapter_number = number.to_string();
                    self.generate_artifact(
                        ctx,
                        &artifact,
                        NEXT_OUTLINE_KEY,
                        [
                            ("chapter_number", chapter_number.as_str()),
                            ("chapter_content", chapter_content.as_str()),
                            ("previous_outline", previous.as_str()),
                        ],
                    )?
                }
            };
            let outline = self.gate(ctx, &artifact, outline, format!("Premise: {premise}"))?;
            outlines.push(outline);
        }
        Ok(outlines)
    }

    pub fn generate_chapters(
        &self,
        ctx: &ProjectContext,
        premise: &str,
        outlines: &[String],
    ) -> Result<Vec<String>, PipelineError> {
        let tone = ctx.settings.tone.as_str();
        let mut chapters = Vec::with_capacity(outlines.len());
        for (index, outline) in outlines.iter().enumerate() {
            let number = index + 1;
            let artifact = prose_name(number);
            let chapter = if number == 1 {
                self.generate_artifact(
                    ctx,
                    &artifact,
                    FIRST_CHAPTER_KEY,
                    [("outline", outline.as_str()), ("tone", tone)],
                )?
            } else {
                let chapter_number = number.to_string();
                self.generate_artifact(
                    ctx,
                    &artifact,
                    NEXT_CHAPTER_KEY,
                    [
                        ("chapter_number", chapter_number.as_str()),
                        ("outline", outline.as_str()),
                        ("tone", tone),
                    ],
                )?
            };
            chapters.push(self.gate(ctx, &artifact, chapter, format!("Premise: {premise}"))?);
        }
        Ok(chapters)
    }

    pub fn compile(
        &self,
        ctx: &ProjectContext,
        title: &str,
        toc: &str,
        chapters: &[String],
    ) -> Result<PathBuf, PipelineError> {
        let book = compile_book(title, toc, chapters);
        Ok(ctx.store.write(COMPILED_BOOK_NAME, &book)?)
    }

    fn generate_stage<const N: usize>(
        &self,
        ctx: &ProjectContext,
        stage: BookStage,
        arguments: [(&str, &str); N],
    ) -> Result<String, PipelineError> {
        if !ctx.store.exists(stage.artifact_name()) {
            self.ensure_dependencies(ctx, stage)?;
        }
        self.log(LogLevel::Info, format!("{}...", stage.label()));
        self.generate_artifact(ctx, stage.artifact_name(), stage.prompt_key(), arguments)
    }

    fn ensure_dependencies(&self, ctx: &ProjectContext, stage: BookStage) -> Result<(), PipelineError> {
        for dependency in stage.dependencies() {
            if !ctx.store.exists(dependency.artifact_name()) {
                return Err(StoreError::Missing {
                    name: dependency.artifact_name().to_string(),
                    dir: ctx.store.dir().to_path_buf(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn generate_artifact<const N: usize>(
        &self,
        ctx: &ProjectContext,
        artifact: &str,
        prompt_key: &str,
        arguments: [(&str, &str); N],
    ) -> Result<String, PipelineError> {
        let prompt = self
            .prompts
            .format_with(prompt_key, arguments)
            .map_err(|source| PipelineError::Prompt {
                stage: artifact.to_string(),
                source,
            })?;

        StageCache::new(&ctx.store, self.model, self.sink)
            .with_retry(self.retry)
            .generate_or_load(artifact, &prompt)
            .map_err(|source| PipelineError::Generation {
                stage: artifact.to_string(),
                source,
            })
    }

    /// Review gate: a no-op in auto mode, one feedback round in manual mode.
    fn gate(
        &self,
        ctx: &ProjectContext,
        artifact: &str,
        content: String,
        context: String,
    ) -> Result<String, PipelineError> {
        if !ctx.settings.mode.is_manual() {
            return Ok(content);
        }
        let Some(reviewer) = self.reviewer else {
            return Err(PipelineError::InvalidSettings(
                "manual mode needs a reviewer".to_string(),
            ));
        };

        let feedback = FeedbackLoop::new(
            self.prompts,
            self.model,
            reviewer,
            ctx.store.revisions(),
            self.sink,
        );
        let outcome = feedback.review(artifact, &content, &context)?;
        if outcome.is_revised() && ctx.persist_revisions {
            ctx.store.write(artifact, outcome.text())?;
            self.sink.log(LogRecord::for_stage(
                LogLevel::Info,
                artifact,
                "revision written back to the project",
            ));
        }
        Ok(outcome.into_text())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
