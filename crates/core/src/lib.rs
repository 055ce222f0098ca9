pub mod cache;
pub mod config;
pub mod extract;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod review;
pub mod store;

pub use cache::{CacheError, RetryPolicy, StageCache};
pub use config::{
    BookConfig, Config, ConfigError, ConfigStore, GenerationMode, LlmConfig, PromptConfig,
    RecentUsage, LOCAL_PROFILE_NAME,
};
pub use extract::{
    extracted_chapter_name, BoundaryMatcher, ChapterExtractor, ExtractedChapters,
    ExtractionError, RegexBoundaryMatcher,
};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, StdoutLogSink, VecLogSink,
};
pub use model::{
    FailureKind, LanguageModel, LanguageModelError, Prompt, PromptMessage, Role,
};
pub use pipeline::{
    compile_book, outline_name, prose_name, BookOutcome, BookPipeline, BookSettings, BookStage,
    PipelineError, ProjectContext, ProjectStatus, COMPILED_BOOK_NAME,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use review::{FeedbackLoop, ReviewError, ReviewOutcome, Reviewer, ACCEPT_TOKEN};
pub use store::{
    sanitize_project_name, ArtifactStore, RevisionLog, StoreError, DEFAULT_OUTPUT_ROOT,
};
