use std::io;
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry};
use crate::store::{RevisionLog, StoreError};

/// Reviewer answer that accepts content without changes.
pub const ACCEPT_TOKEN: &str = "perfect";

pub const REVISION_PROMPT_KEY: &str = "revision";

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("failed to collect feedback for {stage}: {source}")]
    Reviewer {
        stage: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to render revision prompt for {stage}: {source}")]
    Prompt {
        stage: String,
        #[source]
        source: PromptError,
    },
    #[error("revision of {stage} failed: {source}")]
    Model {
        stage: String,
        #[source]
        source: LanguageModelError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shows a stage result to a human and returns their raw answer.
pub trait Reviewer {
    fn review(&self, stage: &str, content: &str) -> io::Result<String>;
}

/// Returns `true` when a reviewer answer accepts the content as it is.
pub fn is_acceptance(feedback: &str) -> bool {
    feedback.trim().eq_ignore_ascii_case(ACCEPT_TOKEN)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    Accepted(String),
    Revised(String),
}

impl ReviewOutcome {
    pub fn is_revised(&self) -> bool {
        matches!(self, Self::Revised(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Accepted(text) | Self::Revised(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Accepted(text) | Self::Revised(text) => text,
        }
    }
}

pub struct FeedbackLoop<'a> {
    prompts: &'a PromptRegistry,
    model: &'a dyn LanguageModel,
    reviewer: &'a dyn Reviewer,
    revisions: RevisionLog,
    sink: &'a dyn LogSink,
}

impl<'a> FeedbackLoop<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        model: &'a dyn LanguageModel,
        reviewer: &'a dyn Reviewer,
        revisions: RevisionLog,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            prompts,
            model,
            reviewer,
            revisions,
            sink,
        }
    }

    pub fn revisions(&self) -> &RevisionLog {
        &self.revisions
    }

    /// One review round. Accepting returns `content` untouched and clears the
    /// stage's revision log; any other answer asks the model for one revision,
    /// records it and returns it.
    pub fn review(
        &self,
        stage: &str,
        content: &str,
        context: &str,
    ) -> Result<ReviewOutcome, ReviewError> {
        let feedback = self
            .reviewer
            .review(stage, content)
            .map_err(|source| ReviewError::Reviewer {
                stage: stage.to_string(),
                source,
            })?;

        if is_acceptance(&feedback) {
            if self.revisions.clear(stage)? {
                self.log(LogLevel::Debug, stage, "cleared previous revision");
            }
            self.log(LogLevel::Info, stage, "accepted without changes");
            return Ok(ReviewOutcome::Accepted(content.to_string()));
        }

        self.log(LogLevel::Info, stage, "revising with reviewer feedback");
        let prompt = self
            .prompts
            .format_with(
                REVISION_PROMPT_KEY,
                [
                    ("feedback", feedback.trim()),
                    ("context", context),
                    ("original_content", content),
                ],
            )
            .map_err(|source| ReviewError::Prompt {
                stage: stage.to_string(),
                source,
            })?;

        let revised = self
            .model
            .complete(&prompt)
            .map_err(|source| ReviewError::Model {
                stage: stage.to_string(),
                source,
            })?
            .trim()
            .to_string();

        let path = self.revisions.record(stage, &revised)?;
        self.log(
            LogLevel::Info,
            stage,
            format!("revision saved to {}", path.display()),
        );
        Ok(ReviewOutcome::Revised(revised))
    }

    fn log(&self, level: LogLevel, stage: &str, message: impl Into<String>) {
        self.sink.log(LogRecord::for_stage(level, stage, message.into()));
    }
}
