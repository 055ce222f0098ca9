use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::Mutex;

use bookgen_core::{
    ArtifactStore, BookPipeline, BookSettings, GenerationMode, LanguageModel, LanguageModelError,
    LogLevel, PipelineError, ProjectContext, Prompt, PromptRegistry, Reviewer, VecLogSink,
    COMPILED_BOOK_NAME,
};
use tempfile::tempdir;

const NARRATIVE: &str = "\
Chapter 1: The Lighthouse
Mara finds the lamp dark for the first time in forty years.

Chapter 2: The Keeper's Log
The log ends mid-sentence.
";

struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().expect("mock mutex poisoned").len()
    }

    fn prompt(&self, index: usize) -> Prompt {
        self.prompts.lock().expect("mock mutex poisoned")[index].clone()
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(
            guard.is_empty(),
            "expected all mock responses to be consumed"
        );
    }
}

impl LanguageModel for MockLanguageModel {
    fn complete(&self, prompt: &Prompt) -> Result<String, LanguageModelError> {
        self.prompts
            .lock()
            .expect("mock mutex poisoned")
            .push(prompt.clone());
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard.pop_front().ok_or_else(|| {
            LanguageModelError::permanent(io::Error::new(
                io::ErrorKind::Other,
                "mock language model has no remaining responses",
            ))
        })
    }
}

struct ScriptedReviewer {
    answers: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedReviewer {
    fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl Reviewer for ScriptedReviewer {
    fn review(&self, stage: &str, _content: &str) -> io::Result<String> {
        self.seen.lock().expect("reviewer mutex poisoned").push(stage.to_string());
        self.answers
            .lock()
            .expect("reviewer mutex poisoned")
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer"))
    }
}

fn settings(mode: GenerationMode, num_chapters: u32) -> BookSettings {
    BookSettings {
        story_idea: "a lighthouse keeper who vanished".into(),
        tone: "eerie".into(),
        num_chapters,
        mode,
    }
}

fn full_run_responses() -> Vec<String> {
    vec![
        "A keeper's granddaughter returns to a dark lighthouse.".into(),
        "Title: The Dark Lamp".into(),
        "Table of Contents:\nChapter 1: The Lighthouse\nChapter 2: The Keeper's Log".into(),
        "Chapter 1: The Lighthouse - arrival\nChapter 2: The Keeper's Log - discovery".into(),
        "Chapter 1\n- arrival at dusk\nChapter 2\n- the log".into(),
        NARRATIVE.into(),
        "Outline one".into(),
        "Outline two".into(),
        "Prose of the first chapter.".into(),
        "Prose of the second chapter.".into(),
    ]
}

#[test]
fn full_generation_pipeline_produces_expected_artifacts() -> Result<(), Box<dyn std::error::Error>>
{
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let mock = MockLanguageModel::new(full_run_responses());

    let ctx = ProjectContext::open(temp.path(), "Dark Lamp?", settings(GenerationMode::Auto, 2))?;
    let outcome = BookPipeline::new(&prompts, &mock, &sink).run(&ctx)?;

    assert_eq!(mock.calls(), 6 + 2 * 2);
    mock.assert_empty();
    assert_eq!(ctx.store.dir(), temp.path().join("Dark Lamp"));

    for name in [
        "premise",
        "title",
        "toc",
        "content_types",
        "refined_content_types",
        "deepened_narrative",
        "chapter_1",
        "chapter_2",
        "outline_chapter_1",
        "outline_chapter_2",
        "chapter_01",
        "chapter_02",
        COMPILED_BOOK_NAME,
    ] {
        assert!(ctx.store.exists(name), "missing artifact {name}");
    }

    assert_eq!(
        ctx.store.require("chapter_2")?,
        "Chapter 2: The Keeper's Log\nThe log ends mid-sentence."
    );

    // the second outline sees the first one and the second extracted chapter
    let second_outline = mock.prompt(7);
    assert!(second_outline.contains("Outline one"));
    assert!(second_outline.contains("The log ends mid-sentence."));

    let compiled = fs::read_to_string(&outcome.compiled_path)?;
    assert!(compiled.starts_with("Title: The Dark Lamp\n"));
    let first = compiled.find("Prose of the first chapter.").unwrap();
    let second = compiled.find("Prose of the second chapter.").unwrap();
    assert!(first < second);
    assert_eq!(outcome.chapters.len(), 2);

    assert!(sink
        .messages_at(LogLevel::Info)
        .iter()
        .any(|message| message.contains("book compiled")));

    Ok(())
}

#[test]
fn rerun_is_served_entirely_from_the_project() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let ctx = ProjectContext::open(temp.path(), "Dark Lamp", settings(GenerationMode::Auto, 2))?;

    let mock = MockLanguageModel::new(full_run_responses());
    let first = BookPipeline::new(&prompts, &mock, &sink).run(&ctx)?;
    let compiled = fs::read_to_string(&first.compiled_path)?;

    let silent = MockLanguageModel::new(Vec::<String>::new());
    let second = BookPipeline::new(&prompts, &silent, &sink).run(&ctx)?;

    assert_eq!(silent.calls(), 0);
    assert_eq!(fs::read_to_string(&second.compiled_path)?, compiled);
    Ok(())
}

#[test]
fn resume_only_generates_missing_stages() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let ctx = ProjectContext::open(temp.path(), "Dark Lamp", settings(GenerationMode::Auto, 2))?;

    ctx.store.write("premise", "Stored premise.")?;
    ctx.store.write("title", "Title: Stored")?;
    ctx.store.write("toc", "Chapter 1: A\nChapter 2: B")?;

    let mock = MockLanguageModel::new(full_run_responses().into_iter().skip(3));
    BookPipeline::new(&prompts, &mock, &sink).run(&ctx)?;

    assert_eq!(mock.calls(), 3 + 2 * 2);
    mock.assert_empty();
    assert!(mock.prompt(0).contains("Stored premise."));
    assert_eq!(ctx.store.require("title")?, "Title: Stored");
    Ok(())
}

#[test]
fn narrative_without_headings_halts_before_outlines() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let ctx = ProjectContext::open(temp.path(), "Dark Lamp", settings(GenerationMode::Auto, 2))?;

    let mut responses = full_run_responses();
    responses[5] = "An unbroken wall of narrative with no headings at all.".into();
    let mock = MockLanguageModel::new(responses);

    let err = BookPipeline::new(&prompts, &mock, &sink)
        .run(&ctx)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Extraction(_)));
    assert_eq!(mock.calls(), 6);
    assert!(ctx.store.exists("deepened_narrative"));
    assert!(!ctx.store.exists("chapter_1"));
    assert!(!ctx.store.exists("outline_chapter_1"));
    Ok(())
}

#[test]
fn generation_failure_leaves_no_artifact_behind() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let ctx = ProjectContext::open(temp.path(), "Dark Lamp", settings(GenerationMode::Auto, 2))?;

    let mock = MockLanguageModel::new(full_run_responses().into_iter().take(2));
    let err = BookPipeline::new(&prompts, &mock, &sink)
        .run(&ctx)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Generation { ref stage, .. } if stage == "toc"));
    assert!(ctx.store.exists("title"));
    assert!(!ctx.store.exists("toc"));
    assert!(!sink.messages_at(LogLevel::Warn).is_empty());
    Ok(())
}

#[test]
fn manual_mode_reviews_every_stage_and_applies_revisions(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let ctx = ProjectContext::open(temp.path(), "Dark Lamp", settings(GenerationMode::Manual, 1))?
        .with_persist_revisions(true);
    let store: &ArtifactStore = &ctx.store;

    let mock = MockLanguageModel::new([
        "Premise.",
        "Title: One",
        "Chapter 1: Alone",
        "Chapter 1: Alone, Together",
        "Content types.",
        "Refined.",
        "Chapter 1: Alone, Together\nShe climbs the stairs.",
        "Outline.",
        "Prose.",
    ]);
    let reviewer = ScriptedReviewer::new(&[
        "perfect",
        "Perfect",
        "the chapter title should hint at company",
        "perfect",
        "perfect",
        "perfect",
        "perfect",
        "perfect",
    ]);

    let outcome = BookPipeline::new(&prompts, &mock, &sink)
        .with_reviewer(&reviewer)
        .run(&ctx)?;
    mock.assert_empty();

    let revision_prompt = mock.prompt(3);
    assert!(revision_prompt.contains("Chapter 1: Alone"));
    assert!(revision_prompt.contains("the chapter title should hint at company"));
    assert!(revision_prompt.contains("Premise: Premise."));

    // the revised toc flows into the next stage and into the project
    assert!(mock.prompt(4).contains("Chapter 1: Alone, Together"));
    assert_eq!(outcome.toc, "Chapter 1: Alone, Together");
    assert_eq!(store.require("toc")?, "Chapter 1: Alone, Together");
    assert_eq!(
        store.revisions().read("toc")?.as_deref(),
        Some("Chapter 1: Alone, Together")
    );

    let seen = reviewer.seen.lock().expect("reviewer mutex poisoned").clone();
    assert_eq!(
        seen,
        vec![
            "premise",
            "title",
            "toc",
            "content_types",
            "refined_content_types",
            "deepened_narrative",
            "outline_chapter_1",
            "chapter_01",
        ]
    );
    Ok(())
}
