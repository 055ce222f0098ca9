mod console;

use bookgen_adapters::{create_llm_adapter_from_profile, AdapterError};
use bookgen_core::{
    sanitize_project_name, ArtifactStore, BookPipeline, BookSettings, ConfigStore,
    GenerationMode, LanguageModel, LanguageModelError, LlmConfig, LogLevel, LogRecord, LogSink,
    PipelineError, ProjectContext, ProjectStatus, Prompt, PromptError, PromptRegistry,
    RetryPolicy, StdoutLogSink, StoreError, LOCAL_PROFILE_NAME,
};
use clap::{Args, Parser, Subcommand};
use console::ConsoleReviewer;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const RETRY_SLEEP: Duration = Duration::from_secs(2);
const PROBE_PROMPT: &str = "Please reply 'OK'";

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let sink = StdoutLogSink::new().verbose(cli.verbose);

    debug!("using config file {}", cli.config.display());
    match cli.command {
        Command::Generate(args) => run_generate(&cli.config, args, &sink),
        Command::Status(args) => run_status(&cli.config, args),
        Command::Config(command) => handle_config(&cli.config, command, &sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm(args) => run_test_llm(config_path, args, sink),
    }
}

fn run_generate(config_path: &Path, args: GenerateArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();
    let book = store.config().book.clone();

    let title = match normalize_preference(args.title) {
        Some(title) => title,
        None => console::ask_until(
            "Title of your project: ",
            "The title needs at least one usable character: ",
            |raw| sanitize_project_name(raw).ok().map(|_| raw.trim().to_string()),
        )?,
    };
    let story_idea = match normalize_preference(args.idea).or_else(|| non_empty(&book.story_idea)) {
        Some(idea) => idea,
        None => console::ask("Your story idea: ")?.trim().to_string(),
    };
    let tone = match normalize_preference(args.tone).or_else(|| non_empty(&book.tone)) {
        Some(tone) => tone,
        None => console::ask("How should it feel? (e.g. dark, romantic, whimsical): ")?
            .trim()
            .to_string(),
    };
    let num_chapters = match args.chapters.or(Some(book.num_chapters).filter(|n| *n > 0)) {
        Some(0) => {
            return Err(CliError::InvalidArgument(
                "--chapters must be at least 1".to_string(),
            ))
        }
        Some(count) => count,
        None => console::ask_until(
            "How many chapters? ",
            "Please enter a whole number greater than zero: ",
            |raw| raw.trim().parse::<u32>().ok().filter(|n| *n > 0),
        )?,
    };
    let mode = match normalize_preference(args.mode) {
        Some(raw) => raw.parse::<GenerationMode>()?,
        None => match book.mode {
            Some(mode) => mode,
            None => console::ask_until(
                "Generate automatically ('auto') or review every step ('manual')? ",
                "Please answer 'auto' or 'manual': ",
                |raw| raw.parse::<GenerationMode>().ok(),
            )?,
        },
    };

    let (interface, profile) = resolve_llm_profile(&store, args.llm_interface, sink)?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let model = create_llm_adapter_from_profile(&profile)?;

    let settings = BookSettings {
        story_idea,
        tone,
        num_chapters,
        mode,
    };
    let ctx = ProjectContext::open(&book.output_root, &title, settings)?
        .with_persist_revisions(book.persist_revisions);

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("project directory: {}", ctx.store.dir().display()),
    ));
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "LLM interface: {interface} ({} via {})",
            profile.model_name, profile.interface_format
        ),
    ));

    let reviewer = ConsoleReviewer;
    let mut pipeline = BookPipeline::new(&prompts, model.as_ref(), sink);
    if mode.is_manual() {
        pipeline = pipeline.with_reviewer(&reviewer);
    }
    if let Some(attempts) = args.max_attempts {
        pipeline = pipeline.with_retry(RetryPolicy::new(attempts.max(1), RETRY_SLEEP));
    }

    let outcome = pipeline.run(&ctx)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "{} chapter(s) written, book saved to {}",
            outcome.chapters.len(),
            outcome.compiled_path.display()
        ),
    ));

    remember_interface(&mut store, interface)
}

fn run_status(config_path: &Path, args: StatusArgs) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let output_root = PathBuf::from(&store.config().book.output_root);
    let project_dir = output_root.join(sanitize_project_name(&args.title)?);
    if !project_dir.is_dir() {
        return Err(CliError::UnknownProject(project_dir));
    }

    let artifacts = ArtifactStore::open(&project_dir)?;
    let status = ProjectStatus::inspect(&artifacts);

    println!("Project: {}", project_dir.display());
    for (stage, present) in &status.stages {
        println!("  [{}] {}", mark(*present), stage.label());
    }
    println!("  extracted chapters: {}", status.extracted_chapters);
    println!("  chapter outlines:   {}", status.outlines);
    println!("  chapter prose:      {}", status.prose_chapters);
    println!("  [{}] compiled book", mark(status.compiled));
    Ok(())
}

fn mark(present: bool) -> char {
    if present {
        'x'
    } else {
        ' '
    }
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let (name, profile) = resolve_llm_profile(&store, args.interface, sink)?;
    let model = create_llm_adapter_from_profile(&profile)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "probing `{name}`: {} via {}",
            profile.model_name, profile.interface_format
        ),
    ));
    sink.log(LogRecord::new(LogLevel::Debug, format!("probe prompt: {PROBE_PROMPT}")));

    let reply = model.complete(&Prompt::new().user(PROBE_PROMPT))?;
    let reply = non_empty(&reply)
        .ok_or_else(|| CliError::TestFailed(format!("`{name}` answered with an empty message")))?;
    sink.log(LogRecord::new(LogLevel::Info, format!("`{name}` answered: {reply}")));

    remember_interface(&mut store, name)
}

/// Records `name` as the last used profile, unless it is the built-in
/// local fallback that the config file does not know about.
fn remember_interface(store: &mut ConfigStore, name: String) -> Result<(), CliError> {
    if store.config().get_llm_profile(&name).is_none() {
        return Ok(());
    }
    store.touch_llm_interface(name);
    store.save()?;
    Ok(())
}

/// Picks the requested profile, else the last used one, else the first
/// configured one. With no profiles at all a local OpenAI-compatible server
/// is assumed.
fn resolve_llm_profile(
    store: &ConfigStore,
    preferred: Option<String>,
    sink: &dyn LogSink,
) -> Result<(String, LlmConfig), CliError> {
    let preferred = normalize_preference(preferred);
    if preferred.is_none() && store.config().llm_profiles.is_empty() {
        let local = LlmConfig::local_default();
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!(
                "{} defines no LLM profile, falling back to {}",
                store.path().display(),
                local.base_url
            ),
        ));
        return Ok((LOCAL_PROFILE_NAME.to_string(), local));
    }

    let name = select_llm_interface(store, preferred)?;
    match store.config().get_llm_profile(&name) {
        Some(profile) => Ok((name, profile.clone())),
        None => Err(CliError::UnknownInterface(name)),
    }
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    let profiles = &store.config().llm_profiles;
    match normalize_preference(preferred) {
        Some(name) if profiles.contains_key(&name) => Ok(name),
        Some(name) => Err(CliError::UnknownInterface(name)),
        None => store
            .last_llm_interface()
            .map(str::to_string)
            .or_else(|| profiles.keys().next().cloned())
            .ok_or(CliError::MissingLlmProfile),
    }
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| non_empty(&raw))
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim())
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] bookgen_core::ConfigError),
    #[error("no LLM profile is configured")]
    MissingLlmProfile,
    #[error("no LLM profile named `{0}`")]
    UnknownInterface(String),
    #[error("no project at `{}`", .0.display())]
    UnknownProject(PathBuf),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("failed to read from the terminal: {0}")]
    Input(#[from] io::Error),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("generation failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("LLM test failed: {0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "bookgen",
    version,
    about = "Staged book generation with a language model"
)]
struct Cli {
    /// Path of the configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Also print debug messages, including every prompt sent
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a book, reusing whatever the project already contains
    Generate(GenerateArgs),
    /// Show which artifacts of a project exist
    Status(StatusArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a probe prompt through an LLM profile
    TestLlm(TestLlmArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Project title; also names the project directory
    #[arg(long, value_name = "TEXT")]
    title: Option<String>,
    /// Story idea, overriding `book.story_idea`
    #[arg(long, value_name = "TEXT")]
    idea: Option<String>,
    /// Tone, overriding `book.tone`
    #[arg(long, value_name = "TEXT")]
    tone: Option<String>,
    /// Number of chapters, overriding `book.num_chapters`
    #[arg(long, value_name = "N")]
    chapters: Option<u32>,
    /// `auto` or `manual`, overriding `book.mode`
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,
    /// LLM profile to use; defaults to the most recently used one
    #[arg(long)]
    llm_interface: Option<String>,
    /// Total attempts per generation when the service fails transiently, default 1
    #[arg(long, value_name = "N")]
    max_attempts: Option<usize>,
}

#[derive(Args)]
struct StatusArgs {
    /// Project title
    #[arg(long, value_name = "TEXT")]
    title: String,
}

#[derive(Args)]
struct TestLlmArgs {
    /// Profile to test; defaults to the most recently used one
    #[arg(long)]
    interface: Option<String>,
}
