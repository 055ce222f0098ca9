use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::store::DEFAULT_OUTPUT_ROOT;

pub const LOCAL_PROFILE_NAME: &str = "local";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown generation mode `{0}`, expected `auto` or `manual`")]
    InvalidMode(String),
}

/// Connection settings for one model endpoint. Missing fields take the
/// values from `Default`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub interface_format: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Transport timeout in seconds.
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout: 600,
        }
    }
}

impl LlmConfig {
    /// An OpenAI-compatible server on the local machine (LM Studio's default
    /// port), used when the config file defines no profile.
    pub fn local_default() -> Self {
        Self {
            api_key: "not-needed".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            interface_format: "LM Studio".to_string(),
            model_name: "local-model".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Generated content is used as-is.
    #[default]
    Auto,
    /// Every stage result goes through the review gate.
    Manual,
}

impl GenerationMode {
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

impl FromStr for GenerationMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Defaults for `bookgen generate`; values given on the command line win.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BookConfig {
    pub story_idea: String,
    pub tone: String,
    pub num_chapters: u32,
    pub mode: Option<GenerationMode>,
    pub output_root: String,
    /// Write accepted revisions back into the stage artifact.
    pub persist_revisions: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            story_idea: String::new(),
            tone: String::new(),
            num_chapters: 0,
            mode: None,
            output_root: DEFAULT_OUTPUT_ROOT.to_string(),
            persist_revisions: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecentUsage {
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    pub book: BookConfig,
    pub prompts: PromptConfig,
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    /// Reads `path`; a missing file is the default config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(data) => Self::from_json_str(&data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes pretty JSON next to `path` and renames it into place.
    pub fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(self)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.write_to(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            let next = self.config.llm_profiles.keys().next().cloned();
            self.config.recent.last_llm_interface = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "llm_profiles": {
                "studio": {
                    "base_url": "http://localhost:1234/v1",
                    "interface_format": "LM Studio",
                    "model_name": "local-model",
                    "temperature": 0.9
                }
            },
            "book": {
                "story_idea": "a clockmaker who can rewind one minute",
                "tone": "melancholic",
                "num_chapters": 5,
                "mode": "manual"
            },
            "prompts": { "custom_directories": ["prompts"] },
            "recent": { "last_llm_interface": "studio" }
        }"#;

        let config = Config::from_json_str(json).unwrap();
        let profile = config.get_llm_profile("studio").unwrap();
        assert_eq!(profile.max_tokens, 4096);
        assert_eq!(profile.timeout, 600);
        assert!((profile.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.book.mode, Some(GenerationMode::Manual));
        assert_eq!(config.book.num_chapters, 5);
        assert_eq!(config.book.output_root, DEFAULT_OUTPUT_ROOT);
        assert!(!config.book.persist_revisions);
        assert_eq!(config.prompts.custom_directories, vec![PathBuf::from("prompts")]);
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = Config::from_json_str("  ").unwrap();
        assert!(config.llm_profiles.is_empty());
        assert_eq!(config.book, BookConfig::default());
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!("Auto".parse::<GenerationMode>().unwrap(), GenerationMode::Auto);
        assert_eq!(" MANUAL ".parse::<GenerationMode>().unwrap(), GenerationMode::Manual);
        assert!(matches!(
            "sometimes".parse::<GenerationMode>(),
            Err(ConfigError::InvalidMode(_))
        ));
    }

    #[test]
    fn store_persists_recent_interface() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("nested").join("config.json");

        let mut store = ConfigStore::open(config_path.clone()).unwrap();
        store
            .config_mut()
            .upsert_llm_profile("studio", LlmConfig::local_default());
        store.touch_llm_interface("studio");
        store.save().unwrap();

        let store = ConfigStore::open(config_path).unwrap();
        assert_eq!(store.last_llm_interface(), Some("studio"));
        assert_eq!(
            store.config().get_llm_profile("studio").unwrap().model_name,
            "local-model"
        );
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config =
            Config::from_json_str(r#"{ "book": { "tone": "wry" }, "llm_profiles": { "x": {} } }"#)
                .unwrap();
        assert_eq!(config.book.tone, "wry");
        assert_eq!(config.book.output_root, DEFAULT_OUTPUT_ROOT);
        assert_eq!(config.get_llm_profile("x"), Some(&LlmConfig::default()));
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConfigStore::open(path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn ensure_recent_defaults_replaces_stale_names() {
        let temp = tempdir().unwrap();
        let mut store = ConfigStore::open(temp.path().join("config.json")).unwrap();
        store
            .config_mut()
            .upsert_llm_profile("openai", LlmConfig::default());
        store.touch_llm_interface("removed");
        assert_eq!(store.last_llm_interface(), None);

        store.ensure_recent_defaults();
        assert_eq!(store.last_llm_interface(), Some("openai"));
    }
}
