use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;
use crate::model::{Prompt, Role};

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no prompt registered for `{key}`")]
    NotFound { key: String },
    #[error("prompt `{key}` needs a value for `{argument}`")]
    MissingArgument { key: String, argument: String },
    #[error("prompt `{key}` lists `{argument}` as required but never uses it")]
    UnknownRequired { key: String, argument: String },
    #[error("built-in prompts are malformed: {0}")]
    BuiltIn(#[source] toml::de::Error),
    #[error("failed to read prompts from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid TOML prompt file: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{path} is not a valid YAML prompt file: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Text(String),
    Slot(String),
}

/// One side of a prompt (system or user) split into text and `{slot}` pieces.
/// `{{` and `}}` produce literal braces, and a `{` that is never closed stays
/// in the text unchanged.
#[derive(Clone, Debug)]
struct Section {
    source: String,
    pieces: Vec<Piece>,
}

impl Section {
    fn parse(source: String) -> Self {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut rest = source.as_str();

        while let Some(at) = rest.find(['{', '}']) {
            text.push_str(&rest[..at]);
            let tail = &rest[at..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                text.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                text.push('}');
                rest = &tail[1..];
                continue;
            }

            match tail[1..].find('}') {
                Some(close) => {
                    let name = tail[1..=close].trim();
                    if name.is_empty() {
                        text.push_str(&tail[..close + 2]);
                    } else {
                        if !text.is_empty() {
                            pieces.push(Piece::Text(std::mem::take(&mut text)));
                        }
                        pieces.push(Piece::Slot(name.to_string()));
                    }
                    rest = &tail[close + 2..];
                }
                None => {
                    text.push_str(tail);
                    rest = "";
                }
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }

        Self { source, pieces }
    }

    fn slots(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Slot(name) => Some(name.as_str()),
            Piece::Text(_) => None,
        })
    }

    fn fill(&self, arguments: &PromptArguments) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Text(text) => text.as_str(),
                Piece::Slot(name) => arguments.get(name).map(String::as_str).unwrap_or_default(),
            })
            .collect()
    }
}

/// Instructions for one stage: an optional system section stating the task
/// and its format rules, and a user section that carries the stage inputs.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    system: Option<Section>,
    user: Section,
    required: BTreeSet<String>,
    description: Option<String>,
    source: PromptSource,
}

impl PromptTemplate {
    fn build(key: String, entry: PromptEntry, source: PromptSource) -> Result<Self, PromptError> {
        let system = entry
            .system
            .filter(|text| !text.trim().is_empty())
            .map(Section::parse);
        let user = Section::parse(entry.user);

        let used: BTreeSet<String> = system
            .iter()
            .flat_map(Section::slots)
            .chain(user.slots())
            .map(str::to_string)
            .collect();

        let required = if entry.required.is_empty() {
            used
        } else {
            let declared: BTreeSet<String> = entry
                .required
                .iter()
                .map(|name| name.trim().to_string())
                .collect();
            if let Some(unknown) = declared.difference(&used).next() {
                return Err(PromptError::UnknownRequired {
                    key,
                    argument: unknown.clone(),
                });
            }
            declared
        };

        Ok(Self {
            key,
            system,
            user,
            required,
            description: entry.description,
            source,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn system_template(&self) -> Option<&str> {
        self.system.as_ref().map(|section| section.source.as_str())
    }

    pub fn user_template(&self) -> &str {
        &self.user.source
    }

    pub fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<Prompt, PromptError> {
        if let Some(missing) = self.required.iter().find(|name| !arguments.contains_key(*name)) {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut prompt = Prompt::new();
        if let Some(system) = &self.system {
            prompt.push(Role::System, system.fill(arguments));
        }
        prompt.push(Role::User, self.user.fill(arguments));
        Ok(prompt)
    }
}

/// Stage instructions keyed by prompt name. The built-in set is loaded first,
/// then every `.toml`, `.yaml` or `.yml` file in the configured directories,
/// in file name order, replacing entries with the same key.
#[derive(Debug)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
    search_path: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::load(Vec::new())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::load(config.custom_directories.clone())
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        Self::load(directories.iter().map(|dir| dir.as_ref().to_path_buf()).collect())
    }

    fn load(search_path: Vec<PathBuf>) -> Result<Self, PromptError> {
        let mut registry = Self {
            templates: BTreeMap::new(),
            search_path,
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Rebuilds the registry from the built-in set and the custom directories.
    /// On error the previous templates are kept.
    pub fn reload(&mut self) -> Result<(), PromptError> {
        let document: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::BuiltIn)?;
        let mut templates = BTreeMap::new();
        document.register(PromptSource::BuiltIn, &mut templates)?;

        for dir in &self.search_path {
            for path in prompt_files(dir)? {
                let Some(format) = PromptFormat::for_path(&path) else {
                    continue;
                };
                let document = format.read(&path)?;
                document.register(PromptSource::File(path), &mut templates)?;
            }
        }

        self.templates = templates;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<Prompt, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let template = self.get(key).ok_or_else(|| PromptError::NotFound {
            key: key.to_string(),
        })?;
        let arguments: PromptArguments = arguments
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        template.render(&arguments)
    }
}

fn prompt_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let read_error = |source| PromptError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Clone, Copy, Debug)]
enum PromptFormat {
    Toml,
    Yaml,
}

impl PromptFormat {
    fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    fn read(self, path: &Path) -> Result<PromptDocument, PromptError> {
        let contents = fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match self {
            Self::Toml => toml::from_str(&contents).map_err(|source| PromptError::Toml {
                path: path.to_path_buf(),
                source,
            }),
            Self::Yaml => serde_yaml::from_str(&contents).map_err(|source| PromptError::Yaml {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, PromptEntry>,
}

impl PromptDocument {
    fn register(
        self,
        source: PromptSource,
        templates: &mut BTreeMap<String, PromptTemplate>,
    ) -> Result<(), PromptError> {
        for (key, entry) in self.prompts {
            let template = PromptTemplate::build(key.clone(), entry, source.clone())?;
            templates.insert(key, template);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PromptEntry {
    #[serde(default)]
    system: Option<String>,
    #[serde(alias = "template", alias = "text")]
    user: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: Vec<String>,
}
