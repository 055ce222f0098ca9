use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_OUTPUT_ROOT: &str = "generated_content";
pub const REVISION_DIR_NAME: &str = "feedback_files";
const ARTIFACT_EXTENSION: &str = "txt";
const FORBIDDEN_TITLE_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare project directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to read artifact `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write artifact `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to remove `{path}`: {source}")]
    Remove { path: PathBuf, source: io::Error },
    #[error("failed to list project directory `{path}`: {source}")]
    List { path: PathBuf, source: io::Error },
    #[error("required artifact `{name}` does not exist in `{dir}`")]
    Missing { name: String, dir: PathBuf },
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error("project title `{0}` has no usable characters")]
    EmptyProjectName(String),
}

/// Strips characters that are not allowed in directory names on common
/// filesystems.
pub fn sanitize_project_name(title: &str) -> Result<String, StoreError> {
    let cleaned: String = title
        .chars()
        .filter(|ch| !FORBIDDEN_TITLE_CHARS.contains(ch) && !ch.is_control())
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        return Err(StoreError::EmptyProjectName(title.to_string()));
    }
    Ok(cleaned.to_string())
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.trim().is_empty()
        || name != name.trim()
        || name.contains(['/', '\\'])
        || name.starts_with('.');
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes through a sibling temporary file so readers never observe a
/// partially written artifact.
fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp, content).map_err(|source| StoreError::Write {
        path: temp.clone(),
        source,
    })?;
    fs::rename(&temp, path).map_err(|source| {
        let _ = fs::remove_file(&temp);
        StoreError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Named text artifacts of one book, stored as flat `<name>.txt` files in the
/// project directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Opens `<output_root>/<sanitized title>`, creating it when needed.
    pub fn for_project(output_root: impl AsRef<Path>, title: &str) -> Result<Self, StoreError> {
        let name = sanitize_project_name(title)?;
        Self::open(output_root.as_ref().join(name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.{ARTIFACT_EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(name)?;
        read_optional(&path)
    }

    /// Like [`ArtifactStore::read`] but treats absence as an error.
    pub fn require(&self, name: &str) -> Result<String, StoreError> {
        self.read(name)?.ok_or_else(|| StoreError::Missing {
            name: name.to_string(),
            dir: self.dir.clone(),
        })
    }

    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(name)?;
        write_atomic(&path, content)?;
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Remove { path, source }),
        }
    }

    /// Artifact names present in the project, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::List {
            path: self.dir.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::List {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn revisions(&self) -> RevisionLog {
        RevisionLog::new(self.dir.join(REVISION_DIR_NAME))
    }
}

/// Audit trail of the latest human-directed revision per stage.
///
/// Kept apart from the artifacts; nothing in the pipeline reads it back.
#[derive(Clone, Debug)]
pub struct RevisionLog {
    dir: PathBuf,
}

impl RevisionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stage: &str) -> Result<PathBuf, StoreError> {
        validate_name(stage)?;
        Ok(self.dir.join(format!("{stage}_feedback.{ARTIFACT_EXTENSION}")))
    }

    pub fn record(&self, stage: &str, revised: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(stage)?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        write_atomic(&path, revised)?;
        Ok(path)
    }

    pub fn read(&self, stage: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(stage)?;
        read_optional(&path)
    }

    pub fn clear(&self, stage: &str) -> Result<bool, StoreError> {
        let path = self.path_for(stage)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Remove { path, source }),
        }
    }
}
