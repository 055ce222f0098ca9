use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError, Prompt};
use crate::store::{ArtifactStore, StoreError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("generation of `{artifact}` failed after {attempts} attempt(s): {source}")]
    Model {
        artifact: String,
        attempts: usize,
        #[source]
        source: LanguageModelError,
    },
}

/// How often a transient generation failure is retried before giving up.
/// Permanent failures are never retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub sleep: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, sleep: Duration) -> Self {
        Self {
            max_attempts,
            sleep,
        }
    }

    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

/// Resolves an artifact either from the project store or by generating it.
pub struct StageCache<'a> {
    store: &'a ArtifactStore,
    model: &'a dyn LanguageModel,
    sink: &'a dyn LogSink,
    retry: RetryPolicy,
}

impl<'a> StageCache<'a> {
    pub fn new(store: &'a ArtifactStore, model: &'a dyn LanguageModel, sink: &'a dyn LogSink) -> Self {
        Self {
            store,
            model,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            sleep: retry.sleep,
        };
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        self.store
    }

    /// Returns the stored artifact verbatim when it exists. Otherwise asks the
    /// model, persists the trimmed response and returns it.
    ///
    /// A failed generation leaves no artifact behind, so the next run asks
    /// again instead of reusing an empty result.
    pub fn generate_or_load(&self, artifact: &str, prompt: &Prompt) -> Result<String, CacheError> {
        if let Some(cached) = self.store.read(artifact)? {
            self.log(LogLevel::Info, artifact, "loaded from project, generation skipped");
            return Ok(cached);
        }

        let content = self.generate(artifact, prompt)?;
        let path = self.store.write(artifact, &content)?;
        self.log(
            LogLevel::Info,
            artifact,
            format!("generated and saved to {}", path.display()),
        );
        Ok(content)
    }

    fn generate(&self, artifact: &str, prompt: &Prompt) -> Result<String, CacheError> {
        let mut attempt = 1;
        loop {
            self.log(
                LogLevel::Debug,
                artifact,
                format!("prompt (attempt {attempt}/{}):\n{prompt}", self.retry.max_attempts),
            );

            match self.model.complete(prompt) {
                Ok(response) => return Ok(response.trim().to_string()),
                Err(err) => {
                    let retry = err.is_transient() && attempt < self.retry.max_attempts;
                    self.log(
                        LogLevel::Warn,
                        artifact,
                        format!(
                            "generation failed (attempt {attempt}/{}): {err}",
                            self.retry.max_attempts
                        ),
                    );
                    if !retry {
                        return Err(CacheError::Model {
                            artifact: artifact.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    if !self.retry.sleep.is_zero() {
                        thread::sleep(self.retry.sleep);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn log(&self, level: LogLevel, artifact: &str, message: impl Into<String>) {
        self.sink
            .log(LogRecord::for_stage(level, artifact, message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use crate::model::FailureKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, LanguageModelError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, LanguageModelError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn complete(&self, _prompt: &Prompt) -> Result<String, LanguageModelError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LanguageModelError::message(FailureKind::Permanent, "script exhausted")))
        }
    }

    fn prompt() -> Prompt {
        Prompt::new().system("system").user("user")
    }

    #[test]
    fn second_call_is_served_from_the_store() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let model = ScriptedModel::new(vec![Ok("  A premise.\n".to_string())]);
        let sink = NullLogSink;
        let cache = StageCache::new(&store, &model, &sink);

        let first = cache.generate_or_load("premise", &prompt()).unwrap();
        let second = cache.generate_or_load("premise", &prompt()).unwrap();

        assert_eq!(first, "A premise.");
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn failures_are_not_persisted() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let model = ScriptedModel::new(vec![
            Err(LanguageModelError::message(FailureKind::Transient, "connection reset")),
            Ok("recovered".to_string()),
        ]);
        let sink = NullLogSink;
        let cache = StageCache::new(&store, &model, &sink);

        let err = cache.generate_or_load("title", &prompt()).unwrap_err();
        assert!(matches!(err, CacheError::Model { attempts: 1, .. }));
        assert!(!store.exists("title"));

        assert_eq!(cache.generate_or_load("title", &prompt()).unwrap(), "recovered");
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn empty_success_is_cached() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let model = ScriptedModel::new(vec![Ok(String::new())]);
        let sink = NullLogSink;
        let cache = StageCache::new(&store, &model, &sink);

        assert_eq!(cache.generate_or_load("toc", &prompt()).unwrap(), "");
        assert!(store.exists("toc"));
        assert_eq!(cache.generate_or_load("toc", &prompt()).unwrap(), "");
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn retries_only_transient_failures() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let sink = NullLogSink;

        let model = ScriptedModel::new(vec![
            Err(LanguageModelError::message(FailureKind::Transient, "503")),
            Ok("second time lucky".to_string()),
        ]);
        let cache = StageCache::new(&store, &model, &sink)
            .with_retry(RetryPolicy::new(3, Duration::ZERO));
        assert_eq!(
            cache.generate_or_load("premise", &prompt()).unwrap(),
            "second time lucky"
        );
        assert_eq!(model.calls(), 2);

        let model = ScriptedModel::new(vec![
            Err(LanguageModelError::message(FailureKind::Permanent, "401")),
            Ok("never reached".to_string()),
        ]);
        let cache = StageCache::new(&store, &model, &sink)
            .with_retry(RetryPolicy::new(3, Duration::ZERO));
        assert!(cache.generate_or_load("title", &prompt()).is_err());
        assert_eq!(model.calls(), 1);
    }
}
