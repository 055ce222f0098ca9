use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered, role-tagged instruction fragments sent to a [`LanguageModel`].
///
/// Prompts are rebuilt from templates and current artifacts on every run and
/// are never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    messages: Vec<PromptMessage>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.push(Role::System, content);
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.push(Role::User, content);
        self
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(PromptMessage::new(role, content));
    }

    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Concatenated text of all fragments with the given role.
    pub fn text_for(&self, role: Role) -> String {
        self.messages
            .iter()
            .filter(|message| message.role == role)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .iter()
            .any(|message| message.content.contains(needle))
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, message) in self.messages.iter().enumerate() {
            if index > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "[{}]\n{}", message.role, message.content)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// Timeouts, dropped connections, rate limits and server-side errors.
    Transient,
    /// Rejected requests, bad configuration, unreadable or empty responses.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug)]
pub struct LanguageModelError {
    kind: FailureKind,
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(kind: FailureKind, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            inner: Box::new(error),
        }
    }

    pub fn transient<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(FailureKind::Transient, error)
    }

    pub fn permanent<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(FailureKind::Permanent, error)
    }

    pub fn message(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(kind, MessageError(message.into()))
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MessageError(String);

/// The external generation service: one structured prompt in, one text out.
///
/// Implementations must not retry internally and must report failures as
/// errors instead of returning placeholder text.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &Prompt) -> Result<String, LanguageModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(&self, prompt: &Prompt) -> Result<String, LanguageModelError> {
        (**self).complete(prompt)
    }
}
